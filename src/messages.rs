//! Typed messages exchanged between the background process and content scripts.
//!
//! The wire form is a JSON object tagged by `type`. Parsing is strict: a tag
//! outside the closed set is an error rather than a silently ignored message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::storage::credential::Credential;

/// Cross-document message type the dashboard posts when it issues a token.
pub const TOKEN_ISSUED: &str = "WADY_EXTENSION_TOKEN_ISSUED";

const KNOWN_TAGS: &[&str] = &[
    "GET_CONTEXT",
    "GET_WA_PHONE",
    "SAVE_TOKEN",
    "CONTEXT_RESULT",
    "PHONE_RESULT",
    "PHONE_PROMPT_RESULT",
    "SHOW_NOTIFICATION",
];

/// Best-effort metadata scraped from the messaging client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ts: Option<String>,
}

impl ExtractedContext {
    pub fn is_empty(&self) -> bool {
        self.chat_name.is_none() && self.sender_display.is_none() && self.message_ts.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "GET_CONTEXT")]
    RequestContext,
    #[serde(rename = "GET_WA_PHONE")]
    GetPhone,
    #[serde(rename = "SAVE_TOKEN")]
    StoreCredential { payload: Credential },
    #[serde(rename = "CONTEXT_RESULT")]
    ContextResult { payload: ExtractedContext },
    #[serde(rename = "PHONE_RESULT")]
    PhoneResult {
        #[serde(default)]
        phone: Option<String>,
    },
    #[serde(rename = "PHONE_PROMPT_RESULT")]
    PhonePromptResult {
        #[serde(default)]
        phone: Option<String>,
    },
    #[serde(rename = "SHOW_NOTIFICATION")]
    Notify { message: String, severity: Severity },
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("message has no string 'type' field")]
    MissingTag,
    #[error("unknown message type '{0}'")]
    UnknownTag(String),
    #[error("malformed '{tag}' message: {source}")]
    Malformed {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Envelope {
    pub fn tag(&self) -> &'static str {
        match self {
            Envelope::RequestContext => "GET_CONTEXT",
            Envelope::GetPhone => "GET_WA_PHONE",
            Envelope::StoreCredential { .. } => "SAVE_TOKEN",
            Envelope::ContextResult { .. } => "CONTEXT_RESULT",
            Envelope::PhoneResult { .. } => "PHONE_RESULT",
            Envelope::PhonePromptResult { .. } => "PHONE_PROMPT_RESULT",
            Envelope::Notify { .. } => "SHOW_NOTIFICATION",
        }
    }

    /// Parse an untyped runtime message, rejecting unknown tags explicitly.
    pub fn parse(value: Value) -> Result<Self, EnvelopeError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingTag)?
            .to_string();
        if !KNOWN_TAGS.contains(&tag.as_str()) {
            return Err(EnvelopeError::UnknownTag(tag));
        }
        serde_json::from_value(value).map_err(|source| EnvelopeError::Malformed { tag, source })
    }
}

/// A message posted into the dashboard page with `window.postMessage`.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_tags() {
        let value = serde_json::to_value(Envelope::RequestContext).unwrap();
        assert_eq!(value, json!({"type": "GET_CONTEXT"}));

        let value = serde_json::to_value(Envelope::PhonePromptResult {
            phone: Some("+123456789".into()),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "PHONE_PROMPT_RESULT", "phone": "+123456789"}));
    }

    #[test]
    fn test_parse_store_credential() {
        let env = Envelope::parse(json!({
            "type": "SAVE_TOKEN",
            "payload": {"token": "t", "supplierId": "s", "expiresAt": 5}
        }))
        .unwrap();
        match env {
            Envelope::StoreCredential { payload } => assert_eq!(payload.token, "t"),
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_tag() {
        let err = Envelope::parse(json!({"type": "DELETE_EVERYTHING"})).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownTag(tag) if tag == "DELETE_EVERYTHING"));
    }

    #[test]
    fn test_parse_rejects_missing_tag() {
        assert!(matches!(
            Envelope::parse(json!({"payload": 1})),
            Err(EnvelopeError::MissingTag)
        ));
    }

    #[test]
    fn test_parse_reports_malformed_payload() {
        let err = Envelope::parse(json!({"type": "SAVE_TOKEN", "payload": "nope"})).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed { .. }));
        assert!(err.to_string().contains("SAVE_TOKEN"));
    }

    #[test]
    fn test_prompt_result_without_phone() {
        let env = Envelope::parse(json!({"type": "PHONE_PROMPT_RESULT"})).unwrap();
        assert_eq!(env, Envelope::PhonePromptResult { phone: None });
    }

    #[test]
    fn test_empty_context_serializes_to_empty_object() {
        let value = serde_json::to_value(ExtractedContext::default()).unwrap();
        assert_eq!(value, json!({}));
    }
}
