//! Content-script listener installed on the dashboard's own origin.
//!
//! The origin comparison below is the only trust boundary for token
//! injection: a message from any other origin is dropped without reply.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::messages::{Envelope, WindowMessage, TOKEN_ISSUED};
use crate::platform::{Overlay, TabId};
use crate::storage::credential::Credential;

pub const LINKED_TOAST: &str = "Extension Linked Successfully!";

/// What happened to one inbound window message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    Forwarded,
    ForeignOrigin,
    Unrecognized,
}

pub struct AuthListener {
    tab_id: TabId,
    origin: String,
    runtime: mpsc::Sender<Envelope>,
    overlay: Arc<dyn Overlay>,
    toast_duration: Duration,
}

impl AuthListener {
    pub fn new(
        tab_id: TabId,
        origin: String,
        runtime: mpsc::Sender<Envelope>,
        overlay: Arc<dyn Overlay>,
        toast_duration: Duration,
    ) -> Self {
        Self {
            tab_id,
            origin,
            runtime,
            overlay,
            toast_duration,
        }
    }

    /// Handle a `message` event posted into the page.
    pub async fn on_window_message(&self, origin: &str, data: Value) -> ListenerOutcome {
        if origin != self.origin {
            debug!(
                "Ignoring window message from '{}' (document origin '{}')",
                origin, self.origin
            );
            return ListenerOutcome::ForeignOrigin;
        }

        let message: WindowMessage = match serde_json::from_value(data) {
            Ok(m) => m,
            Err(_) => return ListenerOutcome::Unrecognized,
        };
        if message.kind != TOKEN_ISSUED {
            return ListenerOutcome::Unrecognized;
        }

        let credential: Credential = match message.payload.map(serde_json::from_value) {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                warn!("Token-issued message with unreadable payload: {}", e);
                return ListenerOutcome::Unrecognized;
            }
            None => {
                warn!("Token-issued message without payload");
                return ListenerOutcome::Unrecognized;
            }
        };

        info!(
            "Dashboard issued a token for supplier '{}'",
            credential.supplier_id
        );
        if self
            .runtime
            .send(Envelope::StoreCredential {
                payload: credential,
            })
            .await
            .is_err()
        {
            warn!("Background runtime is gone; token not forwarded");
        }

        self.overlay
            .show_toast(self.tab_id, LINKED_TOAST, self.toast_duration);
        ListenerOutcome::Forwarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::RecordingOverlay;
    use serde_json::json;

    const ORIGIN: &str = "https://dashboard.wady.ai";

    fn listener() -> (
        AuthListener,
        mpsc::Receiver<Envelope>,
        Arc<RecordingOverlay>,
    ) {
        let (tx, rx) = mpsc::channel(4);
        let overlay = Arc::new(RecordingOverlay::default());
        let listener = AuthListener::new(
            3,
            ORIGIN.to_string(),
            tx,
            overlay.clone(),
            Duration::from_secs(3),
        );
        (listener, rx, overlay)
    }

    fn issued() -> Value {
        json!({
            "type": TOKEN_ISSUED,
            "payload": {"token": "tok", "supplierId": "S-1", "userId": "U-1", "expiresAt": 4102444800000i64}
        })
    }

    #[tokio::test]
    async fn test_forwards_same_origin_token() {
        let (listener, mut rx, overlay) = listener();
        assert_eq!(
            listener.on_window_message(ORIGIN, issued()).await,
            ListenerOutcome::Forwarded
        );

        match rx.recv().await.unwrap() {
            Envelope::StoreCredential { payload } => {
                assert_eq!(payload.token, "tok");
                assert_eq!(payload.supplier_id, "S-1");
            }
            other => panic!("unexpected envelope: {:?}", other),
        }
        assert_eq!(
            overlay.toasts.lock().unwrap().as_slice(),
            &[(3, LINKED_TOAST.to_string())]
        );
    }

    #[tokio::test]
    async fn test_rejects_foreign_origin_silently() {
        let (listener, mut rx, overlay) = listener();
        for origin in ["https://evil.example", "https://dashboard.wady.ai.evil.example", "null", ""] {
            assert_eq!(
                listener.on_window_message(origin, issued()).await,
                ListenerOutcome::ForeignOrigin
            );
        }
        assert!(rx.try_recv().is_err());
        assert!(overlay.toasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_other_message_types() {
        let (listener, mut rx, _) = listener();
        let outcome = listener
            .on_window_message(ORIGIN, json!({"type": "SOMETHING_ELSE", "payload": {}}))
            .await;
        assert_eq!(outcome, ListenerOutcome::Unrecognized);
        assert_eq!(
            listener.on_window_message(ORIGIN, json!("hello")).await,
            ListenerOutcome::Unrecognized
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ignores_token_event_with_bad_payload() {
        let (listener, mut rx, _) = listener();
        let outcome = listener
            .on_window_message(ORIGIN, json!({"type": TOKEN_ISSUED, "payload": {"token": 1}}))
            .await;
        assert_eq!(outcome, ListenerOutcome::Unrecognized);
        assert!(rx.try_recv().is_err());
    }
}
