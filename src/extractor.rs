//! Best-effort scraping of the messaging client's page.
//!
//! Nothing here returns an error: every DOM failure degrades to "not found".
//! The heuristics follow the client's markup as it is today and are expected
//! to drift.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::dom::{DomError, Element, Page};
use crate::messages::ExtractedContext;

pub const UNKNOWN_CHAT: &str = "Unknown Chat";
pub const UNKNOWN_SENDER: &str = "Unknown Sender";

const HEADER: &str = "header";
const HEADER_TITLE: &str = r#"header div[role="button"] span[title]"#;
const DRAWER: &str = r#"[data-testid="chat-info-drawer"], [data-testid="contact-info"], [role="dialog"], aside"#;
const LABELLED: &str = "[title], [aria-label]";
const MESSAGE_META: &str = "[data-pre-plain-text]";

/// Minimum digit count for something to be treated as a phone number.
pub const MIN_PHONE_DIGITS: usize = 7;

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\+?[0-9](?:[ \-]?[0-9]){6,}").expect("phone pattern is valid")
    })
}

/// Pull the first phone-like run out of `text`.
///
/// Keeps a leading `+` and the digits, drops separators. The result is
/// either `None` or matches `^\+?\d{7,}$`.
pub fn normalize_phone(text: &str) -> Option<String> {
    let candidate = phone_pattern().find(text)?.as_str();
    let mut phone = String::with_capacity(candidate.len());
    if candidate.starts_with('+') {
        phone.push('+');
    }
    phone.extend(candidate.chars().filter(char::is_ascii_digit));

    let digits = phone.trim_start_matches('+').len();
    (digits >= MIN_PHONE_DIGITS).then_some(phone)
}

/// Run one heuristic, treating any DOM error as "not found".
fn attempt<T>(stage: &str, f: impl FnOnce() -> Result<Option<T>, DomError>) -> Option<T> {
    match f() {
        Ok(found) => found,
        Err(e) => {
            debug!("Extraction stage '{}' failed: {}", stage, e);
            None
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Elements in and around the header that may carry `title`/`aria-label`.
fn labelled_near_header(page: &Page) -> Result<Vec<&Element>, DomError> {
    let Some(header) = page.query_selector(HEADER)? else {
        return Ok(Vec::new());
    };
    let scope = page.parent_of(header)?.unwrap_or(header);
    scope.query_selector_all(LABELLED)
}

fn label_of(el: &Element) -> Option<&str> {
    el.attr("title")
        .filter(|t| !t.trim().is_empty())
        .or_else(|| el.attr("aria-label"))
}

/// Find the open chat's phone number.
///
/// Order: header text, then an open info drawer, then `title`/`aria-label`
/// attributes near the header. First hit wins.
pub fn extract_phone(page: &Page) -> Option<String> {
    let from_header = attempt("header text", || {
        Ok(page
            .query_selector(HEADER)?
            .and_then(|h| normalize_phone(&h.inner_text())))
    });
    if from_header.is_some() {
        return from_header;
    }

    let from_drawer = attempt("drawer text", || {
        Ok(page
            .query_selector_all(DRAWER)?
            .into_iter()
            .find_map(|d| normalize_phone(&d.inner_text())))
    });
    if from_drawer.is_some() {
        return from_drawer;
    }

    attempt("header labels", || {
        Ok(labelled_near_header(page)?
            .into_iter()
            .filter_map(label_of)
            .find_map(normalize_phone))
    })
}

fn chat_name(page: &Page) -> Option<String> {
    let from_header = attempt("header title", || {
        Ok(page.query_selector(HEADER_TITLE)?.and_then(|span| {
            span.attr("title")
                .and_then(non_empty)
                .or_else(|| non_empty(&span.inner_text()))
        }))
    });
    if from_header.is_some() {
        return from_header;
    }

    let from_drawer = attempt("drawer title", || {
        let Some(drawer) = page.query_selector(DRAWER)? else {
            return Ok(None);
        };
        Ok(drawer
            .query_selector("span[title]")?
            .and_then(|span| span.attr("title").and_then(non_empty)))
    });
    if from_drawer.is_some() {
        return from_drawer;
    }

    attempt("header labels", || {
        Ok(labelled_near_header(page)?
            .into_iter()
            .filter_map(label_of)
            .find_map(non_empty))
    })
}

/// Author of the most recent message row, parsed from the row metadata
/// (`"[10:32, 16/10/2026] Alice: "`).
fn last_sender(page: &Page) -> Option<String> {
    attempt("message meta", || {
        Ok(page
            .query_selector_all(MESSAGE_META)?
            .into_iter()
            .rev()
            .filter_map(|row| row.attr("data-pre-plain-text"))
            .find_map(|meta| {
                let (_, rest) = meta.split_once(']')?;
                let (name, _) = rest.rsplit_once(':')?;
                non_empty(name)
            }))
    })
}

/// Scrape chat metadata. A page without a document yields an empty context;
/// otherwise missing fields fall back to placeholder values.
pub fn extract_context(page: &Page, now: DateTime<Utc>) -> ExtractedContext {
    if page.document.is_none() {
        warn!("Failed to extract context: {}", DomError::NoDocument);
        return ExtractedContext::default();
    }

    ExtractedContext {
        chat_name: Some(chat_name(page).unwrap_or_else(|| UNKNOWN_CHAT.to_string())),
        sender_display: Some(last_sender(page).unwrap_or_else(|| UNKNOWN_SENDER.to_string())),
        message_ts: Some(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_header(header: Element) -> Page {
        Page::new(
            "https://web.whatsapp.com/",
            Element::new("html").with_child(
                Element::new("body").with_child(Element::new("div").with_child(header)),
            ),
        )
    }

    fn is_normalized(phone: &str) -> bool {
        let digits = phone.strip_prefix('+').unwrap_or(phone);
        digits.len() >= MIN_PHONE_DIGITS && digits.chars().all(|c| c.is_ascii_digit())
    }

    #[test]
    fn test_normalize_spaced_international() {
        assert_eq!(
            normalize_phone("+974 3138 3698").as_deref(),
            Some("+97431383698")
        );
    }

    #[test]
    fn test_normalize_hyphens_and_surrounding_text() {
        assert_eq!(
            normalize_phone("call 555-123-4567 after 5").as_deref(),
            Some("5551234567")
        );
    }

    #[test]
    fn test_normalize_rejects_short_numbers() {
        assert_eq!(normalize_phone("room 12 34 56"), None);
        assert_eq!(normalize_phone("+12 345"), None);
        assert_eq!(normalize_phone("no digits here"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_normalize_output_shape_over_varied_inputs() {
        let inputs = [
            "+1 (555) 010-9999",
            "++44 20 7946 0958",
            "tel: 0044-20-7946-0958",
            "Acme Traders",
            "1234567",
            "- - 12 - 34",
            "+ 974 3138 3698",
            "٣١٣٨٣٦٩٨",
            "99999999999999999999",
        ];
        for input in inputs {
            if let Some(phone) = normalize_phone(input) {
                assert!(is_normalized(&phone), "{:?} -> {:?}", input, phone);
            }
        }
    }

    #[test]
    fn test_phone_from_header_text() {
        let page = page_with_header(
            Element::new("header").with_child(
                Element::new("div")
                    .with_attr("role", "button")
                    .with_child(Element::new("span").with_text("+974 3138 3698")),
            ),
        );
        assert_eq!(extract_phone(&page).as_deref(), Some("+97431383698"));
    }

    #[test]
    fn test_phone_from_drawer_when_header_is_a_name() {
        let page = Page::new(
            "https://web.whatsapp.com/",
            Element::new("html").with_child(
                Element::new("body")
                    .with_child(
                        Element::new("header")
                            .with_child(Element::new("span").with_text("Acme Traders")),
                    )
                    .with_child(
                        Element::new("div")
                            .with_attr("data-testid", "chat-info-drawer")
                            .with_child(Element::new("span").with_text("+44 20 7946 0958")),
                    ),
            ),
        );
        assert_eq!(extract_phone(&page).as_deref(), Some("+442079460958"));
    }

    #[test]
    fn test_phone_from_label_next_to_header() {
        let page = Page::new(
            "https://web.whatsapp.com/",
            Element::new("html").with_child(
                Element::new("div")
                    .with_child(Element::new("header").with_text("Acme Traders"))
                    .with_child(Element::new("img").with_attr("aria-label", "+1 555 010 9999")),
            ),
        );
        assert_eq!(extract_phone(&page).as_deref(), Some("+15550109999"));
    }

    #[test]
    fn test_phone_absent() {
        let page = page_with_header(Element::new("header").with_text("Acme Traders"));
        assert_eq!(extract_phone(&page), None);
        assert_eq!(extract_phone(&Page::default()), None);
    }

    #[test]
    fn test_context_from_header_title() {
        let page = page_with_header(
            Element::new("header").with_child(
                Element::new("div").with_attr("role", "button").with_child(
                    Element::new("span")
                        .with_attr("title", "Acme Traders")
                        .with_text("Acme…"),
                ),
            ),
        );
        let now = Utc::now();
        let context = extract_context(&page, now);
        assert_eq!(context.chat_name.as_deref(), Some("Acme Traders"));
        assert_eq!(context.sender_display.as_deref(), Some(UNKNOWN_SENDER));
        assert_eq!(
            context.message_ts,
            Some(now.to_rfc3339_opts(SecondsFormat::Millis, true))
        );
    }

    #[test]
    fn test_context_from_header_label_and_last_message_row() {
        let page = Page::new(
            "https://web.whatsapp.com/",
            Element::new("html")
                .with_child(Element::new("header").with_attr("title", "Orders group"))
                .with_child(
                    Element::new("div")
                        .with_child(
                            Element::new("div")
                                .with_attr("data-pre-plain-text", "[10:30, 16/10/2026] Bob: "),
                        )
                        .with_child(
                            Element::new("div")
                                .with_attr("data-pre-plain-text", "[10:32, 16/10/2026] Alice: "),
                        ),
                ),
        );
        let context = extract_context(&page, Utc::now());
        assert_eq!(context.sender_display.as_deref(), Some("Alice"));
        assert_eq!(context.chat_name.as_deref(), Some("Orders group"));
    }

    #[test]
    fn test_context_defaults_on_foreign_markup() {
        let page = Page::new(
            "https://web.whatsapp.com/",
            Element::new("html").with_child(Element::new("p").with_text("loading")),
        );
        let context = extract_context(&page, Utc::now());
        assert_eq!(context.chat_name.as_deref(), Some(UNKNOWN_CHAT));
        assert_eq!(context.sender_display.as_deref(), Some(UNKNOWN_SENDER));
    }

    #[test]
    fn test_context_empty_without_document() {
        assert!(extract_context(&Page::default(), Utc::now()).is_empty());
    }
}
