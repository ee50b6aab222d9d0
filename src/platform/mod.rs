pub mod native;

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use crate::messages::Severity;

/// Browser tab identifier as assigned by the host.
pub type TabId = u32;

/// Non-blocking user-visible notices.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, severity: Severity);
}

/// The toolbar "connected" badge.
pub trait Indicator: Send + Sync {
    fn set_connected(&self, connected: bool);
    fn is_connected(&self) -> bool;
}

/// A transient surface asking the user for a phone number.
#[async_trait]
pub trait PhonePrompt: Send + Sync {
    /// Resolves to `None` when the user submits nothing or closes the prompt.
    async fn ask(&self) -> Option<String>;

    /// Hand a submitted (or `None` for closed) result to the open prompt.
    /// Returns false when no prompt is waiting.
    fn deliver(&self, phone: Option<String>) -> bool;
}

/// In-page overlay used for the link confirmation toast.
pub trait Overlay: Send + Sync {
    fn show_toast(&self, tab_id: TabId, text: &str, duration: Duration);
}

/// Browser contexts a menu entry can be shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuContext {
    Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MenuEntry {
    pub id: String,
    pub title: String,
    pub contexts: Vec<MenuContext>,
}

/// Registered context-menu entries, keyed by id.
#[derive(Debug, Default)]
pub struct ContextMenus {
    entries: Mutex<Vec<MenuEntry>>,
}

impl ContextMenus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry, replacing any existing entry with the same id.
    pub fn create(&self, entry: MenuEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| e.id != entry.id);
        info!("Registered context menu '{}' ({})", entry.title, entry.id);
        entries.push(entry);
    }

    #[cfg(test)]
    pub fn entries(&self) -> Vec<MenuEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, title: &str) -> MenuEntry {
        MenuEntry {
            id: id.to_string(),
            title: title.to_string(),
            contexts: vec![MenuContext::Selection],
        }
    }

    #[test]
    fn test_create_replaces_same_id() {
        let menus = ContextMenus::new();
        menus.create(entry("send", "Old"));
        menus.create(entry("send", "New"));
        let entries = menus.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "New");
    }
}
