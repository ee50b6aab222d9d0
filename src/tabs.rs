use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::auth_listener::{AuthListener, ListenerOutcome};
use crate::config::{RelayConfig, SitesConfig};
use crate::dom::Page;
use crate::messages::Envelope;
use crate::platform::{Overlay, TabId};
use crate::relay::RelayHandle;

/// Which content script a page gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRole {
    Messaging,
    Dashboard,
    Other,
}

/// `host` equals `domain` or is one of its subdomains.
fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{}", domain))
}

impl SitesConfig {
    pub fn role_for(&self, url: &Url) -> PageRole {
        match url.host_str() {
            Some(host) if host_matches(host, &self.messaging_host) => PageRole::Messaging,
            Some(host) if host_matches(host, &self.dashboard_host) => PageRole::Dashboard,
            _ => PageRole::Other,
        }
    }

    pub fn is_messaging_url(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| self.role_for(&u) == PageRole::Messaging)
            .unwrap_or(false)
    }
}

enum ContentScript {
    Relay(RelayHandle),
    Auth(AuthListener),
    None,
}

struct Tab {
    url: String,
    script: ContentScript,
}

/// Open tabs and the content script installed in each.
pub struct TabRegistry {
    sites: SitesConfig,
    relay: RelayConfig,
    runtime: mpsc::Sender<Envelope>,
    overlay: Arc<dyn Overlay>,
    tabs: RwLock<HashMap<TabId, Tab>>,
}

impl TabRegistry {
    pub fn new(
        sites: SitesConfig,
        relay: RelayConfig,
        runtime: mpsc::Sender<Envelope>,
        overlay: Arc<dyn Overlay>,
    ) -> Self {
        Self {
            sites,
            relay,
            runtime,
            overlay,
            tabs: RwLock::new(HashMap::new()),
        }
    }

    /// A tab finished loading `page`. Installs at most one content script.
    pub async fn load(&self, tab_id: TabId, page: Page) -> Result<PageRole> {
        let url = Url::parse(&page.url)
            .with_context(|| format!("Tab {} has an unparseable URL: {}", tab_id, page.url))?;
        let role = self.sites.role_for(&url);
        let mut tabs = self.tabs.write().await;

        // Same messaging tab re-captured: keep the bridge, refresh its page.
        if let Some(Tab {
            script: ContentScript::Relay(relay),
            ..
        }) = tabs.get(&tab_id)
        {
            if role == PageRole::Messaging {
                let relay = relay.clone();
                let url = page.url.clone();
                relay.update_page(page).await;
                if let Some(tab) = tabs.get_mut(&tab_id) {
                    tab.url = url;
                }
                debug!("Refreshed page capture for tab {}", tab_id);
                return Ok(role);
            }
        }

        let script = match role {
            PageRole::Messaging => {
                info!("Installing relay bridge in tab {} ({})", tab_id, page.url);
                ContentScript::Relay(RelayHandle::spawn(
                    page.clone(),
                    self.relay.reply_timeout(),
                ))
            }
            PageRole::Dashboard => {
                let origin = url.origin().ascii_serialization();
                info!("Installing auth listener in tab {} ({})", tab_id, origin);
                ContentScript::Auth(AuthListener::new(
                    tab_id,
                    origin,
                    self.runtime.clone(),
                    self.overlay.clone(),
                    self.relay.toast_duration(),
                ))
            }
            PageRole::Other => ContentScript::None,
        };

        tabs.insert(
            tab_id,
            Tab {
                url: page.url,
                script,
            },
        );
        Ok(role)
    }

    pub async fn close(&self, tab_id: TabId) -> bool {
        self.tabs.write().await.remove(&tab_id).is_some()
    }

    pub async fn url(&self, tab_id: TabId) -> Option<String> {
        self.tabs.read().await.get(&tab_id).map(|t| t.url.clone())
    }

    /// Ask the tab's bridge. Errors when the tab is unknown or has no bridge.
    pub async fn send(&self, tab_id: TabId, message: Envelope) -> Result<Option<Envelope>> {
        let relay = {
            let tabs = self.tabs.read().await;
            match tabs.get(&tab_id) {
                Some(Tab {
                    script: ContentScript::Relay(relay),
                    ..
                }) => relay.clone(),
                Some(_) => anyhow::bail!("No receiving end in tab {}", tab_id),
                None => anyhow::bail!("No tab with id {}", tab_id),
            }
        };
        relay.request(message).await
    }

    /// Deliver a `window.postMessage` event to the tab's auth listener.
    pub async fn post_window_message(
        &self,
        tab_id: TabId,
        origin: &str,
        data: Value,
    ) -> Option<ListenerOutcome> {
        let tabs = self.tabs.read().await;
        match tabs.get(&tab_id) {
            Some(Tab {
                script: ContentScript::Auth(listener),
                ..
            }) => Some(listener.on_window_message(origin, data).await),
            _ => {
                debug!("No window-message listener in tab {}", tab_id);
                None
            }
        }
    }
}
