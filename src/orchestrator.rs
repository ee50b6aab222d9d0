use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, InboxClient, OutboundPayload, PhoneOrder, SourceHint};
use crate::auth::{AuthState, Invalidation};
use crate::config::{Config, PipelineMode};
use crate::messages::{Envelope, ExtractedContext, Severity};
use crate::platform::{ContextMenus, MenuContext, MenuEntry, Notifier, PhonePrompt, TabId};
use crate::tabs::TabRegistry;

pub const MENU_ID: &str = "send-to-wady";

pub const NO_TEXT: &str = "No text selected.";
pub const CONNECT_FIRST: &str = "Please connect your Wady account first.";
pub const NO_PHONE: &str = "No phone provided. Cancelled.";
pub const SENT: &str = "Sent to Wady Inbox.";
pub const ORDER_SENT: &str = "Order sent successfully.";
pub const SEND_FAILED: &str = "Failed to send to Wady. Please try again.";
pub const SESSION_EXPIRED: &str = "Your Wady session has expired. Please connect again.";
pub const LINK_FAILED: &str = "Could not link your Wady account. Please try again from the dashboard.";

/// A click on one of our context-menu entries.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MenuClick {
    pub menu_item_id: String,
    #[serde(default)]
    pub selection_text: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub tab_id: Option<TabId>,
}

/// How one "send selection" attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Ignored,
    NoSelection,
    NotLinked,
    NoPhone,
    Unauthorized,
    Failed,
}

/// The background process: menu entry, credential lifecycle, send pipeline.
pub struct Background {
    config: Config,
    api: InboxClient,
    auth: Arc<AuthState>,
    tabs: Arc<TabRegistry>,
    menus: ContextMenus,
    notifier: Arc<dyn Notifier>,
    prompt: Arc<dyn PhonePrompt>,
}

impl Background {
    pub fn new(
        config: Config,
        api: InboxClient,
        auth: Arc<AuthState>,
        tabs: Arc<TabRegistry>,
        notifier: Arc<dyn Notifier>,
        prompt: Arc<dyn PhonePrompt>,
    ) -> Self {
        Self {
            config,
            api,
            auth,
            tabs,
            menus: ContextMenus::new(),
            notifier,
            prompt,
        }
    }

    #[cfg(test)]
    pub fn auth(&self) -> &Arc<AuthState> {
        &self.auth
    }

    #[cfg(test)]
    pub fn menus(&self) -> &ContextMenus {
        &self.menus
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Installation-time setup: one menu entry for text selections.
    pub fn on_installed(&self) {
        self.menus.create(MenuEntry {
            id: MENU_ID.to_string(),
            title: self.config.extension.effective_menu_title().to_string(),
            contexts: vec![MenuContext::Selection],
        });
    }

    /// Entry point for a menu click. Never fails: every error ends as a notice.
    pub async fn on_menu_clicked(&self, click: MenuClick) -> SendOutcome {
        match self.send_selection(click).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Send pipeline failed: {:#}", e);
                self.notifier.notify(SEND_FAILED, Severity::Error).await;
                SendOutcome::Failed
            }
        }
    }

    async fn send_selection(&self, click: MenuClick) -> Result<SendOutcome> {
        if click.menu_item_id != MENU_ID {
            return Ok(SendOutcome::Ignored);
        }
        let Some(tab_id) = click.tab_id else {
            debug!("Menu click without a target tab");
            return Ok(SendOutcome::Ignored);
        };

        let text = click.selection_text.as_deref().unwrap_or("").trim().to_string();
        if text.is_empty() {
            self.notifier.notify(NO_TEXT, Severity::Info).await;
            return Ok(SendOutcome::NoSelection);
        }

        let page_url = match click.page_url {
            Some(url) => url,
            None => self.tabs.url(tab_id).await.unwrap_or_default(),
        };

        info!(
            "Sending {} chars from tab {} ({} mode)",
            text.len(),
            tab_id,
            self.config.extension.mode
        );
        match self.config.extension.mode {
            PipelineMode::Token => self.send_with_token(tab_id, &page_url, text).await,
            PipelineMode::Phone => self.send_with_phone(tab_id, text).await,
        }
    }

    async fn send_with_token(
        &self,
        tab_id: TabId,
        page_url: &str,
        text: String,
    ) -> Result<SendOutcome> {
        let Some(credential) = self.auth.valid_credential(Utc::now()).await? else {
            self.notifier.notify(CONNECT_FIRST, Severity::Info).await;
            return Ok(SendOutcome::NotLinked);
        };

        let messaging = self.config.sites.is_messaging_url(page_url);
        let context = if messaging {
            self.fetch_context(tab_id).await
        } else {
            None
        };

        let payload = OutboundPayload {
            text,
            page_url: page_url.to_string(),
            source_hint: if messaging {
                SourceHint::MessagingClient
            } else {
                SourceHint::Generic
            },
            context,
        };

        match self.api.send_message(&credential.token, &payload).await {
            Ok(_) => {
                self.notifier.notify(SENT, Severity::Info).await;
                Ok(SendOutcome::Sent)
            }
            Err(ApiError::Unauthorized { body }) => {
                warn!("Inbox rejected the credential: {}", body);
                self.auth.invalidate(Invalidation::Unauthorized).await?;
                self.notifier.notify(SESSION_EXPIRED, Severity::Error).await;
                Ok(SendOutcome::Unauthorized)
            }
            Err(e) => {
                error!("Failed to send selection: {}", e);
                self.notifier.notify(SEND_FAILED, Severity::Error).await;
                Ok(SendOutcome::Failed)
            }
        }
    }

    async fn send_with_phone(&self, tab_id: TabId, text: String) -> Result<SendOutcome> {
        let phone = match self.phone_from_tab(tab_id).await {
            Some(phone) => Some(phone),
            None => {
                info!("No phone on the page; prompting the user");
                self.prompt
                    .ask()
                    .await
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
            }
        };
        let Some(phone) = phone else {
            self.notifier.notify(NO_PHONE, Severity::Info).await;
            return Ok(SendOutcome::NoPhone);
        };

        let order = PhoneOrder {
            phone,
            body_text: text,
        };
        match self.api.send_order(&order).await {
            Ok(_) => {
                self.notifier.notify(ORDER_SENT, Severity::Info).await;
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                error!("Failed to send order: {}", e);
                self.notifier.notify(SEND_FAILED, Severity::Error).await;
                Ok(SendOutcome::Failed)
            }
        }
    }

    /// Context is optional: any failure here sends without it.
    async fn fetch_context(&self, tab_id: TabId) -> Option<ExtractedContext> {
        match self.tabs.send(tab_id, Envelope::RequestContext).await {
            Ok(Some(Envelope::ContextResult { payload })) if !payload.is_empty() => Some(payload),
            Ok(Some(Envelope::ContextResult { .. })) => {
                warn!("Tab {} returned an empty context", tab_id);
                None
            }
            Ok(Some(other)) => {
                warn!("Tab {} answered context request with '{}'", tab_id, other.tag());
                None
            }
            Ok(None) => {
                warn!("Tab {} did not answer the context request", tab_id);
                None
            }
            Err(e) => {
                warn!("Could not get context from tab {}: {:#}", tab_id, e);
                None
            }
        }
    }

    async fn phone_from_tab(&self, tab_id: TabId) -> Option<String> {
        match self.tabs.send(tab_id, Envelope::GetPhone).await {
            Ok(Some(Envelope::PhoneResult { phone })) => phone
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            Ok(_) => None,
            Err(e) => {
                debug!("No phone from tab {}: {:#}", tab_id, e);
                None
            }
        }
    }

    /// `chrome.runtime.onMessage` for the background: untyped input, strict parse.
    pub async fn on_raw_message(&self, value: Value) {
        match Envelope::parse(value) {
            Ok(envelope) => self.on_runtime_message(envelope).await,
            Err(e) => warn!("Rejected runtime message: {}", e),
        }
    }

    pub async fn on_runtime_message(&self, envelope: Envelope) {
        match envelope {
            Envelope::StoreCredential { payload } => {
                if let Err(e) = self.auth.link(&payload).await {
                    error!("Failed to store credential: {:#}", e);
                    self.notifier.notify(LINK_FAILED, Severity::Error).await;
                }
            }
            Envelope::PhonePromptResult { phone } => {
                if !self.prompt.deliver(phone) {
                    debug!("Phone prompt result with no prompt open");
                }
            }
            Envelope::Notify { message, severity } => {
                self.notifier.notify(&message, severity).await;
            }
            other @ (Envelope::RequestContext
            | Envelope::GetPhone
            | Envelope::ContextResult { .. }
            | Envelope::PhoneResult { .. }) => {
                warn!("Background does not handle '{}' messages", other.tag());
            }
        }
    }
}
