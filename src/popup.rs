use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{AuthState, Invalidation};
use crate::storage::credential::Credential;

/// What the toolbar popup renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupView {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
}

/// Popup actions over the shared credential slot.
pub struct Popup {
    auth: Arc<AuthState>,
}

impl Popup {
    pub fn new(auth: Arc<AuthState>) -> Self {
        Self { auth }
    }

    pub async fn view(&self) -> Result<PopupView> {
        let stored = self.auth.stored().await?;
        Ok(PopupView {
            connected: stored.is_some(),
            supplier_id: stored.map(|c| c.supplier_id),
        })
    }

    /// "Connect Account": write a credential directly.
    pub async fn connect(&self, credential: &Credential) -> Result<PopupView> {
        self.auth.link(credential).await?;
        self.view().await
    }

    /// "Unlink Account".
    pub async fn unlink(&self) -> Result<PopupView> {
        self.auth.invalidate(Invalidation::Logout).await?;
        self.view().await
    }
}
