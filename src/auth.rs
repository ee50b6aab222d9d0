use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::platform::Indicator;
use crate::storage::credential::Credential;
use crate::storage::ExtensionStorage;

/// Why a credential was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Logout,
    Unauthorized,
    Expired,
    Malformed,
}

impl std::fmt::Display for Invalidation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invalidation::Logout => write!(f, "logout"),
            Invalidation::Unauthorized => write!(f, "unauthorized response"),
            Invalidation::Expired => write!(f, "expired"),
            Invalidation::Malformed => write!(f, "malformed"),
        }
    }
}

/// The single credential slot and the badge that mirrors it.
///
/// Every mutation holds `version` while it writes storage and flips the
/// indicator, so readers never see one without the other.
pub struct AuthState {
    storage: ExtensionStorage,
    indicator: Arc<dyn Indicator>,
    version: Mutex<u64>,
}

impl AuthState {
    pub fn new(storage: ExtensionStorage, indicator: Arc<dyn Indicator>) -> Self {
        Self {
            storage,
            indicator,
            version: Mutex::new(0),
        }
    }

    /// Bring the indicator in line with what is stored (startup).
    pub async fn restore(&self) -> Result<Option<Credential>> {
        let _guard = self.version.lock().await;
        let stored = self.storage.load_credential().await?;
        self.indicator.set_connected(stored.is_some());
        Ok(stored)
    }

    #[cfg(test)]
    pub async fn version(&self) -> u64 {
        *self.version.lock().await
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.indicator.is_connected()
    }

    /// Whatever is stored, valid or not.
    pub async fn stored(&self) -> Result<Option<Credential>> {
        let _guard = self.version.lock().await;
        self.storage.load_credential().await
    }

    /// The stored credential if it is usable at `now`. An expired or
    /// malformed one is cleared on the way out.
    pub async fn valid_credential(&self, now: DateTime<Utc>) -> Result<Option<Credential>> {
        let mut version = self.version.lock().await;
        let Some(credential) = self.storage.load_credential().await? else {
            return Ok(None);
        };
        if credential.is_valid(now) {
            return Ok(Some(credential));
        }

        let reason = if credential.is_well_formed() {
            Invalidation::Expired
        } else {
            Invalidation::Malformed
        };
        warn!(
            "Stored credential for supplier '{}' is unusable ({})",
            credential.supplier_id, reason
        );
        self.storage.clear_credential().await?;
        self.indicator.set_connected(false);
        *version += 1;
        Ok(None)
    }

    /// Store `credential`, replacing any previous one, and show as connected.
    /// A credential that is already unusable is refused and nothing changes.
    pub async fn link(&self, credential: &Credential) -> Result<u64> {
        let mut version = self.version.lock().await;
        if !credential.is_valid(Utc::now()) {
            let reason = if credential.is_well_formed() {
                Invalidation::Expired
            } else {
                Invalidation::Malformed
            };
            warn!(
                "Refusing to link supplier '{}': credential is {}",
                credential.supplier_id, reason
            );
            anyhow::bail!("Cannot link a credential that is {}", reason);
        }
        self.storage.save_credential(credential).await?;
        self.indicator.set_connected(true);
        *version += 1;
        info!(
            "Linked supplier '{}' (credential v{})",
            credential.supplier_id, *version
        );
        Ok(*version)
    }

    /// Drop the credential and clear the indicator together.
    pub async fn invalidate(&self, reason: Invalidation) -> Result<u64> {
        let mut version = self.version.lock().await;
        let removed = self.storage.clear_credential().await?;
        self.indicator.set_connected(false);
        *version += 1;
        info!(
            "Credential cleared ({}), had credential: {} (v{})",
            reason, removed, *version
        );
        Ok(*version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::FlagIndicator;
    use chrono::Duration;

    fn credential(token: &str, expires_at: i64) -> Credential {
        Credential {
            token: token.to_string(),
            supplier_id: "SUPPLIER-7".to_string(),
            user_id: Some("user-1".to_string()),
            expires_at,
        }
    }

    fn auth() -> (AuthState, Arc<FlagIndicator>) {
        let indicator = Arc::new(FlagIndicator::default());
        let storage = ExtensionStorage::open_in_memory().unwrap();
        (AuthState::new(storage, indicator.clone()), indicator)
    }

    #[tokio::test]
    async fn test_link_sets_indicator_and_bumps_version() {
        let (auth, indicator) = auth();
        let far = (Utc::now() + Duration::days(30)).timestamp_millis();

        assert_eq!(auth.link(&credential("a", far)).await.unwrap(), 1);
        assert_eq!(auth.link(&credential("b", far)).await.unwrap(), 2);
        assert!(indicator.is_connected());

        let current = auth.valid_credential(Utc::now()).await.unwrap().unwrap();
        assert_eq!(current.token, "b");
    }

    #[tokio::test]
    async fn test_invalidate_clears_both() {
        let (auth, indicator) = auth();
        let far = (Utc::now() + Duration::days(30)).timestamp_millis();
        auth.link(&credential("a", far)).await.unwrap();

        auth.invalidate(Invalidation::Unauthorized).await.unwrap();
        assert!(!indicator.is_connected());
        assert_eq!(auth.stored().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_when_absent_still_clears_indicator() {
        let (auth, indicator) = auth();
        indicator.set_connected(true);
        auth.invalidate(Invalidation::Unauthorized).await.unwrap();
        assert!(!indicator.is_connected());
        assert_eq!(auth.stored().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_credential_is_cleared_on_read() {
        let (auth, indicator) = auth();
        let past = (Utc::now() - Duration::minutes(1)).timestamp_millis();
        auth.storage.save_credential(&credential("a", past)).await.unwrap();
        auth.restore().await.unwrap();
        assert!(indicator.is_connected());

        assert_eq!(auth.valid_credential(Utc::now()).await.unwrap(), None);
        assert_eq!(auth.stored().await.unwrap(), None);
        assert!(!indicator.is_connected());
        assert_eq!(auth.version().await, 1);
    }

    #[tokio::test]
    async fn test_link_refuses_unusable_credential() {
        let (auth, indicator) = auth();
        let past = (Utc::now() - Duration::minutes(1)).timestamp_millis();
        let far = (Utc::now() + Duration::days(30)).timestamp_millis();

        assert!(auth.link(&credential("a", past)).await.is_err());
        assert!(auth.link(&credential("   ", far)).await.is_err());
        assert!(!indicator.is_connected());
        assert_eq!(auth.stored().await.unwrap(), None);
        assert_eq!(auth.version().await, 0);

        // A refused link leaves an earlier good credential in place.
        auth.link(&credential("good", far)).await.unwrap();
        assert!(auth.link(&credential("bad", past)).await.is_err());
        assert_eq!(auth.stored().await.unwrap().unwrap().token, "good");
        assert!(indicator.is_connected());
    }

    #[tokio::test]
    async fn test_restore_mirrors_storage() {
        let indicator = Arc::new(FlagIndicator::default());
        let storage = ExtensionStorage::open_in_memory().unwrap();
        storage.save_credential(&credential("a", 1)).await.unwrap();

        let auth = AuthState::new(storage, indicator.clone());
        assert!(auth.restore().await.unwrap().is_some());
        assert!(indicator.is_connected());
    }
}
