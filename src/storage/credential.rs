use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ExtensionStorage;

/// Fixed storage key for the single credential slot.
pub const STORAGE_KEY: &str = "wady_extension_auth";

/// Proof of account linkage issued by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub supplier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Expiry as epoch milliseconds.
    pub expires_at: i64,
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now.timestamp_millis()
    }

    pub fn is_well_formed(&self) -> bool {
        !self.token.trim().is_empty() && !self.supplier_id.trim().is_empty()
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_well_formed() && !self.is_expired(now)
    }
}

impl ExtensionStorage {
    /// Load the stored credential. A slot holding unreadable JSON counts as absent.
    pub async fn load_credential(&self) -> Result<Option<Credential>> {
        let Some(raw) = self.get(STORAGE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Discarding unreadable stored credential: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_credential(&self, credential: &Credential) -> Result<()> {
        let raw = serde_json::to_string(credential).context("Failed to serialize credential")?;
        self.set(STORAGE_KEY, &raw).await
    }

    pub async fn clear_credential(&self) -> Result<bool> {
        self.remove(STORAGE_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn credential(token: &str, expires_at: i64) -> Credential {
        Credential {
            token: token.to_string(),
            supplier_id: "SUPPLIER-42".to_string(),
            user_id: None,
            expires_at,
        }
    }

    #[test]
    fn test_deserializes_dashboard_shape() {
        let json = r#"{"token":"abc","supplierId":"S-1","userId":"U-9","expiresAt":1900000000000}"#;
        let c: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(c.supplier_id, "S-1");
        assert_eq!(c.user_id.as_deref(), Some("U-9"));
        assert_eq!(c.expires_at, 1_900_000_000_000);
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        let future = (now + Duration::days(30)).timestamp_millis();
        let past = (now - Duration::seconds(1)).timestamp_millis();

        assert!(credential("abc", future).is_valid(now));
        assert!(!credential("abc", past).is_valid(now));
        assert!(!credential("  ", future).is_valid(now));
    }

    #[tokio::test]
    async fn test_write_replaces_previous_credential() {
        let storage = ExtensionStorage::open_in_memory().unwrap();
        storage.save_credential(&credential("old", 1)).await.unwrap();
        storage.save_credential(&credential("new", 2)).await.unwrap();

        let loaded = storage.load_credential().await.unwrap().unwrap();
        assert_eq!(loaded, credential("new", 2));
    }

    #[tokio::test]
    async fn test_read_after_clear_is_absent() {
        let storage = ExtensionStorage::open_in_memory().unwrap();
        storage.save_credential(&credential("abc", 1)).await.unwrap();
        assert!(storage.clear_credential().await.unwrap());
        assert_eq!(storage.load_credential().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_slot_reads_as_absent() {
        let storage = ExtensionStorage::open_in_memory().unwrap();
        storage.set(STORAGE_KEY, "not json").await.unwrap();
        assert_eq!(storage.load_credential().await.unwrap(), None);
    }
}
