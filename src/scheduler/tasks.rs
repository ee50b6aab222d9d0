use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::AuthState;
use crate::scheduler::Scheduler;

/// Register the heartbeat and the credential-expiry sweep.
pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    auth: Arc<AuthState>,
) -> anyhow::Result<()> {
    scheduler
        .every("0 0 * * * *", "heartbeat", || {
            Box::pin(async {
                info!("Heartbeat: extension background is alive");
            })
        })
        .await?;

    // Clear a credential as soon as it lapses so the badge does not lie.
    scheduler
        .every("0 * * * * *", "credential-expiry", move || {
            let auth = auth.clone();
            Box::pin(async move {
                if let Err(e) = sweep_expired(&auth).await {
                    warn!("Credential expiry sweep failed: {:#}", e);
                }
            })
        })
        .await?;

    Ok(())
}

async fn sweep_expired(auth: &AuthState) -> anyhow::Result<()> {
    auth.valid_credential(Utc::now()).await?;
    Ok(())
}
