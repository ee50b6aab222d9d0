//! Content-script responder installed on the messaging client's tabs.
//!
//! Requests arrive on a channel, each with its own oneshot for the reply. A
//! request the bridge does not answer simply drops its reply sender, which
//! the caller observes as "no reply".

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

use crate::dom::Page;
use crate::extractor;
use crate::messages::Envelope;

const QUEUE_DEPTH: usize = 16;

struct RelayRequest {
    message: Envelope,
    reply: oneshot::Sender<Envelope>,
}

/// Answer one request against the current page, or `None` to ignore it.
fn respond(page: &Page, message: &Envelope) -> Option<Envelope> {
    match message {
        Envelope::RequestContext => Some(Envelope::ContextResult {
            payload: extractor::extract_context(page, Utc::now()),
        }),
        Envelope::GetPhone => Some(Envelope::PhoneResult {
            phone: extractor::extract_phone(page),
        }),
        other => {
            debug!("Relay ignoring '{}' message", other.tag());
            None
        }
    }
}

/// Background-side handle to one tab's bridge.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayRequest>,
    page: Arc<RwLock<Page>>,
    reply_timeout: Duration,
}

impl RelayHandle {
    /// Start a bridge over `page`. The task ends when every handle is dropped.
    pub fn spawn(page: Page, reply_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<RelayRequest>(QUEUE_DEPTH);
        let page = Arc::new(RwLock::new(page));

        let task_page = page.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let answer = {
                    let page = task_page.read().await;
                    respond(&page, &request.message)
                };
                if let Some(answer) = answer {
                    if request.reply.send(answer).is_err() {
                        debug!("Relay reply dropped: requester went away");
                    }
                }
            }
            debug!("Relay bridge stopped");
        });

        Self {
            tx,
            page,
            reply_timeout,
        }
    }

    /// Swap in a fresh capture of the page (in-page navigation).
    pub async fn update_page(&self, page: Page) {
        *self.page.write().await = page;
    }

    /// Send `message` and wait for its reply. `Ok(None)` means the bridge
    /// chose not to answer.
    pub async fn request(&self, message: Envelope) -> Result<Option<Envelope>> {
        let tag = message.tag();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RelayRequest { message, reply })
            .await
            .context("Relay bridge is not running")?;

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(answer)) => Ok(Some(answer)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                warn!("Relay did not answer '{}' within {:?}", tag, self.reply_timeout);
                anyhow::bail!("Timed out waiting for '{}' reply", tag)
            }
        }
    }
}
