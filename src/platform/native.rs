//! Native host: browser events arrive as JSON lines on stdin and UI effects
//! leave as JSON lines on stdout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{Indicator, Notifier, Overlay, PhonePrompt, TabId};
use crate::dom::{Element, Page};
use crate::messages::{Envelope, Severity};
use crate::orchestrator::{Background, MenuClick, SEND_FAILED};
use crate::popup::{Popup, PopupView};
use crate::storage::credential::Credential;
use crate::tabs::TabRegistry;

const PROMPT_WIDTH: u32 = 360;
const PROMPT_HEIGHT: u32 = 220;

/// Events the browser side feeds in.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Installed,
    TabLoaded {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        document: Option<Element>,
    },
    TabClosed {
        tab_id: TabId,
    },
    MenuClicked(MenuClick),
    WindowMessage {
        tab_id: TabId,
        origin: String,
        data: Value,
    },
    RuntimeMessage {
        message: Value,
    },
    PhonePromptResult {
        #[serde(default)]
        phone: Option<String>,
    },
    PhonePromptClosed,
    PopupConnect {
        credential: Credential,
    },
    PopupUnlink,
    PopupStatus,
}

/// Effects the browser side should render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostOutput {
    Notification { message: String, severity: Severity },
    Badge { text: String },
    OpenPhonePrompt { width: u32, height: u32 },
    ClosePhonePrompt,
    Toast { tab_id: TabId, toast_id: u64, text: String },
    RemoveToast { tab_id: TabId, toast_id: u64 },
    Popup(PopupView),
}

pub type OutputSender = mpsc::UnboundedSender<HostOutput>;

fn emit(output: &OutputSender, event: HostOutput) {
    if output.send(event).is_err() {
        warn!("Host output closed; dropping event");
    }
}

pub struct HostNotifier {
    output: OutputSender,
}

impl HostNotifier {
    pub fn new(output: OutputSender) -> Self {
        Self { output }
    }
}

#[async_trait]
impl Notifier for HostNotifier {
    async fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!("[Extension] {}", message),
            Severity::Error => error!("[Extension] {}", message),
        }
        emit(
            &self.output,
            HostOutput::Notification {
                message: message.to_string(),
                severity,
            },
        );
    }
}

/// Toolbar badge: "ON" while linked.
pub struct Badge {
    connected: AtomicBool,
    output: OutputSender,
}

impl Badge {
    pub fn new(output: OutputSender) -> Self {
        Self {
            connected: AtomicBool::new(false),
            output,
        }
    }
}

impl Indicator for Badge {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let text = if connected { "ON" } else { "" };
        emit(&self.output, HostOutput::Badge { text: text.to_string() });
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Opens a small popup window and waits for its result message.
pub struct WindowPhonePrompt {
    pending: Mutex<Option<oneshot::Sender<Option<String>>>>,
    output: OutputSender,
}

impl WindowPhonePrompt {
    pub fn new(output: OutputSender) -> Self {
        Self {
            pending: Mutex::new(None),
            output,
        }
    }
}

#[async_trait]
impl PhonePrompt for WindowPhonePrompt {
    async fn ask(&self) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(tx);
        if let Some(previous) = previous {
            // A newer prompt supersedes the old one.
            let _ = previous.send(None);
        }

        emit(
            &self.output,
            HostOutput::OpenPhonePrompt {
                width: PROMPT_WIDTH,
                height: PROMPT_HEIGHT,
            },
        );
        let phone = rx.await.unwrap_or(None);
        emit(&self.output, HostOutput::ClosePhonePrompt);

        phone
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
    }

    fn deliver(&self, phone: Option<String>) -> bool {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match pending {
            Some(tx) => tx.send(phone).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub tab_id: TabId,
    pub text: String,
}

/// Fixed-position toasts that remove themselves.
pub struct PageOverlay {
    next_id: AtomicU64,
    visible: Arc<Mutex<Vec<Toast>>>,
    output: OutputSender,
}

impl PageOverlay {
    pub fn new(output: OutputSender) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            visible: Arc::new(Mutex::new(Vec::new())),
            output,
        }
    }

    #[cfg(test)]
    pub fn visible(&self) -> Vec<Toast> {
        self.visible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Overlay for PageOverlay {
    fn show_toast(&self, tab_id: TabId, text: &str, duration: Duration) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.visible
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Toast {
                id,
                tab_id,
                text: text.to_string(),
            });
        emit(
            &self.output,
            HostOutput::Toast {
                tab_id,
                toast_id: id,
                text: text.to_string(),
            },
        );

        let visible = self.visible.clone();
        let output = self.output.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let removed = {
                let mut visible = visible.lock().unwrap_or_else(|e| e.into_inner());
                visible
                    .iter()
                    .position(|t| t.id == id)
                    .map(|i| visible.remove(i))
            };
            if let Some(toast) = removed {
                debug!("Toast {} left tab {}: '{}'", toast.id, toast.tab_id, toast.text);
                emit(
                    &output,
                    HostOutput::RemoveToast {
                        tab_id: toast.tab_id,
                        toast_id: toast.id,
                    },
                );
            }
        });
    }
}

/// Serialize outputs to `writer`, one JSON object per line.
///
/// Once `closing` fires (or its sender is dropped) no new output is accepted,
/// everything already queued is still written, and the function returns.
pub async fn write_outputs<W>(
    mut rx: mpsc::UnboundedReceiver<HostOutput>,
    mut writer: W,
    mut closing: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut draining = false;
    loop {
        let next = tokio::select! {
            next = rx.recv() => next,
            _ = &mut closing, if !draining => {
                draining = true;
                rx.close();
                continue;
            }
        };
        let Some(event) = next else {
            break;
        };
        let mut line = serde_json::to_string(&event).context("Failed to encode host output")?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write host output")?;
        writer.flush().await?;
    }
    Ok(())
}

/// Drive the extension from host events until `input` ends.
pub async fn run<R>(
    background: Arc<Background>,
    tabs: Arc<TabRegistry>,
    popup: Popup,
    mut runtime: mpsc::Receiver<Envelope>,
    output: OutputSender,
    input: R,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    // Messages content scripts send to the background.
    let runtime_background = background.clone();
    tokio::spawn(async move {
        while let Some(envelope) = runtime.recv().await {
            runtime_background.on_runtime_message(envelope).await;
        }
    });

    let mut sends = JoinSet::new();
    let mut lines = input.lines();

    loop {
        tokio::select! {
            Some(joined) = sends.join_next(), if !sends.is_empty() => {
                report_join(&background, joined).await;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read host input")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let Some(event) = parse_event(&line) else {
                    continue;
                };
                handle_event(&background, &tabs, &popup, &output, &mut sends, event).await;
            }
        }
    }

    while let Some(joined) = sends.join_next().await {
        report_join(&background, joined).await;
    }
    info!("Host input closed");
    Ok(())
}

/// Just enough of a `tab_loaded` event to install a content script.
#[derive(Deserialize)]
struct TabLoadedHeader {
    event: String,
    tab_id: TabId,
    url: String,
}

/// Parse one input line. A `tab_loaded` whose document nests deeper than
/// the JSON parser's recursion limit (about 60 elements) still loads the
/// tab, without a document.
fn parse_event(line: &str) -> Option<HostEvent> {
    let err = match serde_json::from_str(line) {
        Ok(event) => return Some(event),
        Err(e) => e,
    };
    match serde_json::from_str::<TabLoadedHeader>(line) {
        Ok(header) if header.event == "tab_loaded" => {
            warn!(
                "Tab {} capture is unreadable ({}); loading it without a document",
                header.tab_id, err
            );
            Some(HostEvent::TabLoaded {
                tab_id: header.tab_id,
                url: header.url,
                document: None,
            })
        }
        _ => {
            warn!("Ignoring unreadable host event: {}", err);
            None
        }
    }
}

async fn report_join(
    background: &Background,
    joined: Result<crate::orchestrator::SendOutcome, tokio::task::JoinError>,
) {
    match joined {
        Ok(outcome) => info!("Send finished: {:?}", outcome),
        Err(e) => {
            error!("Send task aborted: {}", e);
            background
                .notifier()
                .notify(SEND_FAILED, Severity::Error)
                .await;
        }
    }
}

async fn handle_event(
    background: &Arc<Background>,
    tabs: &TabRegistry,
    popup: &Popup,
    output: &OutputSender,
    sends: &mut JoinSet<crate::orchestrator::SendOutcome>,
    event: HostEvent,
) {
    match event {
        HostEvent::Installed => background.on_installed(),
        HostEvent::TabLoaded {
            tab_id,
            url,
            document,
        } => {
            if let Err(e) = tabs.load(tab_id, Page { url, document }).await {
                warn!("{:#}", e);
            }
        }
        HostEvent::TabClosed { tab_id } => {
            tabs.close(tab_id).await;
        }
        HostEvent::MenuClicked(click) => {
            // The prompt may suspend this send until a later event answers it.
            let background = background.clone();
            sends.spawn(async move { background.on_menu_clicked(click).await });
        }
        HostEvent::WindowMessage {
            tab_id,
            origin,
            data,
        } => {
            tabs.post_window_message(tab_id, &origin, data).await;
        }
        HostEvent::RuntimeMessage { message } => background.on_raw_message(message).await,
        HostEvent::PhonePromptResult { phone } => {
            background
                .on_runtime_message(Envelope::PhonePromptResult { phone })
                .await
        }
        HostEvent::PhonePromptClosed => {
            background
                .on_runtime_message(Envelope::PhonePromptResult { phone: None })
                .await
        }
        HostEvent::PopupConnect { credential } => match popup.connect(&credential).await {
            Ok(view) => emit(output, HostOutput::Popup(view)),
            Err(e) => {
                error!("Popup connect failed: {:#}", e);
                emit_view(output, popup.view().await);
            }
        },
        HostEvent::PopupUnlink => emit_view(output, popup.unlink().await),
        HostEvent::PopupStatus => emit_view(output, popup.view().await),
    }
}

fn emit_view(output: &OutputSender, view: Result<PopupView>) {
    match view {
        Ok(view) => emit(output, HostOutput::Popup(view)),
        Err(e) => error!("Popup action failed: {:#}", e),
    }
}
