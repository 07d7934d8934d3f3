//! In-page response recording.
//!
//! WebDriver has no response events, so after each navigation the page gets
//! a small script that wraps `fetch` and `XMLHttpRequest` and appends every
//! completed response to a page-global buffer. A background poller drains that
//! buffer into an unbounded channel. The script only observes; it never
//! touches the DOM. A drain that finds no tap (a full document load
//! replaced the window) reinstalls it.

use crate::browser::{ObservedResponse, ResponseStream};
use anyhow::Result;
use fantoccini::Client;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Installed after every navigation; idempotent per document.
pub const TAP_SCRIPT: &str = r#"
    if (!window.__fareprobeTap) {
        window.__fareprobeTap = true;
        window.__fareprobeResponses = window.__fareprobeResponses || [];
        const record = (url, status, body) => {
            window.__fareprobeResponses.push({ url: String(url), status: status, body: String(body) });
        };
        const originalFetch = window.fetch;
        if (originalFetch) {
            window.fetch = function (...args) {
                return originalFetch.apply(this, args).then((res) => {
                    res.clone().text().then((body) => record(res.url, res.status, body)).catch(() => {});
                    return res;
                });
            };
        }
        const originalOpen = XMLHttpRequest.prototype.open;
        XMLHttpRequest.prototype.open = function (method, url, ...rest) {
            this.addEventListener('load', () => {
                try { record(this.responseURL || url, this.status, this.responseText); } catch (e) {}
            });
            return originalOpen.call(this, method, url, ...rest);
        };
    }
"#;

/// Hands back everything recorded since the previous drain, or `null` when
/// the current document has no tap.
pub const DRAIN_SCRIPT: &str = r#"
    if (!window.__fareprobeTap) {
        return null;
    }
    const pending = window.__fareprobeResponses || [];
    window.__fareprobeResponses = [];
    return pending;
"#;

/// Poller state owned by a page.
pub struct ResponseTap {
    stop: CancellationToken,
    stream: Mutex<Option<ResponseStream>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseTap {
    /// Start draining `client` every `interval`.
    pub fn start(client: Client, interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let task = tokio::spawn(poll_responses(client, tx, interval, stop.clone()));
        Self {
            stop,
            stream: Mutex::new(Some(rx)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn take_stream(&self) -> Option<ResponseStream> {
        self.stream.lock().ok()?.take()
    }

    /// Stop polling after one final drain.
    pub async fn stop(&self) {
        self.stop.cancel();
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(target: "browser.tap", error = ?err, "response poller panicked");
            }
        }
    }
}

async fn poll_responses(
    client: Client,
    tx: mpsc::UnboundedSender<ObservedResponse>,
    interval: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                if let Err(err) = drain_into(&client, &tx).await {
                    debug!(target: "browser.tap", error = %err, "final drain failed");
                }
                break;
            }
            _ = tokio::time::sleep(interval) => {
                // Fails while a navigation is in flight; the next tick retries.
                if let Err(err) = drain_into(&client, &tx).await {
                    debug!(target: "browser.tap", error = %err, "drain skipped");
                }
                if tx.is_closed() {
                    break;
                }
            }
        }
    }
}

async fn drain_into(client: &Client, tx: &mpsc::UnboundedSender<ObservedResponse>) -> Result<usize> {
    let value = client.execute(DRAIN_SCRIPT, vec![]).await?;
    let Some(batch) = parse_batch(value)? else {
        client.execute(TAP_SCRIPT, vec![]).await?;
        debug!(target: "browser.tap", "tap reinstalled");
        return Ok(0);
    };
    let count = batch.len();
    for response in batch {
        if tx.send(response).is_err() {
            break;
        }
    }
    Ok(count)
}

/// `None` means the tap is missing from the current document.
fn parse_batch(value: serde_json::Value) -> Result<Option<Vec<ObservedResponse>>> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}
