//! Browser capability seams.
//!
//! The acquisition state machine and the response interceptor only see these
//! traits, so they can be exercised against scripted pages in tests.

pub mod driver;
pub mod page;
pub mod tap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

/// A network response observed on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResponse {
    pub url: String,
    #[serde(default)]
    pub status: Option<u16>,
    pub body: String,
}

/// Stream of responses seen on one page. Ends when the page closes.
pub type ResponseStream = mpsc::UnboundedReceiver<ObservedResponse>;

/// One open page/tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Drop the current value of an input (select-all equivalent).
    async fn clear(&self, selector: &str) -> Result<()>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    async fn press_enter(&self, selector: &str) -> Result<()>;

    /// Wait until an element matching `selector` is displayed.
    ///
    /// `Ok(false)` means the timeout elapsed first.
    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<bool>;

    /// Write a full-page PNG to `path`, replacing any previous file.
    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Text content of every element matching `selector`, in document order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    /// Take the page's response stream. Only the first caller gets it.
    /// The stream follows the page across full document loads.
    fn subscribe_responses(&self) -> Option<ResponseStream>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Source of fresh pages, one per iteration.
#[async_trait]
pub trait PageLauncher: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>>;
}
