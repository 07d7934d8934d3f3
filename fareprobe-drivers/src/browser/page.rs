use crate::browser::{tap::ResponseTap, tap::TAP_SCRIPT, BrowserPage, ResponseStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::{elements::Element, key::Key, Client, Locator};
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

const VISIBILITY_POLL: Duration = Duration::from_millis(200);

/// Ctrl+A, release modifiers, Backspace. Sent as real key events so
/// script-controlled inputs see the edit.
fn select_all_and_delete() -> String {
    [
        char::from(Key::Control),
        'a',
        char::from(Key::Null),
        char::from(Key::Backspace),
    ]
    .iter()
    .collect()
}

const DOCUMENT_HEIGHT_SCRIPT: &str = r#"
    return Math.max(
        document.body ? document.body.scrollHeight : 0,
        document.documentElement ? document.documentElement.scrollHeight : 0
    );
"#;

/// WebDriver-backed page: form helpers, visibility waits, screenshots and
/// the response tap.
pub struct ProbePage {
    pub(crate) client: Client,
    tap: ResponseTap,
}

impl ProbePage {
    /// Wrap a session and start draining its response tap.
    pub fn new(client: Client, response_poll: Duration) -> Self {
        let tap = ResponseTap::start(client.clone(), response_poll);
        Self { client, tap }
    }

    async fn find(&self, selector: &str) -> Result<Element> {
        self.client
            .find(Locator::Css(selector))
            .await
            .with_context(|| format!("no element matches `{selector}`"))
    }

    async fn any_displayed(&self, selector: &str) -> bool {
        let Ok(elements) = self.client.find_all(Locator::Css(selector)).await else {
            return false;
        };
        for element in elements {
            if element.is_displayed().await.unwrap_or(false) {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl BrowserPage for ProbePage {
    /// Navigate to `url` and install the response tap.
    async fn goto(&self, url: &str) -> Result<()> {
        self.client
            .goto(url)
            .await
            .with_context(|| format!("navigation to {url} failed"))?;
        self.client.execute(TAP_SCRIPT, vec![]).await?;
        info!(target: "browser.page", %url, "navigated");
        Ok(())
    }

    /// Focus the field and delete its contents through the keyboard.
    ///
    /// `Element::clear` only resets the DOM value, which framework-managed
    /// inputs restore on the next render.
    async fn clear(&self, selector: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.click().await?;
        element.send_keys(&select_all_and_delete()).await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<()> {
        let element = self.find(selector).await?;
        element.send_keys(&char::from(Key::Enter).to_string()).await?;
        Ok(())
    }

    async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.any_displayed(selector).await {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                debug!(target: "browser.page", %selector, ?timeout, "element never became visible");
                return Ok(false);
            }
            sleep(VISIBILITY_POLL).await;
        }
    }

    /// Grow the window to the document height for the capture, then restore it.
    async fn screenshot(&self, path: &Path) -> Result<()> {
        let (width, height) = self.client.get_window_size().await?;
        let document_height = self
            .client
            .execute(DOCUMENT_HEIGHT_SCRIPT, vec![])
            .await?
            .as_u64()
            .unwrap_or(height);

        let grow = document_height > height;
        if grow {
            self.client
                .set_window_size(width as u32, document_height as u32)
                .await?;
        }
        let png = self.client.screenshot().await;
        if grow {
            self.client
                .set_window_size(width as u32, height as u32)
                .await?;
        }
        let png = png?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, png)
            .await
            .with_context(|| format!("failed to write screenshot to {}", path.display()))?;
        Ok(())
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            out.push(element.text().await?);
        }
        Ok(out)
    }

    fn subscribe_responses(&self) -> Option<ResponseStream> {
        self.tap.take_stream()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.tap.stop().await;
        self.client.close().await?;
        Ok(())
    }
}
