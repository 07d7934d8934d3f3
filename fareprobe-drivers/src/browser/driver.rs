use crate::browser::{page::ProbePage, BrowserPage, PageLauncher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use webdriver::capabilities::Capabilities;

/// How to reach the WebDriver service and shape the browser window.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// e.g. `http://localhost:9515` for Chromedriver.
    pub webdriver_url: String,
    pub headless: bool,
    pub window: (u32, u32),
    /// How often the response tap is drained.
    pub response_poll: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            window: (1440, 900),
            response_poll: Duration::from_millis(250),
        }
    }
}

/// Construct Chrome command-line arguments for a session.
pub fn build_chrome_arguments(options: &DriverOptions) -> Vec<String> {
    let mut args = vec![
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--disable-extensions".to_string(),
        format!("--window-size={},{}", options.window.0, options.window.1),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args
}

/// Thin wrapper around a `fantoccini` WebDriver session.
pub struct ProbeDriver {
    pub client: Client,
    options: DriverOptions,
}

impl ProbeDriver {
    /// Open a new session on a running WebDriver service.
    pub async fn connect(options: DriverOptions) -> Result<Self> {
        let mut caps = Capabilities::new();
        let mut chrome_opts = HashMap::new();
        chrome_opts.insert("args".to_string(), json!(build_chrome_arguments(&options)));
        caps.insert("goog:chromeOptions".to_string(), json!(chrome_opts));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&options.webdriver_url)
            .await
            .with_context(|| format!("failed to open session on {}", options.webdriver_url))?;

        info!(
            target: "browser.driver",
            webdriver = %options.webdriver_url,
            headless = options.headless,
            "session opened"
        );

        Ok(Self { client, options })
    }

    /// Hand the session to a page; closing the page ends the session.
    pub fn into_page(self) -> ProbePage {
        ProbePage::new(self.client, self.options.response_poll)
    }
}

/// Opens one WebDriver session per page.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    options: DriverOptions,
}

impl WebDriverLauncher {
    pub fn new(options: DriverOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl PageLauncher for WebDriverLauncher {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        let driver = ProbeDriver::connect(self.options.clone()).await?;
        Ok(Box::new(driver.into_page()))
    }
}
