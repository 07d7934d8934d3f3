//! Browser-driven price acquisition for one route.
//!
//! The flow is an explicit state machine:
//!
//! ```text
//! Init -> FormFilled{n} -> AwaitingResults{n} -> Resolved -> Extracted
//!                                   \-> RetryableTimeout{n} -> FormFilled{n+1}
//!                                                           \-> Failed (n+1 == max_attempts)
//! ```
//!
//! Fields are always filled pickup first, destination second, each with a
//! settle delay before and after typing.
use fareprobe_common::{PriceQuote, ProbeError, Result};
use fareprobe_config::AcquisitionConfig;
use fareprobe_drivers::browser::BrowserPage;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub estimate_url: String,
    pub pickup_selector: String,
    pub destination_selector: String,
    pub result_selector: String,
    pub settle_delay: Duration,
    pub max_attempts: u32,
    pub screenshot_path: PathBuf,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::from(&AcquisitionConfig::default())
    }
}

impl From<&AcquisitionConfig> for AcquisitionSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            estimate_url: config.estimate_url.clone(),
            pickup_selector: config.pickup_selector.clone(),
            destination_selector: config.destination_selector.clone(),
            result_selector: config.result_selector.clone(),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            max_attempts: config.max_attempts,
            screenshot_path: config.screenshot_path.clone(),
        }
    }
}

impl AcquisitionSettings {
    /// How long to wait for the result marker after both fields are filled.
    pub fn result_timeout(&self) -> Duration {
        self.settle_delay * 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionState {
    Init,
    FormFilled { attempt: u32 },
    AwaitingResults { attempt: u32 },
    RetryableTimeout { attempt: u32 },
    Resolved { attempt: u32 },
    Extracted(Vec<PriceQuote>),
    Failed { attempts: u32 },
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::FormFilled { attempt } => write!(f, "form_filled({attempt})"),
            Self::AwaitingResults { attempt } => write!(f, "awaiting_results({attempt})"),
            Self::RetryableTimeout { attempt } => write!(f, "retryable_timeout({attempt})"),
            Self::Resolved { attempt } => write!(f, "resolved({attempt})"),
            Self::Extracted(quotes) => write!(f, "extracted({})", quotes.len()),
            Self::Failed { attempts } => write!(f, "failed({attempts})"),
        }
    }
}

/// Drives one page through the estimate form.
#[derive(Debug, Clone)]
pub struct AcquisitionStateMachine {
    settings: AcquisitionSettings,
}

impl AcquisitionStateMachine {
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self { settings }
    }

    /// Fill the form for `pickup`/`destination` and scrape the rendered prices.
    ///
    /// Returns [`ProbeError::MaxRetriesExceeded`] when the results never
    /// render, and [`ProbeError::Driver`] when the page itself fails.
    pub async fn acquire(
        &self,
        page: &dyn BrowserPage,
        pickup: &str,
        destination: &str,
    ) -> Result<Vec<PriceQuote>> {
        let mut state = AcquisitionState::Init;
        loop {
            debug!(state = %state, "acquisition.state");
            state = match state {
                AcquisitionState::Init => {
                    page.goto(&self.settings.estimate_url).await?;
                    self.fill_form(page, pickup, destination).await?;
                    AcquisitionState::FormFilled { attempt: 0 }
                }
                AcquisitionState::FormFilled { attempt } => {
                    AcquisitionState::AwaitingResults { attempt }
                }
                AcquisitionState::AwaitingResults { attempt } => {
                    let timeout = self.settings.result_timeout();
                    match page
                        .wait_for_visible(&self.settings.result_selector, timeout)
                        .await
                    {
                        Ok(true) => AcquisitionState::Resolved { attempt },
                        Ok(false) => {
                            let reason = ProbeError::ResultTimeout {
                                waited_ms: timeout.as_millis() as u64,
                            };
                            warn!(attempt, error = %reason, "acquisition.results_not_visible");
                            AcquisitionState::RetryableTimeout { attempt }
                        }
                        Err(err) => {
                            warn!(attempt, error = %err, "acquisition.wait_failed");
                            AcquisitionState::RetryableTimeout { attempt }
                        }
                    }
                }
                AcquisitionState::RetryableTimeout { attempt } => {
                    let attempts = attempt + 1;
                    if attempts >= self.settings.max_attempts {
                        AcquisitionState::Failed { attempts }
                    } else {
                        self.fill_form(page, pickup, destination).await?;
                        AcquisitionState::FormFilled { attempt: attempts }
                    }
                }
                AcquisitionState::Resolved { attempt } => {
                    self.capture_screenshot(page).await;
                    let quotes = self.extract(page).await?;
                    info!(attempt, quotes = quotes.len(), "acquisition.resolved");
                    AcquisitionState::Extracted(quotes)
                }
                AcquisitionState::Extracted(quotes) => return Ok(quotes),
                AcquisitionState::Failed { attempts } => {
                    warn!(attempts, "acquisition.max_retries_exceeded");
                    return Err(ProbeError::MaxRetriesExceeded { attempts });
                }
            };
        }
    }

    async fn fill_form(&self, page: &dyn BrowserPage, pickup: &str, destination: &str) -> Result<()> {
        self.fill_field(page, &self.settings.pickup_selector, pickup)
            .await?;
        self.fill_field(page, &self.settings.destination_selector, destination)
            .await
    }

    async fn fill_field(&self, page: &dyn BrowserPage, selector: &str, text: &str) -> Result<()> {
        sleep(self.settings.settle_delay).await;
        page.clear(selector).await?;
        page.type_text(selector, text).await?;
        sleep(self.settings.settle_delay).await;
        page.press_enter(selector).await?;
        debug!(selector, text, "acquisition.field_filled");
        Ok(())
    }

    async fn capture_screenshot(&self, page: &dyn BrowserPage) {
        let path = &self.settings.screenshot_path;
        if let Err(err) = page.screenshot(path).await {
            warn!(path = %path.display(), error = %err, "acquisition.screenshot_failed");
        }
    }

    async fn extract(&self, page: &dyn BrowserPage) -> Result<Vec<PriceQuote>> {
        let texts = page.texts(&self.settings.result_selector).await?;
        Ok(texts.iter().filter_map(|t| PriceQuote::parse(t)).collect())
    }
}
