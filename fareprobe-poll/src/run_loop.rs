//! The per-iteration pipeline and the loop that repeats it.
use crate::acquisition::AcquisitionStateMachine;
use crate::interceptor::ResponseInterceptor;
use crate::sampler::GeoSampler;
use fareprobe_common::persistence::RouteSink;
use fareprobe_common::{Result, RouteResult};
use fareprobe_drivers::browser::{BrowserPage, PageLauncher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause applied after failed iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub succeeded: u64,
    pub failed: u64,
}

pub struct RunLoop {
    launcher: Arc<dyn PageLauncher>,
    sampler: GeoSampler,
    acquisition: AcquisitionStateMachine,
    interceptor: ResponseInterceptor,
    routes: Arc<dyn RouteSink>,
    backoff: Backoff,
}

impl RunLoop {
    pub fn new(
        launcher: Arc<dyn PageLauncher>,
        sampler: GeoSampler,
        acquisition: AcquisitionStateMachine,
        interceptor: ResponseInterceptor,
        routes: Arc<dyn RouteSink>,
    ) -> Self {
        Self {
            launcher,
            sampler,
            acquisition,
            interceptor,
            routes,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// One full iteration on a fresh page. The page is closed whatever the outcome.
    pub async fn run_iteration(&self) -> Result<RouteResult> {
        let page = self.launcher.open_page().await?;
        let outcome = self.probe(&*page).await;
        if let Err(err) = page.close().await {
            warn!(error = %err, "run_loop.page_close_failed");
        }
        outcome
    }

    async fn probe(&self, page: &dyn BrowserPage) -> Result<RouteResult> {
        let route = self.sampler.sample().await?;

        match page.subscribe_responses() {
            Some(responses) => {
                self.interceptor.attach(responses, &route);
            }
            None => warn!("run_loop.no_response_stream"),
        }

        let prices = self
            .acquisition
            .acquire(
                page,
                &route.pickup.display_text(),
                &route.destination.display_text(),
            )
            .await?;

        let result = RouteResult::new(&route, prices);
        if let Err(err) = self.routes.insert_route(result.clone()).await {
            error!(error = %err, pickup = %result.pickup_id, "run_loop.route_dropped");
        }
        Ok(result)
    }

    /// Repeat iterations until `cancel` fires.
    ///
    /// An iteration already in flight is allowed to finish; cancellation is
    /// observed between iterations and during back-off pauses.
    pub async fn run_forever(&self, cancel: CancellationToken) -> RunStats {
        let mut stats = RunStats::default();
        let mut pause = self.backoff.initial;

        while !cancel.is_cancelled() {
            match self.run_iteration().await {
                Ok(result) => {
                    stats.succeeded += 1;
                    pause = self.backoff.initial;
                    info!(
                        pickup = %result.pickup_id,
                        destination = %result.destination_id,
                        quotes = result.prices.len(),
                        iteration = stats.succeeded + stats.failed,
                        "run_loop.iteration_complete"
                    );
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(error = %err, retry_in = ?pause, "run_loop.iteration_failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                    pause = (pause * 2).min(self.backoff.max);
                }
            }
        }

        info!(succeeded = stats.succeeded, failed = stats.failed, "run_loop.stopped");
        stats
    }
}
