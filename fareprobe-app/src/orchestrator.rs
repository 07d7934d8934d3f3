use anyhow::{Context, Result};
use fareprobe_actors::{
    actor::{ActorHandle, spawn_actor_with_shutdown},
    store::{SqliteCorpus, StoreActor, ensure_schema},
    system::ActorSystem,
};
use fareprobe_config::ProbeConfig;
use fareprobe_drivers::browser::driver::{DriverOptions, WebDriverLauncher};
use fareprobe_poll::{
    AcquisitionSettings, AcquisitionStateMachine, GeoSampler, ResponseInterceptor, RunLoop,
    SamplerSettings,
};
use fareprobe_runtime::ProbeHandle;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const STORE_MAILBOX: usize = 1024;

/// Owns startup, the run loop and shutdown for one poller process.
pub struct Orchestrator {
    cfg: ProbeConfig,
}

impl Orchestrator {
    pub fn new(cfg: ProbeConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(self, handle: ProbeHandle) -> Result<()> {
        let cfg = self.cfg;

        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.store.max_connections)
            .connect(&cfg.store.url)
            .await
            .with_context(|| format!("failed to open store at {}", cfg.store.url))?;
        ensure_schema(&pool, &cfg.store.address_table).await?;

        let mut system = ActorSystem::new();
        let ActorHandle { addr: store, task } = spawn_actor_with_shutdown(
            StoreActor::new(pool.clone()),
            STORE_MAILBOX,
            Some(system.shutdown_notifier()),
        );
        system.track(async move {
            task.await??;
            Ok(())
        });
        let store = Arc::new(store);

        let corpus = Arc::new(SqliteCorpus::new(pool.clone(), cfg.store.address_table.clone()));
        let run_loop = RunLoop::new(
            Arc::new(WebDriverLauncher::new(driver_options(&cfg))),
            GeoSampler::new(corpus, SamplerSettings::from(&cfg.sampler)),
            AcquisitionStateMachine::new(AcquisitionSettings::from(&cfg.acquisition)),
            ResponseInterceptor::new(cfg.acquisition.directions_endpoint.clone(), store.clone()),
            store,
        );

        let cancel = handle.cancellation();
        let ctrl_c = handle.cancel_on_ctrl_c();
        info!(
            store = %cfg.store.url,
            webdriver = %cfg.browser.webdriver_url,
            "orchestrator.started"
        );

        let stats = run_loop.run_forever(cancel.clone()).await;
        drop(run_loop);
        cancel.cancel();
        let _ = ctrl_c.await;

        system.graceful_shutdown().await?;
        pool.close().await;
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "orchestrator.stopped"
        );
        Ok(())
    }
}

fn driver_options(cfg: &ProbeConfig) -> DriverOptions {
    DriverOptions {
        webdriver_url: cfg.browser.webdriver_url.clone(),
        headless: cfg.browser.headless(),
        window: (cfg.browser.window_width, cfg.browser.window_height),
        response_poll: Duration::from_millis(cfg.acquisition.response_poll_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_options_follow_browser_section() {
        let mut cfg = ProbeConfig::default();
        cfg.browser.debug = true;
        cfg.browser.window_width = 1024;
        cfg.acquisition.response_poll_ms = 100;

        let options = driver_options(&cfg);

        assert!(!options.headless);
        assert_eq!(options.window, (1024, 900));
        assert_eq!(options.response_poll, Duration::from_millis(100));
        assert_eq!(options.webdriver_url, "http://localhost:9515");
    }
}
