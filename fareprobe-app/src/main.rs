use anyhow::Result;
use clap::Parser;
use fareprobe_common::observability::{LogConfig, LogFormat, init_logging};
use fareprobe_config::{LoggingConfig, ProbeConfig, ProbeConfigLoader};
use fareprobe_runtime::ProbeRuntime;
use orchestrator::Orchestrator;
use std::path::PathBuf;
use std::time::Duration;
mod orchestrator;

const DEFAULT_CONFIG: &str = "fareprobe.yaml";

#[derive(Debug, Parser)]
#[command(name = "fareprobe")]
#[command(about = "Samples routes and records ride-price estimates")]
struct Cli {
    /// YAML configuration file (defaults to ./fareprobe.yaml when present)
    #[arg(long, short, env = "FAREPROBE_CONFIG")]
    config: Option<PathBuf>,
    /// Show the browser window instead of running headless
    #[arg(long)]
    debug: bool,
    /// Override `store.url`
    #[arg(long)]
    store_url: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<ProbeConfig> {
        let loader = match &self.config {
            Some(path) => ProbeConfigLoader::new().with_file(path),
            None => ProbeConfigLoader::new().with_optional_file(DEFAULT_CONFIG),
        };
        let mut cfg = loader.load()?;
        self.apply_overrides(&mut cfg);
        Ok(cfg)
    }

    fn apply_overrides(&self, cfg: &mut ProbeConfig) {
        if self.debug {
            cfg.browser.debug = true;
        }
        if let Some(url) = &self.store_url {
            cfg.store.url = url.clone();
        }
    }
}

fn log_config(logging: &LoggingConfig) -> LogConfig {
    LogConfig {
        log_dir: logging.dir.clone(),
        emit_stderr: logging.stderr,
        format: match logging.format {
            fareprobe_config::LogFormat::Text => LogFormat::Text,
            fareprobe_config::LogFormat::Json => LogFormat::Json,
        },
        default_filter: logging.filter.clone(),
        ..LogConfig::default()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = cli.load_config()?;

    let log_path = init_logging(log_config(&cfg.logging))?;
    tracing::info!(log = %log_path.display(), headless = cfg.browser.headless(), "fareprobe.start");

    let runtime = ProbeRuntime::build("fareprobe-worker", cfg.runtime.worker_threads)?;
    let grace = Duration::from_millis(cfg.runtime.shutdown_grace_ms);
    let handle = runtime.handle();

    let outcome = runtime.block_on(Orchestrator::new(cfg).run(handle));
    if let Err(err) = &outcome {
        tracing::error!(error = ?err, "fareprobe.fatal");
    }
    runtime.shutdown(grace);
    outcome
}
