//! Loader for fareprobe configuration with YAML + environment overlays.
//!
//! Sources, lowest precedence first: built-in defaults, an optional YAML file
//! (`fareprobe.yaml` by convention), inline YAML snippets, then
//! `FAREPROBE__SECTION__KEY` environment variables. String values may carry
//! `${VAR}` placeholders, which are expanded after merging.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```
//! use fareprobe_config::ProbeConfigLoader;
//!
//! let cfg = ProbeConfigLoader::new().with_yaml_str("{}").load().unwrap();
//! assert_eq!(cfg.acquisition.max_attempts, 3);
//! assert_eq!(cfg.acquisition.settle_delay_ms, 3000);
//! assert_eq!(cfg.sampler.min_miles, 5.0);
//! assert!(cfg.browser.headless());
//! ```
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub store: StoreConfig,
    pub browser: BrowserConfig,
    pub acquisition: AcquisitionConfig,
    pub sampler: SamplerConfig,
    pub logging: LoggingConfig,
    pub runtime: RuntimeConfig,
}

/// Connection target for the document store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    /// Table holding the address corpus.
    pub address_table: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://fareprobe.db?mode=rwc".into(),
            address_table: "addresses".into(),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    /// Show the browser window instead of running headless.
    pub debug: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl BrowserConfig {
    pub fn headless(&self) -> bool {
        !self.debug
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            debug: false,
            window_width: 1440,
            window_height: 900,
        }
    }
}

/// Target page, selectors and timing for the acquisition state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub estimate_url: String,
    pub pickup_selector: String,
    pub destination_selector: String,
    /// Element whose visibility signals that prices have rendered.
    pub result_selector: String,
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    pub screenshot_path: PathBuf,
    /// Network call whose response carries the directions payload.
    pub directions_endpoint: String,
    pub response_poll_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            estimate_url: "https://www.uber.com/us/en/price-estimate/".into(),
            pickup_selector: "input[name=pickup]".into(),
            destination_selector: "input[name=destination]".into(),
            result_selector: ".text-area".into(),
            settle_delay_ms: 3000,
            max_attempts: 3,
            screenshot_path: PathBuf::from("logs/latest.png"),
            directions_endpoint: "https://www.uber.com/api/loadFEDirections".into(),
            response_poll_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub min_miles: f64,
    pub max_miles: f64,
    /// Redraw ceiling before sampling gives up on the corpus.
    pub max_draws: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_miles: 5.0,
            max_miles: 30.0,
            max_draws: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub stderr: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: LogFormat::Text,
            stderr: true,
            filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub worker_threads: Option<usize>,
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Semantic problems found after the document parsed successfully.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidConfig {
    #[error("sampler.min_miles ({min}) exceeds sampler.max_miles ({max})")]
    DistanceBounds { min: f64, max: f64 },
    #[error("acquisition.max_attempts must be at least 1")]
    NoAttempts,
    #[error("sampler.max_draws must be at least 1")]
    NoDraws,
    #[error("store.address_table `{0}` is not a plain SQL identifier")]
    TableName(String),
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.sampler.min_miles > self.sampler.max_miles {
            return Err(InvalidConfig::DistanceBounds {
                min: self.sampler.min_miles,
                max: self.sampler.max_miles,
            });
        }
        if self.acquisition.max_attempts == 0 {
            return Err(InvalidConfig::NoAttempts);
        }
        if self.sampler.max_draws == 0 {
            return Err(InvalidConfig::NoDraws);
        }
        if !is_identifier(&self.store.address_table) {
            return Err(InvalidConfig::TableName(self.store.address_table.clone()));
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hiding the `config` crate wiring (YAML + env overrides).
pub struct ProbeConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl Default for ProbeConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeConfigLoader {
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
        }
    }

    /// Attach a file that must exist; format is inferred from the suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Attach a file that is skipped when missing, so deployments can rely
    /// purely on environment variables.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    /// Merge an inline YAML snippet (tests, CLI overrides).
    ///
    /// ```
    /// use fareprobe_config::ProbeConfigLoader;
    ///
    /// let cfg = ProbeConfigLoader::new()
    ///     .with_yaml_str("browser:\n  debug: true\n")
    ///     .with_yaml_str("store:\n  url: 'sqlite::memory:'\n")
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!(!cfg.browser.headless());
    /// assert_eq!(cfg.store.url, "sqlite::memory:");
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Merge all sources, expand `${VAR}` placeholders and deserialize into
    /// strongly typed config.
    ///
    /// ```
    /// use fareprobe_config::ProbeConfigLoader;
    ///
    /// unsafe { std::env::set_var("FAREPROBE_DOC_DB", "sqlite://doc.db"); }
    ///
    /// let cfg = ProbeConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// store:
    ///   url: "${FAREPROBE_DOC_DB}"
    /// acquisition:
    ///   settle_delay_ms: 1500
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(cfg.store.url, "sqlite://doc.db");
    /// assert_eq!(cfg.acquisition.settle_delay_ms, 1500);
    /// assert_eq!(cfg.acquisition.result_selector, ".text-area");
    ///
    /// unsafe { std::env::remove_var("FAREPROBE_DOC_DB"); }
    /// ```
    pub fn load(self) -> Result<ProbeConfig, ConfigError> {
        // Environment is added last so it overrides every file source.
        let cfg = self
            .builder
            .add_source(
                Environment::with_prefix("FAREPROBE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        let typed: ProbeConfig =
            serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))?;
        typed
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        Ok(typed)
    }
}
