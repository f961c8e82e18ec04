// Process configuration: YAML file + CLI overrides for the static part,
// an atomically swapped snapshot for the runtime profiling part.

use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub const DEF_HOST: &str = "0.0.0.0";
pub const DEF_PORT: u16 = 10092;
const DEF_STORE_PATH: &str = "data";
const DEF_PROFILE_SECONDS: u32 = 5;
const DEF_INTERVAL_SECONDS: u32 = 10;
const DEF_TIMEOUT_SECONDS: u32 = 120;
const DEF_DATA_RETENTION_SECONDS: u64 = 3 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub advertise_address: String,
    pub store_path: String,
    pub config_path: String,
    pub pd_address: String,
    pub log: Log,
    pub security: Security,
    /// Runtime-only section: never read from the config file, changed via
    /// POST /config.
    #[serde(skip_deserializing)]
    pub continuous_profiling: ContinuousProfilingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEF_HOST.to_string(),
            port: DEF_PORT,
            advertise_address: String::new(),
            store_path: DEF_STORE_PATH.to_string(),
            config_path: String::new(),
            pd_address: String::new(),
            log: Log::default(),
            security: Security::default(),
            continuous_profiling: ContinuousProfilingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
    pub filename: String,
    /// Max size for a single log file, in MB.
    pub max_size: u32,
    pub max_days: u32,
    pub max_backups: u32,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filename: String::new(),
            max_size: 300,
            max_days: 0,
            max_backups: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub ssl_ca: String,
    pub ssl_cert: String,
    pub ssl_key: String,
}

impl Security {
    pub fn has_tls(&self) -> bool {
        !self.ssl_ca.is_empty() && !self.ssl_cert.is_empty() && !self.ssl_key.is_empty()
    }

    /// Client builder carrying the cluster TLS material when configured.
    /// Callers add their own timeouts before `build()`.
    pub fn http_client_builder(&self) -> anyhow::Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder();
        if self.has_tls() {
            let ca = std::fs::read(&self.ssl_ca)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&ca)?);
            let mut identity = std::fs::read(&self.ssl_cert)?;
            identity.extend(std::fs::read(&self.ssl_key)?);
            builder = builder.identity(reqwest::Identity::from_pem(&identity)?);
        }
        Ok(builder)
    }
}

/// Parameters of the continuous profiling loops. Swapped wholesale through
/// the global config atom; readers always see a consistent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousProfilingConfig {
    pub enable: bool,
    pub profile_seconds: u32,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub data_retention_seconds: u64,
}

impl Default for ContinuousProfilingConfig {
    fn default() -> Self {
        Self {
            enable: false,
            profile_seconds: DEF_PROFILE_SECONDS,
            interval_seconds: DEF_INTERVAL_SECONDS,
            timeout_seconds: DEF_TIMEOUT_SECONDS,
            data_retention_seconds: DEF_DATA_RETENTION_SECONDS,
        }
    }
}

impl ContinuousProfilingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.profile_seconds > 0,
            "profile_seconds must be > 0, got {}",
            self.profile_seconds
        );
        anyhow::ensure!(
            self.interval_seconds > 0,
            "interval_seconds must be > 0, got {}",
            self.interval_seconds
        );
        anyhow::ensure!(
            self.profile_seconds < self.timeout_seconds,
            "profile_seconds ({}) must be less than timeout_seconds ({})",
            self.profile_seconds,
            self.timeout_seconds
        );
        anyhow::ensure!(
            self.data_retention_seconds > 0,
            "data_retention_seconds must be > 0, got {}",
            self.data_retention_seconds
        );
        Ok(())
    }
}

impl Config {
    /// Scheme used both for scraping members and for the topology client.
    pub fn scheme(&self) -> &'static str {
        if self.security.has_tls() { "https" } else { "http" }
    }

    pub fn load(path: &str) -> anyhow::Result<Self> {
        if path.is_empty() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.port > 0,
            "port must be between 1 and 65535, got {}",
            self.port
        );
        anyhow::ensure!(!self.store_path.is_empty(), "store_path must be non-empty");
        self.continuous_profiling.validate()
    }
}

static GLOBAL_CONFIG: LazyLock<ArcSwap<Config>> =
    LazyLock::new(|| ArcSwap::from_pointee(Config::default()));

/// Latest config snapshot. The returned Arc stays valid across later swaps.
pub fn global_config() -> Arc<Config> {
    GLOBAL_CONFIG.load_full()
}

/// Replace the process-wide config. Always a wholesale swap, never an
/// in-place mutation; writers that expect the scrape set to change must
/// also notify the scrape manager.
pub fn store_global_config(config: Config) {
    GLOBAL_CONFIG.store(Arc::new(config));
}
