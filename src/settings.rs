use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Harness configuration. Built once per test run and handed to
/// [`crate::context::TestContext`]; nothing reads configuration globally.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HarnessConfig {
    /// Peer image reference
    pub image: String,
    /// Auxiliary (poet) service image reference
    pub poet_image: String,
    /// Namespace for the cluster. Empty means every run gets a random `test-xxxx` namespace.
    pub namespace: String,
    /// Size of the cluster scenarios should build
    pub cluster_size: usize,
    /// Upper bound on peers a single cluster may hold
    pub max_cluster_size: usize,
    /// Added to "now" when computing the genesis time
    pub bootstrap_secs: u64,
    /// Overall deadline of a single test
    pub test_timeout_secs: u64,
    /// Node selector applied to every scheduled pod
    pub node_selector: BTreeMap<String, String>,
    /// Peer preset passed as `--preset`
    pub preset: String,
    pub log_format: LogFormat,
    /// Default filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Delete the namespace and exit on SIGINT/SIGTERM
    pub install_signal_handler: bool,
    pub probe: ProbeConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            image: "spacemeshos/go-spacemesh-dev:proposal-events".to_string(),
            poet_image: "spacemeshos/poet:ef8f28a".to_string(),
            namespace: String::new(),
            cluster_size: 10,
            max_cluster_size: 100,
            bootstrap_secs: 30,
            test_timeout_secs: 30 * 60,
            node_selector: BTreeMap::new(),
            preset: "fastnet".to_string(),
            log_format: LogFormat::Text,
            log_level: "info".to_string(),
            install_signal_handler: true,
            probe: ProbeConfig::default(),
        }
    }
}

/// Readiness probing knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConfig {
    /// Identity resolution attempts per peer
    pub attempts: u32,
    /// Per-attempt dial timeout
    pub dial_timeout_ms: u64,
    /// Pause between pod status polls
    pub poll_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            dial_timeout_ms: 5_000,
            poll_interval_ms: 200,
        }
    }
}

impl ProbeConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}'", other),
        }
    }
}

impl HarnessConfig {
    /// Load the configuration from an optional TOML file, then apply
    /// `SYSTEST_*` environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                toml::from_str(&data).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply overrides from a variable lookup. Split out from [`Self::load`] so
    /// tests do not have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SYSTEST_IMAGE") {
            self.image = v;
        }
        if let Some(v) = lookup("SYSTEST_POET_IMAGE") {
            self.poet_image = v;
        }
        if let Some(v) = lookup("SYSTEST_NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = lookup("SYSTEST_SIZE") {
            self.cluster_size = v.parse().context("SYSTEST_SIZE")?;
        }
        if let Some(v) = lookup("SYSTEST_BOOTSTRAP_SECS") {
            self.bootstrap_secs = v.parse().context("SYSTEST_BOOTSTRAP_SECS")?;
        }
        if let Some(v) = lookup("SYSTEST_TIMEOUT_SECS") {
            self.test_timeout_secs = v.parse().context("SYSTEST_TIMEOUT_SECS")?;
        }
        if let Some(v) = lookup("SYSTEST_NODE_SELECTOR") {
            self.node_selector.extend(parse_key_values(&v)?);
        }
        if let Some(v) = lookup("SYSTEST_LOG_FORMAT") {
            self.log_format = v.parse()?;
        }
        Ok(())
    }

    pub fn bootstrap_duration(&self) -> Duration {
        Duration::from_secs(self.bootstrap_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }
}

/// Parse `"smth=101,else=102"` into a map. Keys and values are trimmed.
pub fn parse_key_values(val: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    if val.trim().is_empty() {
        return Ok(out);
    }
    for pair in val.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("{} must be formatted as key=value", pair);
        };
        out.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(out)
}
