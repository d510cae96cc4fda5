// src/config.rs

//! Loads and validates the pool's configuration: backend topology, redirect
//! rules, and the handful of tuning knobs the selector and version probe
//! consume. Grounded on the host project's `Config::from_file`/`RawConfig`
//! two-step pattern (parse-then-validate, defaults filled in by serde).

use crate::core::balancer::{BalancerConfig, RedirectRule};
use crate::core::topology::{BackendInfo, ClusterTopology};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Deserialize, Debug, Clone)]
pub struct RedirectRuleConfig {
    pub pattern: String,
    pub target: String,
    #[serde(default = "default_rule_weight")]
    pub weight: f64,
}

fn default_rule_weight() -> f64 {
    1.0
}

#[derive(Deserialize, Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_backend_weight")]
    pub weight: f64,
}

fn default_backend_weight() -> f64 {
    1.0
}

fn default_relcache_size() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A raw representation of the config file before rule compilation and
/// validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_relcache_size")]
    relcache_size: usize,
    #[serde(default)]
    streaming_replication_mode: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    redirect_dbnames: Vec<RedirectRuleConfig>,
    #[serde(default)]
    redirect_app_names: Vec<RedirectRuleConfig>,
    backends: Vec<BackendConfig>,
    #[serde(default)]
    primary_node_id: Option<usize>,
}

/// The final, validated, resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub relcache_size: usize,
    pub streaming_replication_mode: bool,
    pub log_level: String,
    pub backends: Vec<BackendConfig>,
    pub primary_node_id: Option<usize>,
    pub balancer: BalancerConfig,
}

impl Config {
    /// Creates a new `Config` by reading and parsing a TOML file, then
    /// compiling every redirect rule's regex up front so a selection can
    /// never fail on a bad pattern (SPEC_FULL.md §10.1).
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let redirect_dbnames = compile_rules(&raw.redirect_dbnames)?;
        let redirect_app_names = compile_rules(&raw.redirect_app_names)?;

        let config = Config {
            relcache_size: raw.relcache_size,
            streaming_replication_mode: raw.streaming_replication_mode,
            log_level: raw.log_level,
            backends: raw.backends,
            primary_node_id: raw.primary_node_id,
            balancer: BalancerConfig {
                streaming_replication_mode: raw.streaming_replication_mode,
                redirect_dbnames,
                redirect_app_names,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(anyhow!("at least one backend must be configured"));
        }
        if let Some(id) = self.primary_node_id {
            if id >= self.backends.len() {
                return Err(anyhow!(
                    "primary_node_id {id} is out of range for {} backends",
                    self.backends.len()
                ));
            }
        }
        for (i, backend) in self.backends.iter().enumerate() {
            if backend.weight < 0.0 {
                return Err(anyhow!("backend #{i} has negative weight"));
            }
        }
        Ok(())
    }

    /// Builds the cluster topology the selector consults, from the
    /// currently configured backend list. Every configured backend starts
    /// alive and load-balance eligible; liveness updates are out of this
    /// core's scope (SPEC_FULL.md §1, Non-goals: automatic failover).
    pub fn topology(&self) -> ClusterTopology {
        let nodes = self
            .backends
            .iter()
            .map(|b| BackendInfo::new(b.weight))
            .collect();
        ClusterTopology::new(nodes, self.primary_node_id, self.streaming_replication_mode)
    }
}

fn compile_rules(raw: &[RedirectRuleConfig]) -> Result<Vec<RedirectRule>> {
    raw.iter()
        .map(|r| {
            if !(0.0..=1.0).contains(&r.weight) {
                return Err(anyhow!(
                    "redirect rule targeting '{}' has weight {} outside [0, 1]",
                    r.target,
                    r.weight
                ));
            }
            RedirectRule::compile(&r.pattern, r.target.clone(), r.weight)
                .with_context(|| format!("invalid regex '{}' in redirect rule", r.pattern))
        })
        .collect()
}

/// A hot-reloadable handle to the configuration. `snapshot` hands callers an
/// owned clone so an in-flight selection is never disturbed by a concurrent
/// `reload` (SPEC_FULL.md §5, snapshot-at-entry).
#[derive(Clone)]
pub struct ConfigHandle(Arc<Mutex<Config>>);

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(Mutex::new(config)))
    }

    pub async fn snapshot(&self) -> Config {
        self.0.lock().await.clone()
    }

    pub async fn reload(&self, path: &str) -> Result<()> {
        let fresh = Config::from_file(path)?;
        *self.0.lock().await = fresh;
        Ok(())
    }
}
