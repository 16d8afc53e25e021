use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allocator::Ceilings;
use crate::bandwidth::Bandwidth;
use crate::builder::{TierConfig, TopoArgs};
use crate::error::Result;
use crate::flowspace::ControllerConfig;
use crate::reconcile::RetryPolicy;
use crate::slice::Slice;
use crate::QueueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueCap {
    pub id: QueueId,
    pub cap: Bandwidth,
}

/// Queue hierarchy installed on non-edge switch interfaces before shaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Interface maximum, shared by all queues
    pub max_rate: Bandwidth,
    #[serde(default, rename = "queue")]
    pub queues: Vec<QueueCap>,
}

impl QueueConfig {
    pub fn caps(&self) -> Vec<(QueueId, Bandwidth)> {
        self.queues.iter().map(|q| (q.id, q.cap)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Delay between two shaper invocations in milliseconds
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
    /// Number of worker threads; 1 runs the pass in order on the calling thread
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Full passes to run before giving up on failed endpoints
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Run `tc` through sudo
    #[serde(default)]
    pub sudo: bool,
}

fn default_pace_ms() -> u64 {
    100
}

fn default_parallel() -> usize {
    1
}

fn default_max_rounds() -> usize {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            pace_ms: default_pace_ms(),
            parallel: default_parallel(),
            max_rounds: default_max_rounds(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            sudo: false,
        }
    }
}

impl ReconcileConfig {
    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_rounds: self.max_rounds,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Topology parameters
    pub topology: TopoArgs,

    /// Link parameters per tier
    #[serde(default)]
    pub links: TierConfig,

    /// Capacity ceiling per tier; tiers without one are only bounded by the
    /// declared link bandwidth
    #[serde(default)]
    pub ceilings: Ceilings,

    #[serde(default, rename = "slice")]
    pub slices: Vec<Slice>,

    /// Queue bootstrap; skipped when absent
    #[serde(default)]
    pub queues: Option<QueueConfig>,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Flow-space controller settings, required by `--fv`
    #[serde(default)]
    pub controller: Option<ControllerConfig>,

    /// Environment variables
    #[serde(default)]
    pub envs: toml::value::Table,
}

impl Config {
    /// Queue ids the slices use that have no bootstrap entry.
    pub fn unconfigured_queues(&self) -> BTreeSet<QueueId> {
        let configured: BTreeSet<_> = self
            .queues
            .iter()
            .flat_map(|q| q.queues.iter().map(|c| c.id))
            .collect();
        self.slices
            .iter()
            .map(|s| s.queue_id)
            .filter(|id| !configured.contains(id))
            .collect()
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn set_env_vars(config: &Config) {
    for (k, v) in config.envs.iter() {
        match v.as_str() {
            Some(v) => {
                log::debug!("setting environment {}={}", k, v);
                std::env::set_var(k, v);
            }
            None => log::warn!("ignoring non-string environment variable {}", k),
        }
    }
}
