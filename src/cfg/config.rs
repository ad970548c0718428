// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::ProtocolName, models::message::Protocol};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Worker pool and channel sizing.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Session lifetime and sweep cadence.
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Event/CDR directories and retention.
    #[serde(default)]
    pub output: OutputConfig,
    /// Correlation persistence backend.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Which protocol decoders get registered.
    #[serde(default)]
    pub protocols: ProtocolConfig,
    /// Optional knowledge-base supplement dataset.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PipelineConfig {
    /// Worker task count; 0 means one per CPU.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_input_buffer")]
    pub input_buffer_size: usize,
    /// Fan-out channels to the writers.
    #[serde(default = "default_fanout_buffer")]
    pub fanout_buffer_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            input_buffer_size: default_input_buffer(),
            fanout_buffer_size: default_fanout_buffer(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SessionConfig {
    #[serde(
        default = "default_session_timeout",
        rename = "session_timeout_seconds",
        with = "serde_secs"
    )]
    pub session_timeout: Duration,
    #[serde(
        default = "default_sweep_interval",
        rename = "session_sweep_interval_seconds",
        with = "serde_secs"
    )]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_event_dir")]
    pub event_dir: PathBuf,
    #[serde(default = "default_cdr_dir")]
    pub cdr_dir: PathBuf,
    #[serde(default = "default_event_retention")]
    pub event_retention_days: u32,
    #[serde(default = "default_cdr_retention")]
    pub cdr_retention_days: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            event_dir: default_event_dir(),
            cdr_dir: default_cdr_dir(),
            event_retention_days: default_event_retention(),
            cdr_retention_days: default_cdr_retention(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(
        default = "default_persistence_buffer",
        rename = "persistence_buffer_size"
    )]
    pub buffer_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            buffer_size: default_persistence_buffer(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_enabled")]
    pub enabled: Vec<ProtocolName>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { enabled: default_enabled() }
    }
}

impl ProtocolConfig {
    /// Decoder protocols in registration order, deduplicated.
    pub fn enabled_protocols(&self) -> Vec<Protocol> {
        let mut out = Vec::new();
        for name in &self.enabled {
            for proto in name.expand() {
                if !out.contains(proto) {
                    out.push(*proto);
                }
            }
        }
        out
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct KnowledgeConfig {
    /// Optional YAML file merged over the embedded dataset.
    #[serde(default)]
    pub supplement_path: Option<PathBuf>,
}

fn default_input_buffer() -> usize {
    10_000
}
fn default_fanout_buffer() -> usize {
    1_000
}
fn default_session_timeout() -> Duration {
    Duration::from_secs(300)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_event_dir() -> PathBuf {
    PathBuf::from("events")
}
fn default_cdr_dir() -> PathBuf {
    PathBuf::from("cdr")
}
fn default_event_retention() -> u32 {
    30
}
fn default_cdr_retention() -> u32 {
    90
}
fn default_db_path() -> PathBuf {
    PathBuf::from("sigmon.db")
}
fn default_persistence_buffer() -> usize {
    10_000
}
fn default_enabled() -> Vec<ProtocolName> {
    ProtocolName::ALL.to_vec()
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        if self.pipeline.workers == 0 {
            self.pipeline.workers = num_cpus::get();
        }
        ensure!(
            self.pipeline.input_buffer_size >= 1,
            "input_buffer_size must be >= 1"
        );
        ensure!(
            self.pipeline.fanout_buffer_size >= 1,
            "fanout_buffer_size must be >= 1"
        );
        ensure!(
            self.sessions.session_timeout >= Duration::from_secs(1),
            "session_timeout_seconds must be >= 1"
        );
        ensure!(
            self.sessions.sweep_interval >= Duration::from_secs(1),
            "session_sweep_interval_seconds must be >= 1"
        );
        ensure!(
            !self.protocols.enabled.is_empty(),
            "protocols.enabled must not be empty"
        );
        ensure!(
            self.persistence.buffer_size >= 1,
            "persistence_buffer_size must be >= 1"
        );
        Ok(())
    }
}

/// Shared snapshot of the active configuration. Hot reload builds a new
/// `Config` off the hot path and swaps the `Arc`; readers clone the `Arc`
/// and never observe a half-updated value.
pub struct ConfigHandle {
    inner: RwLock<Arc<Config>>,
}

impl ConfigHandle {
    pub fn new(cfg: Config) -> Self {
        Self { inner: RwLock::new(Arc::new(cfg)) }
    }

    pub fn snapshot(&self) -> Arc<Config> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the active configuration; rejected configs never get here.
    pub fn swap(&self, cfg: Config) {
        let next = Arc::new(cfg);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
