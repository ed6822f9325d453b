//! Typed configuration for the scheduling core (§4.11, §6.4).
//!
//! Loaded from a TOML file and then overridable field-by-field by an
//! environment variable of the same name as the option, matching how the
//! rest of this family of crates layers env overrides on top of a file
//! (see [`crate::logger`] for the `RUST_LOG`-driven counterpart on the
//! logging side).

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_size() -> usize {
    0
}

fn default_update_thread_timeout() -> i64 {
    10
}

fn default_temp_reservation_time() -> i64 {
    300
}

/// Mirrors the option names in SPEC_FULL.md §6.4 verbatim, for
/// compatibility with existing deployment tooling and environment files.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default cluster size, used when no hostfile is given.
    #[serde(default = "default_size")]
    pub size: usize,

    /// Path to a newline-delimited file of managed node names.
    #[serde(default)]
    pub hostfile: Option<String>,

    /// When set, the scheduler wires up [`crate::bridge::memory::MemoryBridge`]
    /// instead of the HTTP bridge.
    #[serde(default)]
    pub simulation_mode: bool,

    /// When set, bridge calls are expected to cross a network boundary
    /// (HTTP bridge); otherwise an in-process bridge is assumed regardless
    /// of `simulation_mode`.
    #[serde(default)]
    pub run_remote: bool,

    /// Refresh-loop tick interval, in seconds (§4.7).
    #[serde(default = "default_update_thread_timeout")]
    pub update_thread_timeout: i64,

    /// Duration, in seconds, of the temporary reservation a placement
    /// decision installs before the forker confirms it (§4.5).
    #[serde(default = "default_temp_reservation_time")]
    pub temp_reservation_time: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: default_size(),
            hostfile: None,
            simulation_mode: false,
            run_remote: false,
            update_thread_timeout: default_update_thread_timeout(),
            temp_reservation_time: default_temp_reservation_time(),
        }
    }
}

impl Config {
    /// Parses a TOML file at `path`, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&text).map_err(|e| Error::DataCreation(format!("invalid configuration: {}", e)))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Starts from compiled-in defaults and applies environment overrides,
    /// for deployments with no configuration file at all.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Overrides each field from an environment variable bearing its
    /// documented name, when present and parseable. An unparseable value
    /// is logged and the file/default value is kept rather than aborting
    /// startup over a typo'd environment.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed::<usize>("size") {
            self.size = v;
        }
        if let Ok(v) = std::env::var("hostfile") {
            self.hostfile = Some(v);
        }
        if let Some(v) = env_parsed::<bool>("simulation_mode") {
            self.simulation_mode = v;
        }
        if let Some(v) = env_parsed::<bool>("run_remote") {
            self.run_remote = v;
        }
        if let Some(v) = env_parsed::<i64>("UPDATE_THREAD_TIMEOUT") {
            self.update_thread_timeout = v;
        }
        if let Some(v) = env_parsed::<i64>("TEMP_RESERVATION_TIME") {
            self.temp_reservation_time = v;
        }
    }

    /// Reads [`Config::hostfile`], if set, as newline-delimited node names.
    /// Blank lines and `#`-prefixed comments are skipped.
    pub fn load_hostfile(&self) -> Result<Vec<String>> {
        let Some(path) = &self.hostfile else { return Ok(Vec::new()) };
        let text = std::fs::read_to_string(path)?;
        Ok(text.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#')).map(str::to_string).collect())
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring unparseable environment override {}={:?}", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}
