//! Repository configuration (ambient stack: generalizes the teacher's
//! `client/src/config.rs` TOML-backed config to bucse's mount-time knobs
//! — cache sizing and kernel cache TTLs still apply, destination/cipher
//! selection is new).

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_cache_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_cache_bytes")]
    pub cache_max_bytes: usize,
    #[serde(default = "default_kernel_attr_timeout")]
    pub kernel_attr_timeout_seconds: u64,
    #[serde(default = "default_kernel_entry_timeout")]
    pub kernel_entry_timeout_seconds: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
}

fn default_cache_entries() -> usize {
    1024
}

fn default_cache_bytes() -> usize {
    250 * 1024 * 1024
}

fn default_kernel_attr_timeout() -> u64 {
    1
}

fn default_kernel_entry_timeout() -> u64 {
    1
}

fn default_tick_interval() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_max_entries: default_cache_entries(),
            cache_max_bytes: default_cache_bytes(),
            kernel_attr_timeout_seconds: default_kernel_attr_timeout(),
            kernel_entry_timeout_seconds: default_kernel_entry_timeout(),
            tick_interval_seconds: default_tick_interval(),
        }
    }
}

/// Loads `path` if present, falling back to defaults with a logged
/// warning otherwise (mirrors `client/src/config.rs::load_config`, but
/// reports through `tracing` instead of `eprintln!`).
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Config::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
            return Config::default();
        }
    };

    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
            Config::default()
        }
    }
}
