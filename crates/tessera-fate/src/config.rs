// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor configuration: loaded from environment variables, updatable at
//! runtime through a watch channel.
//!
//! The pool supervisor re-reads the live value on every tick, so raising or
//! lowering the pool size takes effect without a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Tunable executor settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target number of worker tasks. Hot-reloadable.
    pub pool_size: usize,
    /// Window for the idle-saturation heuristic. Zero disables it.
    pub idle_check_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 4,
            idle_check_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `TESSERA_FATE_POOL_SIZE`: target worker count (default: 4)
    /// - `TESSERA_FATE_IDLE_CHECK_INTERVAL_SECS`: idle heuristic window in
    ///   seconds, 0 to disable (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let pool_size = match std::env::var("TESSERA_FATE_POOL_SIZE") {
            Ok(v) => v.parse().map_err(|_| {
                ConfigError::Invalid("TESSERA_FATE_POOL_SIZE", "must be a non-negative integer")
            })?,
            Err(_) => defaults.pool_size,
        };

        let idle_check_interval = match std::env::var("TESSERA_FATE_IDLE_CHECK_INTERVAL_SECS") {
            Ok(v) => {
                let secs: u64 = v.parse().map_err(|_| {
                    ConfigError::Invalid(
                        "TESSERA_FATE_IDLE_CHECK_INTERVAL_SECS",
                        "must be a number of seconds",
                    )
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => defaults.idle_check_interval,
        };

        Ok(Self {
            pool_size,
            idle_check_interval,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

/// Shared handle to the live configuration.
///
/// Cloning is cheap; any clone can push updates and every subscriber sees
/// them on its next read.
#[derive(Clone)]
pub struct LiveConfig {
    tx: Arc<watch::Sender<Config>>,
}

impl LiveConfig {
    /// Wrap an initial configuration.
    pub fn new(initial: Config) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to configuration updates.
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }

    /// Snapshot the current configuration.
    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    /// Apply an in-place update, notifying subscribers.
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        self.tx.send_modify(f);
    }

    /// Set the target worker pool size.
    pub fn set_pool_size(&self, pool_size: usize) {
        self.update(|c| c.pool_size = pool_size);
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.idle_check_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_live_config_updates_are_visible() {
        let live = LiveConfig::new(Config::default());
        let rx = live.subscribe();

        live.set_pool_size(9);
        assert_eq!(rx.borrow().pool_size, 9);
        assert_eq!(live.current().pool_size, 9);
    }
}
