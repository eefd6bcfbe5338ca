use super::*;

use log::warn;
use std::env;

/// Environment variable overriding [`Config::delay`].
pub const DELAY_ENV: &str = "TFS_DELAY";

/// Runtime knobs of a file system instance. Capacities are fixed in
/// `common.rs`; only the simulated storage latency is tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// spin iterations inserted before each access to table or block state
    pub delay: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
        }
    }
}

impl Config {
    pub fn without_delay() -> Self {
        Self { delay: 0 }
    }

    /// Default configuration, with the delay taken from `TFS_DELAY` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = env::var(DELAY_ENV) {
            match raw.trim().parse() {
                Ok(delay) => config.delay = delay,
                Err(_) => warn!("ignoring {DELAY_ENV}={raw:?}: not a number"),
            }
        }
        config
    }
}
