//! Configuration knobs (spec §6), generalized from the teacher's
//! `configurations.rs`. The teacher reads a `Config.toml` of per-role
//! socket addresses with the `config`/`toml` crates; this engine has
//! no addresses to configure (transport is injected by the host), so
//! the file shrinks to exactly the four knobs spec.md names.

use config::{Config, File};
use serde_derive::Deserialize;

use crate::error::ConfigError;

/// Design-level defaults from spec §4.6: short tick in the tens of
/// ms, long tick in the hundreds.
pub const DEFAULT_SHORT_TICK_MS: u64 = 50;
pub const DEFAULT_LONG_TICK_MS: u64 = 500;
pub const DEFAULT_IDLE_BACKOFF_START_MS: u64 = 10;
pub const DEFAULT_IDLE_BACKOFF_END_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_short_tick_ms")]
    pub short_tick_ms: u64,

    #[serde(default = "default_long_tick_ms")]
    pub long_tick_ms: u64,

    #[serde(default = "default_idle_backoff_start_ms")]
    pub idle_backoff_start_ms: u64,

    #[serde(default = "default_idle_backoff_end_ms")]
    pub idle_backoff_end_ms: u64,
}

fn default_short_tick_ms() -> u64 {
    DEFAULT_SHORT_TICK_MS
}
fn default_long_tick_ms() -> u64 {
    DEFAULT_LONG_TICK_MS
}
fn default_idle_backoff_start_ms() -> u64 {
    DEFAULT_IDLE_BACKOFF_START_MS
}
fn default_idle_backoff_end_ms() -> u64 {
    DEFAULT_IDLE_BACKOFF_END_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            short_tick_ms: DEFAULT_SHORT_TICK_MS,
            long_tick_ms: DEFAULT_LONG_TICK_MS,
            idle_backoff_start_ms: DEFAULT_IDLE_BACKOFF_START_MS,
            idle_backoff_end_ms: DEFAULT_IDLE_BACKOFF_END_MS,
        }
    }
}

impl EngineConfig {
    /// Loads knobs from a TOML file (any fields left unset fall back
    /// to the defaults above), the same `config`/`toml` pairing the
    /// teacher's `configurations::get_config` uses.
    pub fn load(file_name: &str) -> Result<Self, ConfigError> {
        let mut c = Config::default();
        c.merge(File::with_name(file_name))?;
        let parsed: EngineConfig = c.try_into()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_backoff_start_ms > self.idle_backoff_end_ms {
            return Err(ConfigError::Invalid(format!(
                "idle_backoff_start_ms ({}) must be <= idle_backoff_end_ms ({})",
                self.idle_backoff_start_ms, self.idle_backoff_end_ms
            )));
        }
        Ok(())
    }
}
