//! Error types for this crate.
//!
//! Everything that is a *protocol* violation (truncated frame, bad
//! invariant) is either a recoverable [`CodecError`] or a panic, per
//! spec §7. There is no catch-all error enum: submission is
//! fire-and-forget and never returns a `Result`.

use std::fmt;

/// Returned by [`crate::buffer::FramedReader`] when a frame is short or
/// not valid UTF-8. Trusted-peer handlers are allowed to `.expect()`
/// this away; anything reading untrusted or possibly-truncated bytes
/// (the diagnostic CLI, tests) should handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    UnexpectedEof,
    InvalidUtf8,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnexpectedEof => write!(f, "truncated frame"),
            CodecError::InvalidUtf8 => write!(f, "frame string field is not valid utf-8"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Returned by [`crate::config::EngineConfig::load`].
#[derive(Debug)]
pub enum ConfigError {
    Load(config::ConfigError),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(e) => write!(f, "could not load engine config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid engine config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Load(e)
    }
}
