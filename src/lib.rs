//! Multi-instance, replicated-log consensus engine.
//!
//! A fixed-membership cluster agrees on an ordered sequence of opaque
//! byte-string values per named log, running independent Paxos-style
//! rounds per instance and delivering decisions to host callbacks in
//! strict instance-id order. Transport and cluster membership are
//! external collaborators the host injects via the [`transport`]
//! traits; this crate owns no socket and spawns no scheduler of its
//! own.
//!
//! Entry points: [`engine::Engine::create_log`] registers a log,
//! [`engine::Engine::submit`] proposes a value, and
//! [`engine::Engine::on_message`] dispatches both inbound wire
//! messages and periodic tick firings.
//!
//! This crate's own module is named `log`, same as the `log` facade
//! crate it depends on for tracing — every call site refers to the
//! facade through its fully qualified path, `::log::info!` and
//! friends, to keep the two apart.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod instance;
pub mod log;
pub mod message;
pub mod node_id;
pub mod periodic;
pub mod transport;
pub mod udp;

#[cfg(test)]
mod tests;
