//! External collaborator contracts (spec §6). Both traits are
//! consumed by this crate, never implemented by it for production
//! use — the host wires up a real transport (see `src/udp.rs` for an
//! illustrative one) and cluster membership source, and feeds inbound
//! messages to [`crate::engine::Engine::on_message`].
//!
//! This generalizes the teacher's `NetNode<T>`, which owned a UDP
//! socket and did `send`/`receive` directly, into an injected trait so
//! the engine itself never touches a socket and stays testable with an
//! in-memory double.

use crate::message::MessageKind;
use crate::node_id::NodeId;

/// Everything the engine needs to move bytes between nodes. Every
/// send variant from spec §6 is a method here; "reliable" means the
/// transport guarantees eventual delivery to a live peer, "unreliable"
/// means best-effort (the anti-entropy and watermark-gossip paths are
/// designed to tolerate drops on these).
pub trait Transport {
    fn send_reliable_to(&mut self, target: &NodeId, kind: MessageKind, payload: &[u8]);
    fn send_reliable_to_all(&mut self, kind: MessageKind, payload: &[u8]);
    fn send_reliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]);
    fn send_reliable_to_self(&mut self, kind: MessageKind, payload: &[u8]);

    fn send_unreliable_to_all(&mut self, kind: MessageKind, payload: &[u8]);
    fn send_unreliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]);

    /// Schedules a self-send after `delay_ms`. Used for the engine's
    /// own wakeups that do not need to reach peers.
    fn send_delayed_to_self(&mut self, kind: MessageKind, payload: &[u8], delay_ms: u64);

    /// Schedules a reliable all-and-self broadcast after `delay_ms`.
    /// This is the proposer's randomized backoff on denial (spec §5):
    /// the retry must eventually reach every acceptor, not just wake
    /// the proposer up, or the cluster never sees the bumped proposal
    /// id and liveness stalls.
    fn send_delayed_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8], delay_ms: u64);

    /// Registers a recurring self-send every `period_ms`, used to
    /// drive the short/long periodic ticks (spec §4.6). `kind` is
    /// delivered back through `Engine::on_message` with an empty
    /// payload on every firing.
    fn send_periodic_to_self(&mut self, kind: MessageKind, period_ms: u64);
}

/// Cluster membership and mode, consumed by the engine (spec §6).
pub trait Cluster {
    fn is_cluster_mode(&self) -> bool;
    fn my_node_id(&self) -> NodeId;
    fn cluster_size(&self) -> usize;
}
