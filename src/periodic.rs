//! Short/long periodic tasks (C6), driven by the host firing
//! `MessageKind::ShortTick`/`LongTick` back through
//! [`crate::engine::Engine::on_message`] on the cadence registered with
//! `Transport::send_periodic_to_self` (spec §4.6).
//!
//! Grounded on `consensus.c`'s `Consensus_ShortPeriodicTasks` /
//! `Consensus_LongPeriodicTasks`, generalized from "loop over every
//! registered consensus" (the original keeps one process-wide dict) to
//! "run for the one log the caller hands in" — `Engine` is what loops
//! over all of its logs.

use crate::log::Log;
use crate::message::{CallbackTriggered, LastIdTriggered, MessageKind};
use crate::node_id::NodeId;
use crate::transport::Transport;

/// Gossips this node's delivery progress and reclaims everything the
/// whole cluster has already delivered.
///
/// `consensus.c` only gossips `nextTriggeredId - 1` when
/// `nextTriggeredId > 0`; `next_deliver_id() == 0` means nothing has
/// ever been delivered locally, so there is nothing useful to report
/// yet (gossiping `-1` is the no-op the field already starts at).
pub fn short_tick<Ctx>(log: &mut Log<Ctx>, transport: &mut dyn Transport) {
    let next_deliver_id = log.next_deliver_id();
    if next_deliver_id > 0 {
        let msg = LastIdTriggered {
            log: log.name.clone(),
            last_delivered_id: (next_deliver_id - 1) as i64,
        };
        transport.send_unreliable_to_all_and_self(MessageKind::LastIdTriggered, &msg.encode());
    }
    log.reclaim();
}

/// Anti-entropy: re-announce every instance this node has delivered
/// locally but which the cluster hasn't caught up on yet, so a peer
/// that missed the original `LearnValue`/`CallbackTriggered` broadcast
/// (both sent unreliably here) eventually catches up.
pub fn long_tick<Ctx>(log: &mut Log<Ctx>, transport: &mut dyn Transport) {
    for (instance_id, value) in log.deliverable_not_yet_retired() {
        let msg = CallbackTriggered {
            log: log.name.clone(),
            instance_id,
            value,
        };
        transport.send_unreliable_to_all(MessageKind::CallbackTriggered, &msg.encode());
    }
}

/// Registers the two recurring self-sends a freshly created log needs
/// (spec §4.6); called once by `Engine::create_log`.
pub fn register_ticks(transport: &mut dyn Transport, short_tick_ms: u64, long_tick_ms: u64) {
    transport.send_periodic_to_self(MessageKind::ShortTick, short_tick_ms);
    transport.send_periodic_to_self(MessageKind::LongTick, long_tick_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance;

    #[derive(Default)]
    struct RecordingTransport {
        unreliable_all_and_self: Vec<(MessageKind, Vec<u8>)>,
        unreliable_all: Vec<(MessageKind, Vec<u8>)>,
    }

    impl Transport for RecordingTransport {
        fn send_reliable_to(&mut self, _target: &NodeId, _kind: MessageKind, _payload: &[u8]) {}
        fn send_reliable_to_all(&mut self, _kind: MessageKind, _payload: &[u8]) {}
        fn send_reliable_to_all_and_self(&mut self, _kind: MessageKind, _payload: &[u8]) {}
        fn send_reliable_to_self(&mut self, _kind: MessageKind, _payload: &[u8]) {}
        fn send_unreliable_to_all(&mut self, kind: MessageKind, payload: &[u8]) {
            self.unreliable_all.push((kind, payload.to_vec()));
        }
        fn send_unreliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]) {
            self.unreliable_all_and_self.push((kind, payload.to_vec()));
        }
        fn send_delayed_to_self(&mut self, _kind: MessageKind, _payload: &[u8], _delay_ms: u64) {}
        fn send_delayed_to_all_and_self(&mut self, _kind: MessageKind, _payload: &[u8], _delay_ms: u64) {}
        fn send_periodic_to_self(&mut self, _kind: MessageKind, _period_ms: u64) {}
    }

    fn learned_log() -> Log<()> {
        let mut log = Log::new("test", Box::new(|_: &[u8], _: Option<&()>| {}), None);
        let inst = log.instances_mut().get_or_create(0);
        inst.learner.learned = true;
        inst.learner.learned_value = Some(instance::frame_value(&NodeId::random(), b"v"));
        log.try_deliver();
        log
    }

    #[test]
    fn short_tick_gossips_nothing_before_any_delivery() {
        let mut log: Log<()> = Log::new("test", Box::new(|_: &[u8], _: Option<&()>| {}), None);
        let mut transport = RecordingTransport::default();
        short_tick(&mut log, &mut transport);
        assert!(transport.unreliable_all_and_self.is_empty());
    }

    #[test]
    fn short_tick_gossips_last_delivered_after_delivery() {
        let mut log = learned_log();
        let mut transport = RecordingTransport::default();
        short_tick(&mut log, &mut transport);
        assert_eq!(transport.unreliable_all_and_self.len(), 1);
        let msg = LastIdTriggered::decode(&transport.unreliable_all_and_self[0].1).unwrap();
        assert_eq!(msg.last_delivered_id, 0);
    }

    #[test]
    fn short_tick_reclaims_once_watermark_covers_instance() {
        let mut log = learned_log();
        let node = NodeId::random();
        log.record_peer_last_delivered(node, 0, 1);
        let mut transport = RecordingTransport::default();
        short_tick(&mut log, &mut transport);
        assert!(!log.instances().contains(0));
    }

    #[test]
    fn long_tick_rebroadcasts_delivered_but_unretired_instances() {
        let mut log = learned_log();
        let mut transport = RecordingTransport::default();
        long_tick(&mut log, &mut transport);
        assert_eq!(transport.unreliable_all.len(), 1);
        assert_eq!(transport.unreliable_all[0].0, MessageKind::CallbackTriggered);
    }
}
