//! Message dispatch (C4). One function per wire kind plus
//! `start_instance`, all operating on a single named [`Log`]. Every
//! handler's first line is the watermark drop
//! (`consnsusId <= minTriggered` in `consensus.c`), mirrored here as
//! `log.is_stale(...)`.
//!
//! These are free functions rather than methods on `Log` so that the
//! cross-cutting pieces they need (a `Transport`, the cluster size, the
//! local node id, the backoff bounds) are explicit parameters instead
//! of fields `Log` would otherwise have to carry just for their sake.
//! [`crate::engine::Engine`] is the thing that actually owns all of
//! that context and calls into this module.

use rand::Rng;

use crate::instance::{self, Phase};
use crate::log::Log;
use crate::message::{
    Accept, AcceptDenied, CallbackTriggered, Denied, LastIdTriggered, LearnValue, MessageKind,
    Recruit, Recruited, ValueAccepted,
};
use crate::node_id::NodeId;
use crate::transport::Transport;

fn majority(cluster_size: usize) -> usize {
    cluster_size / 2 + 1
}

/// Starts a brand-new (or coalesced) local proposal for `payload`
/// (spec §4.3, `Consensus_StartInstance`/`Consensus_Send`). Framed with
/// the submitter's node id so two nodes proposing the same bytes never
/// collide, then broadcast as a `Recruit` at proposal id 1.
pub fn start_instance<Ctx: Clone>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    my_id: NodeId,
    payload: &[u8],
    user_context: Option<Ctx>,
) {
    let log_name = log.name.clone();
    let framed = instance::frame_value(&my_id, payload);
    let (instance_id, proposal_id) = {
        let inst = log.instances_mut().create_local_or_coalesce();
        inst.proposer.candidate_value = Some(framed.clone());
        inst.proposer.proposal_id = 1;
        inst.user_context = user_context;
        inst.learner.original_value = Some(framed);
        (inst.id, inst.proposer.proposal_id)
    };
    if ::log::log_enabled!(::log::Level::Info) {
        ::log::info!(
            "[log={} node={}] starting instance={} pid=1",
            log_name, my_id, instance_id
        );
    }
    let recruit = Recruit {
        log: log_name,
        instance_id,
        proposal_id,
    };
    transport.send_reliable_to_all_and_self(MessageKind::Recruit, &recruit.encode());
}

/// Acceptor side of Phase 1 (`Consensus_RecruitMessage`).
pub fn handle_recruit<Ctx>(log: &mut Log<Ctx>, transport: &mut dyn Transport, sender: NodeId, msg: Recruit) {
    if log.is_stale(msg.instance_id) {
        ::log::trace!("[log={}] dropping stale Recruit instance={}", msg.log, msg.instance_id);
        return;
    }
    let log_name = log.name.clone();
    let (recruited, old_proposal_id, promised, accepted_value) = {
        let inst = log.instances_mut().get_or_create(msg.instance_id);
        let old_proposal_id = inst.acceptor.promised_proposal_id;
        let recruited = msg.proposal_id > old_proposal_id;
        if recruited {
            inst.acceptor.promised_proposal_id = msg.proposal_id;
        }
        (
            recruited,
            old_proposal_id,
            inst.acceptor.promised_proposal_id,
            inst.acceptor.accepted_value.clone(),
        )
    };
    if recruited {
        let reply = Recruited {
            log: log_name,
            instance_id: msg.instance_id,
            proposal_id: promised,
            old_proposal_id,
            accepted_value,
        };
        transport.send_reliable_to(&sender, MessageKind::Recruited, &reply.encode());
    } else {
        let reply = Denied {
            log: log_name,
            instance_id: msg.instance_id,
            proposal_id: promised,
        };
        transport.send_reliable_to(&sender, MessageKind::Denied, &reply.encode());
    }
}

/// Proposer side of a Phase 1 promise (`Consensus_RecruitedMessage`).
pub fn handle_recruited<Ctx>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    cluster_size: usize,
    msg: Recruited,
) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let log_name = log.name.clone();
    let broadcast = {
        let inst = log.instances_mut().get_mut(msg.instance_id);
        if inst.phase != Phase::Phase1Prepare {
            return;
        }
        if inst.proposer.proposal_id != msg.proposal_id {
            assert!(
                inst.proposer.proposal_id > msg.proposal_id,
                "Recruited for a proposal id higher than ours: invariant violation"
            );
            return;
        }
        if let Some(accepted) = &msg.accepted_value {
            if inst.proposer.highest_seen_proposal_id < msg.old_proposal_id {
                inst.proposer.candidate_value = Some(accepted.clone());
                inst.proposer.highest_seen_proposal_id = msg.old_proposal_id;
            }
        }
        inst.proposer.recruited_count += 1;
        if inst.proposer.recruited_count == majority(cluster_size) {
            inst.phase = Phase::Phase2Accept;
            Some(
                inst.proposer
                    .candidate_value
                    .clone()
                    .expect("phase 1 majority without a candidate value: invariant violation"),
            )
        } else {
            None
        }
    };
    if let Some(value) = broadcast {
        let accept = Accept {
            log: log_name,
            instance_id: msg.instance_id,
            proposal_id: msg.proposal_id,
            value,
        };
        transport.send_reliable_to_all_and_self(MessageKind::Accept, &accept.encode());
    }
}

/// A Phase 1 rejection (`Consensus_DeniedMessage`): bump the proposal
/// id past what was rejected and retry after a randomized backoff, so
/// two competing proposers don't live-lock by retrying in lockstep.
pub fn handle_denied<Ctx>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    backoff_start_ms: u64,
    backoff_end_ms: u64,
    msg: Denied,
) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let log_name = log.name.clone();
    let new_proposal_id = {
        let inst = log.instances_mut().get_mut(msg.instance_id);
        if inst.phase != Phase::Phase1Prepare {
            return;
        }
        if inst.proposer.proposal_id > msg.proposal_id {
            return;
        }
        inst.proposer.proposal_id = msg.proposal_id + 1;
        inst.proposer.recruited_count = 0;
        inst.proposer.accepted_count = 0;
        inst.proposer.highest_seen_proposal_id = 0;
        inst.proposer.proposal_id
    };
    retry_recruit(log_name, msg.instance_id, new_proposal_id, transport, backoff_start_ms, backoff_end_ms);
}

/// Acceptor side of Phase 2 (`Consensus_AcceptMessage`).
pub fn handle_accept<Ctx>(log: &mut Log<Ctx>, transport: &mut dyn Transport, sender: NodeId, msg: Accept) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let log_name = log.name.clone();
    let outcome = {
        let inst = log.instances_mut().get_mut(msg.instance_id);
        if inst.acceptor.promised_proposal_id != msg.proposal_id {
            assert!(
                inst.acceptor.promised_proposal_id > msg.proposal_id,
                "Accept for a proposal id we never promised: invariant violation"
            );
            Err(inst.acceptor.promised_proposal_id)
        } else {
            inst.acceptor.accepted_value = Some(msg.value.clone());
            Ok(())
        }
    };
    match outcome {
        Err(promised) => {
            let deny = AcceptDenied {
                log: log_name,
                instance_id: msg.instance_id,
                proposal_id: promised,
            };
            transport.send_reliable_to(&sender, MessageKind::AcceptDenied, &deny.encode());
        }
        Ok(()) => {
            let accepted = ValueAccepted {
                log: log_name.clone(),
                instance_id: msg.instance_id,
                proposal_id: msg.proposal_id,
            };
            transport.send_reliable_to(&sender, MessageKind::ValueAccepted, &accepted.encode());
            let learn = LearnValue {
                log: log_name,
                instance_id: msg.instance_id,
                proposal_id: msg.proposal_id,
                value: msg.value,
            };
            transport.send_reliable_to_all_and_self(MessageKind::LearnValue, &learn.encode());
        }
    }
}

/// A Phase 2 rejection (`Consensus_AcceptDeniedMessage`): same backoff
/// idea as `handle_denied`, but also falls back to Phase 1.
pub fn handle_accept_denied<Ctx>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    backoff_start_ms: u64,
    backoff_end_ms: u64,
    msg: AcceptDenied,
) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let log_name = log.name.clone();
    let new_proposal_id = {
        let inst = log.instances_mut().get_mut(msg.instance_id);
        if inst.phase != Phase::Phase2Accept {
            return;
        }
        if inst.proposer.proposal_id > msg.proposal_id {
            return;
        }
        inst.proposer.proposal_id = msg.proposal_id + 1;
        inst.proposer.recruited_count = 0;
        inst.proposer.accepted_count = 0;
        inst.proposer.highest_seen_proposal_id = 0;
        inst.phase = Phase::Phase1Prepare;
        inst.proposer.proposal_id
    };
    retry_recruit(log_name, msg.instance_id, new_proposal_id, transport, backoff_start_ms, backoff_end_ms);
}

fn retry_recruit(
    log_name: String,
    instance_id: u64,
    proposal_id: u64,
    transport: &mut dyn Transport,
    backoff_start_ms: u64,
    backoff_end_ms: u64,
) {
    let recruit = Recruit {
        log: log_name,
        instance_id,
        proposal_id,
    };
    let delay_ms = if backoff_start_ms == backoff_end_ms {
        backoff_start_ms
    } else {
        rand::thread_rng().gen_range(backoff_start_ms..=backoff_end_ms)
    };
    transport.send_delayed_to_all_and_self(MessageKind::Recruit, &recruit.encode(), delay_ms);
}

/// Tally of acceptances (`Consensus_ValueAcceptedMessage`).
pub fn handle_value_accepted<Ctx>(log: &mut Log<Ctx>, cluster_size: usize, msg: ValueAccepted) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let inst = log.instances_mut().get_mut(msg.instance_id);
    if inst.phase != Phase::Phase2Accept {
        return;
    }
    if inst.proposer.proposal_id != msg.proposal_id {
        assert!(
            inst.proposer.proposal_id > msg.proposal_id,
            "ValueAccepted for a proposal id higher than ours: invariant violation"
        );
        return;
    }
    inst.proposer.accepted_count += 1;
    if inst.proposer.accepted_count == majority(cluster_size) {
        inst.phase = Phase::Done;
    }
}

/// Tally of learned values (`Consensus_LearnValueMessage`). Resubmits
/// this node's own value under a fresh instance if it lost the race
/// for this one.
pub fn handle_learn_value<Ctx: Clone>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    my_id: NodeId,
    cluster_size: usize,
    msg: LearnValue,
) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let resend = {
        let inst = log.instances_mut().get_or_create(msg.instance_id);
        if inst.learner.learning_proposal_id > msg.proposal_id {
            return;
        }
        if inst.learner.learning_proposal_id < msg.proposal_id {
            inst.learner.learning_proposal_id = msg.proposal_id;
            inst.learner.learn_count = 1;
            return;
        }
        inst.learner.learn_count += 1;
        if inst.learner.learn_count != majority(cluster_size) || inst.learner.learned {
            None
        } else {
            inst.learner.learned_value = Some(msg.value.clone());
            inst.learner.learned = true;
            lost_race_resubmission(inst, &msg.value)
        }
    };
    if let Some((payload, ctx)) = resend {
        start_instance(log, transport, my_id, &payload, ctx);
    }
    log.try_deliver();
}

/// Anti-entropy rebroadcast of an already-decided value
/// (`Consensus_CallbackTriggered`). Same lost-race resubmission rule
/// as `handle_learn_value`.
pub fn handle_callback_triggered<Ctx: Clone>(
    log: &mut Log<Ctx>,
    transport: &mut dyn Transport,
    my_id: NodeId,
    msg: CallbackTriggered,
) {
    if log.is_stale(msg.instance_id) {
        return;
    }
    let resend = {
        let inst = log.instances_mut().get_or_create(msg.instance_id);
        if inst.learner.learned {
            None
        } else {
            inst.learner.learned_value = Some(msg.value.clone());
            inst.learner.learned = true;
            lost_race_resubmission(inst, &msg.value)
        }
    };
    if let Some((payload, ctx)) = resend {
        start_instance(log, transport, my_id, &payload, ctx);
    }
    log.try_deliver();
}

/// If this node had an original submission pending for `inst` and the
/// value that actually won is different, unframe and hand back the
/// original payload plus context for resubmission under a new instance.
fn lost_race_resubmission<Ctx: Clone>(
    inst: &mut crate::instance::Instance<Ctx>,
    won: &[u8],
) -> Option<(Vec<u8>, Option<Ctx>)> {
    match &inst.learner.original_value {
        Some(original) if !instance::values_equal(Some(original.as_slice()), Some(won)) => {
            Some((instance::unframe_value(original).to_vec(), inst.user_context.clone()))
        }
        _ => None,
    }
}

/// Watermark gossip (`Consensus_LastIdTriggered`). Unlike every other
/// handler this one is not gated by `is_stale`: it is how the
/// watermark itself advances.
pub fn handle_last_id_triggered<Ctx>(
    log: &mut Log<Ctx>,
    sender: NodeId,
    cluster_size: usize,
    msg: LastIdTriggered,
) {
    log.record_peer_last_delivered(sender, msg.last_delivered_id, cluster_size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use crate::message::MessageKind;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingTransport {
        sent_to: Vec<(NodeId, MessageKind, Vec<u8>)>,
        broadcast: Vec<(MessageKind, Vec<u8>)>,
        delayed_broadcast: Vec<(MessageKind, Vec<u8>, u64)>,
    }

    impl Transport for RecordingTransport {
        fn send_reliable_to(&mut self, target: &NodeId, kind: MessageKind, payload: &[u8]) {
            self.sent_to.push((*target, kind, payload.to_vec()));
        }
        fn send_reliable_to_all(&mut self, kind: MessageKind, payload: &[u8]) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_reliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_reliable_to_self(&mut self, kind: MessageKind, payload: &[u8]) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_unreliable_to_all(&mut self, kind: MessageKind, payload: &[u8]) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_unreliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_delayed_to_self(&mut self, kind: MessageKind, payload: &[u8], _delay_ms: u64) {
            self.broadcast.push((kind, payload.to_vec()));
        }
        fn send_delayed_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8], delay_ms: u64) {
            self.delayed_broadcast.push((kind, payload.to_vec(), delay_ms));
        }
        fn send_periodic_to_self(&mut self, _kind: MessageKind, _period_ms: u64) {}
    }

    fn new_log() -> Log<()> {
        Log::new("test", Box::new(|_: &[u8], _: Option<&()>| {}), None)
    }

    #[test]
    fn recruit_promises_when_proposal_id_is_higher() {
        let mut log = new_log();
        let mut transport = RecordingTransport::default();
        let sender = NodeId::random();
        handle_recruit(
            &mut log,
            &mut transport,
            sender,
            Recruit { log: "test".into(), instance_id: 0, proposal_id: 5 },
        );
        assert_eq!(log.instances().get(0).acceptor.promised_proposal_id, 5);
        assert_eq!(transport.sent_to.len(), 1);
        assert_eq!(transport.sent_to[0].1, MessageKind::Recruited);
    }

    #[test]
    fn recruit_denies_when_proposal_id_is_not_higher() {
        let mut log = new_log();
        let mut transport = RecordingTransport::default();
        let sender = NodeId::random();
        log.instances_mut().get_or_create(0).acceptor.promised_proposal_id = 5;
        handle_recruit(
            &mut log,
            &mut transport,
            sender,
            Recruit { log: "test".into(), instance_id: 0, proposal_id: 3 },
        );
        assert_eq!(transport.sent_to[0].1, MessageKind::Denied);
        let denied = Denied::decode(&transport.sent_to[0].2).unwrap();
        assert_eq!(denied.proposal_id, 5);
    }

    #[test]
    fn recruited_majority_broadcasts_accept() {
        let mut log = new_log();
        let mut transport = RecordingTransport::default();
        {
            let inst = log.instances_mut().get_or_create(0);
            inst.proposer.proposal_id = 1;
            inst.proposer.candidate_value = Some(b"value".to_vec());
        }
        handle_recruited(
            &mut log,
            &mut transport,
            3,
            Recruited {
                log: "test".into(),
                instance_id: 0,
                proposal_id: 1,
                old_proposal_id: 0,
                accepted_value: None,
            },
        );
        assert!(transport.broadcast.is_empty());
        handle_recruited(
            &mut log,
            &mut transport,
            3,
            Recruited {
                log: "test".into(),
                instance_id: 0,
                proposal_id: 1,
                old_proposal_id: 0,
                accepted_value: None,
            },
        );
        assert_eq!(transport.broadcast.len(), 1);
        assert_eq!(transport.broadcast[0].0, MessageKind::Accept);
        assert_eq!(log.instances().get(0).phase, Phase::Phase2Accept);
    }

    #[test]
    fn accept_then_learn_value_majority_delivers() {
        let delivered: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let d = delivered.clone();
        let node = NodeId::random();
        let mut log = Log::new(
            "test",
            Box::new(move |v: &[u8], _: Option<&()>| d.borrow_mut().push(v.to_vec())),
            None,
        );
        let mut transport = RecordingTransport::default();
        let framed = instance::frame_value(&node, b"payload");
        log.instances_mut().get_or_create(0).acceptor.promised_proposal_id = 1;

        for _ in 0..3 {
            handle_accept(
                &mut log,
                &mut transport,
                node,
                Accept { log: "test".into(), instance_id: 0, proposal_id: 1, value: framed.clone() },
            );
        }
        // Each Accept broadcasts a LearnValue to "all and self"; a real
        // cluster would deliver that to every node once, so replay the
        // distinct LearnValue payloads captured in the broadcast log.
        let learns: Vec<_> = transport
            .broadcast
            .iter()
            .filter(|(k, _)| *k == MessageKind::LearnValue)
            .cloned()
            .collect();
        let mut reconciled = HashMap::new();
        for (_, payload) in learns {
            let msg = LearnValue::decode(&payload).unwrap();
            reconciled.insert(msg.instance_id, msg);
        }
        let msg = reconciled.remove(&0).unwrap();
        for _ in 0..3 {
            handle_learn_value(&mut log, &mut transport, node, 3, msg.clone());
        }
        assert_eq!(delivered.borrow().as_slice(), &[b"payload".to_vec()]);
    }

    #[test]
    fn denied_schedules_delayed_retry_with_bumped_proposal_id() {
        let mut log = new_log();
        let mut transport = RecordingTransport::default();
        log.instances_mut().get_or_create(0).proposer.proposal_id = 3;
        handle_denied(
            &mut log,
            &mut transport,
            10,
            20,
            Denied { log: "test".into(), instance_id: 0, proposal_id: 5 },
        );
        assert_eq!(log.instances().get(0).proposer.proposal_id, 6);
        assert_eq!(transport.delayed_broadcast.len(), 1);
        let (kind, payload, delay) = &transport.delayed_broadcast[0];
        assert_eq!(*kind, MessageKind::Recruit);
        assert!((10..=20).contains(delay));
        let recruit = Recruit::decode(payload).unwrap();
        assert_eq!(recruit.proposal_id, 6);
    }

    #[test]
    fn stale_instance_id_is_silently_dropped() {
        let mut log = new_log();
        let mut transport = RecordingTransport::default();
        log.record_peer_last_delivered(NodeId::random(), 5, 1);
        assert_eq!(log.cluster_min_delivered(), 5);
        handle_recruit(
            &mut log,
            &mut transport,
            NodeId::random(),
            Recruit { log: "test".into(), instance_id: 2, proposal_id: 1 },
        );
        assert!(!log.instances().contains(2));
        assert!(transport.sent_to.is_empty());
    }
}
