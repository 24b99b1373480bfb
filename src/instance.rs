//! Per-instance data model and store (C2, C3; spec §3, §4.2, §4.3).
//!
//! Every node plays proposer, acceptor, and learner for every
//! instance, so a single [`Instance`] owns all three sub-states side
//! by side — a deliberate departure from the teacher's
//! `ProposerState<T>`/`AcceptorState<T>` living in separate
//! role-specific processes. The field names and the manual `Default`
//! impls are kept the way the teacher writes them
//! (`HashMap::entry().or_default()`-friendly), and every field is a
//! rename of the matching member in the original module's
//! `ConsensusInstance` struct (`consensus.c`).

use serde_derive::Serialize;

use crate::node_id::NodeId;

pub type InstanceId = u64;
pub type ProposalId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Phase1Prepare,
    Phase2Accept,
    Done,
}

/// Proposer sub-state for one instance (`consensus.c`'s `proposer` struct member).
#[derive(Debug)]
pub struct ProposerState {
    pub proposal_id: ProposalId,
    pub recruited_count: usize,
    pub accepted_count: usize,
    pub candidate_value: Option<Vec<u8>>,
    /// The highest old proposal id seen across `Recruited` replies so
    /// far, used to decide whether to adopt a peer's already-accepted
    /// value (strict `<` gate, spec §9 Open Question 1).
    pub highest_seen_proposal_id: ProposalId,
}

impl Default for ProposerState {
    fn default() -> Self {
        ProposerState {
            proposal_id: 0,
            recruited_count: 0,
            accepted_count: 0,
            candidate_value: None,
            highest_seen_proposal_id: 0,
        }
    }
}

/// Acceptor sub-state for one instance. Exactly one promised proposal
/// id and at most one accepted value, persistent for the instance's
/// lifetime (spec §4.3).
#[derive(Debug, Default)]
pub struct AcceptorState {
    pub promised_proposal_id: ProposalId,
    pub accepted_value: Option<Vec<u8>>,
}

/// Learner sub-state for one instance.
#[derive(Debug)]
pub struct LearnerState {
    pub learning_proposal_id: ProposalId,
    pub learn_count: usize,
    pub learned: bool,
    pub learned_value: Option<Vec<u8>>,
    /// Set only on the node that originally submitted a value for this
    /// instance; used to detect whether this node's own proposal lost
    /// the race and needs resubmission (spec §4.3).
    pub original_value: Option<Vec<u8>>,
    pub callback_fired: bool,
}

impl Default for LearnerState {
    fn default() -> Self {
        LearnerState {
            learning_proposal_id: 0,
            learn_count: 0,
            learned: false,
            learned_value: None,
            original_value: None,
            callback_fired: false,
        }
    }
}

/// A single agreement round. `user_context` is the host-supplied token
/// handed back through the approved callback when this node's own
/// submission wins the round (spec §3's "opaque pointer"); Rust has no
/// use for an actual pointer here, so it is stored by value.
pub struct Instance<Ctx> {
    pub id: InstanceId,
    pub phase: Phase,
    pub proposer: ProposerState,
    pub acceptor: AcceptorState,
    pub learner: LearnerState,
    pub user_context: Option<Ctx>,
}

impl<Ctx> Instance<Ctx> {
    fn new(id: InstanceId) -> Self {
        Instance {
            id,
            phase: Phase::Phase1Prepare,
            proposer: ProposerState::default(),
            acceptor: AcceptorState::default(),
            learner: LearnerState::default(),
            user_context: None,
        }
    }
}

/// Ordered collection of instances for one log, descending by id
/// (head = newest), matching `consensus.c`'s `consensusInstances`
/// intrusive list and its insertion/lookup walk.
pub struct InstanceStore<Ctx> {
    instances: Vec<Instance<Ctx>>,
    next_id: InstanceId,
}

impl<Ctx> InstanceStore<Ctx> {
    pub fn new() -> Self {
        InstanceStore {
            instances: Vec::new(),
            next_id: 0,
        }
    }

    /// Head-to-tail walk, stopping as soon as the current id is below
    /// the target — correct because the vec is sorted descending
    /// (spec §4.2).
    fn position(&self, id: InstanceId) -> Option<usize> {
        for (i, inst) in self.instances.iter().enumerate() {
            if inst.id == id {
                return Some(i);
            }
            if inst.id < id {
                return None;
            }
        }
        None
    }

    /// Invariant violation if missing — spec §7 treats this as a bug
    /// in the state machine, not a recoverable condition.
    pub fn get(&self, id: InstanceId) -> &Instance<Ctx> {
        let idx = self
            .position(id)
            .unwrap_or_else(|| panic!("get({}) on missing instance: invariant violation", id));
        &self.instances[idx]
    }

    pub fn get_mut(&mut self, id: InstanceId) -> &mut Instance<Ctx> {
        let idx = self
            .position(id)
            .unwrap_or_else(|| panic!("get({}) on missing instance: invariant violation", id));
        &mut self.instances[idx]
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.position(id).is_some()
    }

    /// Non-panicking lookup, used by the delivery/reclaim loops which
    /// must stop cleanly at the first not-yet-created instance rather
    /// than treating it as a bug.
    pub fn try_get(&self, id: InstanceId) -> Option<&Instance<Ctx>> {
        self.position(id).map(|idx| &self.instances[idx])
    }

    /// Fetches the instance for `id`, creating a fresh one (phase
    /// `Phase1Prepare`, default sub-states) if it does not yet exist.
    /// Used by message handlers for ids referenced by an inbound
    /// message (spec §3's "created ... when a message arrives
    /// referencing an id that does not yet exist").
    pub fn get_or_create(&mut self, id: InstanceId) -> &mut Instance<Ctx> {
        if let Some(idx) = self.position(id) {
            return &mut self.instances[idx];
        }
        let insert_at = self
            .instances
            .iter()
            .position(|inst| inst.id < id)
            .unwrap_or(self.instances.len());
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        self.instances.insert(insert_at, Instance::new(id));
        &mut self.instances[insert_at]
    }

    /// Allocates a brand-new instance using `next_id`, always — the
    /// "(b) always allocate" alternative from spec §9's design note.
    /// `create_local` (the public entry point from the log manager)
    /// uses this only after failing the coalescing check below.
    fn create_local(&mut self) -> &mut Instance<Ctx> {
        let id = self.next_id;
        self.next_id += 1;
        self.instances.insert(0, Instance::new(id));
        &mut self.instances[0]
    }

    /// `create_local()` with the `get_or_create(-1)` coalescing
    /// optimization preserved (spec §4.2, §9 Design Note): if the
    /// current head exists and has not yet learned, reuse it instead
    /// of allocating a new id, so a rapid second local submission
    /// merges into the in-flight instance rather than wasting a round.
    /// Rust's `Option`/ownership make the `-1` sentinel unnecessary —
    /// this method name says directly what the C `id == -1` special
    /// case meant.
    pub fn create_local_or_coalesce(&mut self) -> &mut Instance<Ctx> {
        let coalesce = self
            .instances
            .first()
            .map(|head| !head.learner.learned)
            .unwrap_or(false);
        if coalesce {
            self.instances.first_mut().unwrap()
        } else {
            self.create_local()
        }
    }

    /// Pops every instance with `id <= watermark` off the tail (the
    /// smallest ids), in ascending-id order, for reclaim (spec §4.6).
    /// Correct and O(removed) because the tail of a descending-sorted
    /// vec holds the smallest ids.
    pub fn drain_reclaimable(&mut self, watermark: i64) -> Vec<Instance<Ctx>> {
        let mut drained = Vec::new();
        while let Some(last) = self.instances.last() {
            if (last.id as i64) <= watermark {
                drained.push(self.instances.pop().unwrap());
            } else {
                break;
            }
        }
        drained
    }

    /// Iterates from the tail (oldest) toward the head (newest), i.e.
    /// ascending by instance id — the order ordered delivery and the
    /// periodic tasks both walk in (spec §4.5, §4.6).
    pub fn iter_ascending(&self) -> impl Iterator<Item = &Instance<Ctx>> {
        self.instances.iter().rev()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}

/// Byte-identical comparison of two optional values: two `None`s are
/// equal, a `None`/`Some` pair is never equal. `consensus.c`'s
/// `Consensus_ValEquals` only `memcmp`s the first
/// `REDISMODULE_NODE_ID_LEN` (40) bytes, i.e. the node-id prefix; this
/// compares the full value instead, a deliberate divergence spec §4.5
/// requires ("byte-identical, including node-id prefix") — do not
/// narrow this back to a 40-byte prefix compare.
pub fn values_equal(a: Option<&[u8]>, b: Option<&[u8]>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(_), None) | (None, Some(_)) => false,
        (Some(a), Some(b)) => a == b,
    }
}

/// Prefixes `payload` with the submitter's node id (spec §3's "value
/// framing"), so identical payloads submitted by distinct nodes never
/// collide as proposed values.
pub fn frame_value(node_id: &NodeId, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(crate::node_id::NODE_ID_LEN + payload.len());
    framed.extend_from_slice(node_id.as_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Strips the node-id prefix a framed value carries, returning the
/// payload a host callback should see.
pub fn unframe_value(framed: &[u8]) -> &[u8] {
    &framed[crate::node_id::NODE_ID_LEN..]
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestStore = InstanceStore<u32>;

    #[test]
    fn get_or_create_inserts_in_descending_order() {
        let mut store: TestStore = InstanceStore::new();
        store.get_or_create(5);
        store.get_or_create(2);
        store.get_or_create(8);
        let ids: Vec<InstanceId> = store.iter_ascending().map(|i| i.id).collect();
        // iter_ascending walks tail-to-head, i.e. ascending.
        assert_eq!(ids, vec![2, 5, 8]);
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn get_on_missing_instance_panics() {
        let store: TestStore = InstanceStore::new();
        store.get(0);
    }

    #[test]
    fn create_local_or_coalesce_reuses_unlearned_head() {
        let mut store: TestStore = InstanceStore::new();
        let first_id = store.create_local_or_coalesce().id;
        let second_id = store.create_local_or_coalesce().id;
        assert_eq!(first_id, second_id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn create_local_or_coalesce_allocates_fresh_once_learned() {
        let mut store: TestStore = InstanceStore::new();
        let first_id = store.create_local_or_coalesce().id;
        store.get_mut(first_id).learner.learned = true;
        let second_id = store.create_local_or_coalesce().id;
        assert_ne!(first_id, second_id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn drain_reclaimable_only_removes_at_or_below_watermark() {
        let mut store: TestStore = InstanceStore::new();
        for id in 0..5u64 {
            store.get_or_create(id);
        }
        let drained = store.drain_reclaimable(2);
        let drained_ids: Vec<InstanceId> = drained.iter().map(|i| i.id).collect();
        assert_eq!(drained_ids, vec![0, 1, 2]);
        assert_eq!(store.len(), 2);
        assert!(store.contains(3));
        assert!(store.contains(4));
    }

    #[test]
    fn value_framing_round_trips() {
        let node = NodeId::random();
        let framed = frame_value(&node, b"hello");
        assert_eq!(unframe_value(&framed), b"hello");
        assert_eq!(&framed[..crate::node_id::NODE_ID_LEN], node.as_bytes());
    }

    #[test]
    fn value_equality_matches_c_semantics() {
        assert!(values_equal(None, None));
        assert!(!values_equal(Some(b"a"), None));
        assert!(!values_equal(None, Some(b"a")));
        assert!(values_equal(Some(b"a"), Some(b"a")));
        assert!(!values_equal(Some(b"a"), Some(b"b")));
    }
}
