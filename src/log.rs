//! Named log registry and bookkeeping (C5; spec §3, §4.5, §4.6).
//!
//! One [`Log`] per logical sequence. It owns its [`InstanceStore`]
//! exclusively, tracks the cluster-wide delivery watermark, and walks
//! instances in ascending id order to deliver decided values to the
//! host in strict, gap-free order — the same
//! `while contains_key(&self.num_of_instances) { ...; += 1 }` shape the
//! teacher's `Learner::print_learned_values` uses, generalized from
//! "print" to "invoke the host's approved callback".

use std::collections::HashMap;

use crate::instance::{self, InstanceId, InstanceStore};
use crate::node_id::NodeId;

pub type ApprovedCallback<Ctx> = Box<dyn FnMut(&[u8], Option<&Ctx>)>;
pub type AppliedOnClusterCallback<Ctx> = Box<dyn FnMut(&[u8], Option<&Ctx>)>;

pub struct Log<Ctx> {
    pub name: String,
    instances: InstanceStore<Ctx>,
    next_deliver_id: InstanceId,
    /// Marker for the most recently delivered instance. The original
    /// module keeps a linked-list node pointer (`lastTrigger`) for
    /// this because C has no safe alternative; an id is enough here
    /// and survives reclaim removing unrelated entries.
    last_delivered_id: Option<InstanceId>,
    peer_last_delivered: HashMap<NodeId, i64>,
    cluster_min_delivered: i64,
    approved_cb: ApprovedCallback<Ctx>,
    applied_on_cluster_cb: Option<AppliedOnClusterCallback<Ctx>>,
}

impl<Ctx: Clone> Log<Ctx> {
    pub fn new(
        name: impl Into<String>,
        approved_cb: ApprovedCallback<Ctx>,
        applied_on_cluster_cb: Option<AppliedOnClusterCallback<Ctx>>,
    ) -> Self {
        Log {
            name: name.into(),
            instances: InstanceStore::new(),
            next_deliver_id: 0,
            last_delivered_id: None,
            peer_last_delivered: HashMap::new(),
            cluster_min_delivered: -1,
            approved_cb,
            applied_on_cluster_cb,
        }
    }

    pub fn instances(&self) -> &InstanceStore<Ctx> {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceStore<Ctx> {
        &mut self.instances
    }

    pub fn cluster_min_delivered(&self) -> i64 {
        self.cluster_min_delivered
    }

    pub fn next_deliver_id(&self) -> InstanceId {
        self.next_deliver_id
    }

    /// Invokes `approved_cb` directly, bypassing the instance store
    /// entirely. Used only by the non-cluster-mode fast path (spec
    /// §4.7, §8 S6): with a single node there is no agreement to run,
    /// so `submit` hands the payload straight to the callback.
    pub fn deliver_directly(&mut self, value: &[u8], additional: Option<&Ctx>) {
        (self.approved_cb)(value, additional);
    }

    /// Drops messages whose instance id is at or below the
    /// cluster-wide watermark — the "very first check" every message
    /// handler performs (spec §4.4).
    pub fn is_stale(&self, instance_id: InstanceId) -> bool {
        instance_id as i64 <= self.cluster_min_delivered
    }

    /// Ordered delivery (spec §4.5). Walks forward from
    /// `next_deliver_id` while the instance exists and has learned;
    /// stops at the first gap or not-yet-learned instance. Re-entrant:
    /// called after every new learning event and once per short tick.
    pub fn try_deliver(&mut self) {
        loop {
            let id = self.next_deliver_id;
            let (payload, additional) = {
                let inst = match self.instances.try_get(id) {
                    Some(inst) => inst,
                    None => return,
                };
                if !inst.learner.learned {
                    return;
                }
                let learned_value = inst
                    .learner
                    .learned_value
                    .as_ref()
                    .expect("learned instance without a learned value: invariant violation");
                let additional = if instance::values_equal(
                    Some(learned_value),
                    inst.learner.original_value.as_deref(),
                ) {
                    inst.user_context.clone()
                } else {
                    None
                };
                (instance::unframe_value(learned_value).to_vec(), additional)
            };

            (self.approved_cb)(&payload, additional.as_ref());

            self.instances.get_mut(id).learner.callback_fired = true;
            self.last_delivered_id = Some(id);
            self.next_deliver_id += 1;
        }
    }

    /// Records a peer's reported `next_deliver_id - 1` and recomputes
    /// `cluster_min_delivered` whenever the reported value actually
    /// changes and every cluster member has reported at least once
    /// (spec §4.4's `LastIdTriggered` handler) — recomputed on every
    /// such update after that point too, not just the first time the
    /// map fills up.
    pub fn record_peer_last_delivered(
        &mut self,
        peer: NodeId,
        last_delivered_id: i64,
        cluster_size: usize,
    ) {
        let changed = self.peer_last_delivered.insert(peer, last_delivered_id)
            != Some(last_delivered_id);
        if changed && self.peer_last_delivered.len() >= cluster_size {
            self.cluster_min_delivered = self
                .peer_last_delivered
                .values()
                .copied()
                .min()
                .expect("cluster_size > 0 implies a non-empty map");
        }
    }

    /// Retires every instance at or below the watermark: fires
    /// `applied_on_cluster_cb`, frees its value buffers, and unlinks
    /// it (spec §4.6's short-tick reclaim). Any such instance has, by
    /// construction of `cluster_min_delivered`, already been learned
    /// and delivered locally.
    pub fn reclaim(&mut self) {
        let watermark = self.cluster_min_delivered;
        let drained = self.instances.drain_reclaimable(watermark);
        for inst in drained {
            if let Some(cb) = self.applied_on_cluster_cb.as_mut() {
                let learned_value = inst
                    .learner
                    .learned_value
                    .as_ref()
                    .expect("reclaiming an unlearned instance: invariant violation");
                let additional = if instance::values_equal(
                    Some(learned_value),
                    inst.learner.original_value.as_deref(),
                ) {
                    inst.user_context.as_ref()
                } else {
                    None
                };
                cb(instance::unframe_value(learned_value), additional);
            }
            if self.last_delivered_id == Some(inst.id) {
                self.last_delivered_id = None;
            }
        }
    }

    /// Instances already delivered locally but not yet safe to
    /// retire — the anti-entropy candidates for the long tick (spec
    /// §4.6).
    pub fn deliverable_not_yet_retired(&self) -> Vec<(InstanceId, Vec<u8>)> {
        if self.last_delivered_id.is_none() {
            return Vec::new();
        }
        self.instances
            .iter_ascending()
            .filter(|inst| {
                inst.id as i64 > self.cluster_min_delivered && inst.learner.callback_fired
            })
            .map(|inst| {
                let value = inst
                    .learner
                    .learned_value
                    .clone()
                    .expect("callback_fired implies learned");
                (inst.id, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_log(delivered: Rc<RefCell<Vec<(Vec<u8>, Option<u32>)>>>) -> Log<u32> {
        let d = delivered.clone();
        Log::new(
            "test",
            Box::new(move |value: &[u8], ctx: Option<&u32>| {
                d.borrow_mut().push((value.to_vec(), ctx.copied()));
            }),
            None,
        )
    }

    fn learn(log: &mut Log<u32>, id: InstanceId, value: Vec<u8>, original: Option<Vec<u8>>, ctx: Option<u32>) {
        let inst = log.instances_mut().get_or_create(id);
        inst.learner.learned = true;
        inst.learner.learned_value = Some(value);
        inst.learner.original_value = original;
        inst.user_context = ctx;
    }

    #[test]
    fn delivers_in_order_and_stops_at_gap() {
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let mut log = make_log(delivered.clone());

        learn(&mut log, 0, b"a".to_vec(), None, None);
        learn(&mut log, 2, b"c".to_vec(), None, None);
        log.try_deliver();

        assert_eq!(delivered.borrow().as_slice(), &[(b"a".to_vec(), None)]);
        assert_eq!(log.next_deliver_id(), 1);

        learn(&mut log, 1, b"b".to_vec(), None, None);
        log.try_deliver();

        assert_eq!(
            delivered.borrow().as_slice(),
            &[
                (b"a".to_vec(), None),
                (b"b".to_vec(), None),
                (b"c".to_vec(), None),
            ]
        );
        assert_eq!(log.next_deliver_id(), 3);
    }

    #[test]
    fn additional_data_only_set_when_value_matches_original() {
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let mut log = make_log(delivered.clone());

        learn(&mut log, 0, b"mine".to_vec(), Some(b"mine".to_vec()), Some(42));
        log.try_deliver();
        assert_eq!(delivered.borrow()[0], (b"mine".to_vec(), Some(42)));

        learn(&mut log, 1, b"theirs".to_vec(), Some(b"mine".to_vec()), Some(7));
        log.try_deliver();
        assert_eq!(delivered.borrow()[1], (b"theirs".to_vec(), None));
    }

    #[test]
    fn watermark_recomputed_once_all_peers_report() {
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let mut log = make_log(delivered);
        let a = NodeId::random();
        let b = NodeId::random();
        let c = NodeId::random();

        log.record_peer_last_delivered(a, 5, 3);
        assert_eq!(log.cluster_min_delivered(), -1);
        log.record_peer_last_delivered(b, 2, 3);
        assert_eq!(log.cluster_min_delivered(), -1);
        log.record_peer_last_delivered(c, 9, 3);
        assert_eq!(log.cluster_min_delivered(), 2);
    }

    #[test]
    fn reclaim_fires_applied_on_cluster_and_unlinks() {
        let delivered = Rc::new(RefCell::new(Vec::new()));
        let applied: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let mut log = make_log(delivered);
        let applied_clone = applied.clone();
        log.applied_on_cluster_cb = Some(Box::new(move |value: &[u8], _ctx: Option<&u32>| {
            applied_clone.borrow_mut().push(value.to_vec());
        }));

        learn(&mut log, 0, b"a".to_vec(), None, None);
        log.try_deliver();
        let node = NodeId::random();
        log.record_peer_last_delivered(node, 0, 1);

        log.reclaim();
        assert_eq!(applied.borrow().as_slice(), &[b"a".to_vec()]);
        assert!(!log.instances().contains(0));
    }
}
