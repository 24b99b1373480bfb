//! Public API (C7; spec §4.7).
//!
//! [`Engine`] is the single process-owned object spec §9's design note
//! blesses as the alternative to a global `consensusDict`: it owns a
//! `logs: HashMap<String, Log<Ctx>>` registry and nothing else. A host
//! wires it up by calling [`Engine::create_log`] for every named log
//! it wants on every node (all nodes must agree on the set of names),
//! then feeds every inbound wire message to [`Engine::on_message`] and
//! every periodic firing of [`crate::message::MessageKind::ShortTick`]/
//! `LongTick` to the same method. Both are expected to run under the
//! host's mutual-exclusion handler (spec §5) — `Engine` itself holds
//! no lock.

use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::handlers;
use crate::log::{AppliedOnClusterCallback, ApprovedCallback, Log};
use crate::message::{
    Accept, AcceptDenied, CallbackTriggered, Denied, LastIdTriggered, LearnValue, MessageKind,
    Recruit, Recruited, ValueAccepted,
};
use crate::node_id::NodeId;
use crate::periodic;
use crate::transport::{Cluster, Transport};

pub struct Engine<Ctx> {
    config: EngineConfig,
    logs: HashMap<String, Log<Ctx>>,
    ticks_registered: bool,
}

impl<Ctx: Clone> Engine<Ctx> {
    pub fn new(config: EngineConfig) -> Self {
        Engine {
            config,
            logs: HashMap::new(),
            ticks_registered: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn log(&self, name: &str) -> Option<&Log<Ctx>> {
        self.logs.get(name)
    }

    pub fn log_mut(&mut self, name: &str) -> Option<&mut Log<Ctx>> {
        self.logs.get_mut(name)
    }

    pub fn logs(&self) -> impl Iterator<Item = &Log<Ctx>> {
        self.logs.values()
    }

    /// Registers a new named log (spec §4.7's `create_log`). The
    /// short/long periodic self-sends are registered only once, the
    /// first time any log is created — every log in this engine
    /// shares the same tick cadence (spec §1: "share transport and
    /// scheduling but never share state"), so there is no point
    /// re-registering a second pair of timers per log.
    ///
    /// Returns the log's name as its handle: every other `Engine`
    /// method re-identifies a log by name, so the handle is just that
    /// name rather than an opaque id.
    pub fn create_log(
        &mut self,
        name: impl Into<String>,
        transport: &mut dyn Transport,
        approved_cb: ApprovedCallback<Ctx>,
        applied_on_cluster_cb: Option<AppliedOnClusterCallback<Ctx>>,
    ) -> String {
        let name = name.into();
        if !self.ticks_registered {
            periodic::register_ticks(transport, self.config.short_tick_ms, self.config.long_tick_ms);
            self.ticks_registered = true;
        }
        self.logs.insert(
            name.clone(),
            Log::new(name.clone(), approved_cb, applied_on_cluster_cb),
        );
        name
    }

    /// Submits a value for agreement (spec §4.7, §8 S6).
    ///
    /// Out of cluster mode there is nothing to agree on: the callback
    /// fires synchronously with the raw payload and no message is
    /// sent. In cluster mode the value is framed with this node's id
    /// and handed to the proposer state machine.
    ///
    /// The original module routes this hand-off through a self-sent
    /// `Consensus_StartInstance` message so the proposer state is
    /// always constructed on the handler thread rather than whatever
    /// thread called `submit` (spec §9's "self-send as continuation").
    /// `Engine` has no thread of its own to hop away from — the host's
    /// mutual-exclusion handler (spec §5) already guarantees `submit`
    /// itself runs serialized with every handler — so `start_instance`
    /// is called directly here instead of via a round-trip through
    /// `Transport`. No behavior differs: the proposer state still only
    /// ever changes under the single serialization point spec §5
    /// requires.
    pub fn submit(
        &mut self,
        log_name: &str,
        transport: &mut dyn Transport,
        cluster: &dyn Cluster,
        payload: &[u8],
        user_context: Option<Ctx>,
    ) {
        let log = self
            .logs
            .get_mut(log_name)
            .unwrap_or_else(|| panic!("submit on unknown log {:?}: invariant violation", log_name));

        if !cluster.is_cluster_mode() {
            log.deliver_directly(payload, user_context.as_ref());
            return;
        }

        handlers::start_instance(log, transport, cluster.my_node_id(), payload, user_context);
    }

    /// Dispatches one inbound message (spec §4.4) or periodic tick
    /// firing to the right log(s). `sender` is ignored (and may be any
    /// value) for `ShortTick`/`LongTick`/`StartInstance`, which are
    /// self-sends rather than peer messages.
    pub fn on_message(
        &mut self,
        transport: &mut dyn Transport,
        cluster: &dyn Cluster,
        sender: NodeId,
        kind: MessageKind,
        payload: &[u8],
    ) {
        let cluster_size = cluster.cluster_size();
        match kind {
            MessageKind::Recruit => {
                let msg = Recruit::decode(payload).expect("malformed Recruit frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_recruit(log, transport, sender, msg);
                }
            }
            MessageKind::Recruited => {
                let msg = Recruited::decode(payload).expect("malformed Recruited frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_recruited(log, transport, cluster_size, msg);
                }
            }
            MessageKind::Denied => {
                let msg = Denied::decode(payload).expect("malformed Denied frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_denied(
                        log,
                        transport,
                        self.config.idle_backoff_start_ms,
                        self.config.idle_backoff_end_ms,
                        msg,
                    );
                }
            }
            MessageKind::Accept => {
                let msg = Accept::decode(payload).expect("malformed Accept frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_accept(log, transport, sender, msg);
                }
            }
            MessageKind::AcceptDenied => {
                let msg =
                    AcceptDenied::decode(payload).expect("malformed AcceptDenied frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_accept_denied(
                        log,
                        transport,
                        self.config.idle_backoff_start_ms,
                        self.config.idle_backoff_end_ms,
                        msg,
                    );
                }
            }
            MessageKind::ValueAccepted => {
                let msg =
                    ValueAccepted::decode(payload).expect("malformed ValueAccepted frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_value_accepted(log, cluster_size, msg);
                }
            }
            MessageKind::LearnValue => {
                let msg = LearnValue::decode(payload).expect("malformed LearnValue frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_learn_value(log, transport, cluster.my_node_id(), cluster_size, msg);
                }
            }
            MessageKind::CallbackTriggered => {
                let msg = CallbackTriggered::decode(payload)
                    .expect("malformed CallbackTriggered frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_callback_triggered(log, transport, cluster.my_node_id(), msg);
                }
            }
            MessageKind::LastIdTriggered => {
                let msg = LastIdTriggered::decode(payload)
                    .expect("malformed LastIdTriggered frame from trusted peer");
                if let Some(log) = self.logs.get_mut(&msg.log) {
                    handlers::handle_last_id_triggered(log, sender, cluster_size, msg);
                }
            }
            MessageKind::ShortTick => {
                for log in self.logs.values_mut() {
                    periodic::short_tick(log, transport);
                }
            }
            MessageKind::LongTick => {
                for log in self.logs.values_mut() {
                    periodic::long_tick(log, transport);
                }
            }
            MessageKind::StartInstance => {
                // `submit` calls `handlers::start_instance` directly
                // (see its doc comment); this engine never sends
                // itself a `StartInstance` message, so receiving one
                // indicates a host bug in message routing.
                if ::log::log_enabled!(::log::Level::Warn) {
                    ::log::warn!("received unexpected StartInstance message, ignoring");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::harness::{InMemoryCluster, InMemoryNetwork};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn non_cluster_mode_submit_is_synchronous_and_silent() {
        let delivered: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let d = delivered.clone();
        let mut engine: Engine<u32> = Engine::new(EngineConfig::default());
        let net = InMemoryNetwork::new(vec![NodeId::random()]);
        let mut transport = net.transport_for(0);
        engine.create_log(
            "solo",
            &mut transport,
            Box::new(move |v: &[u8], _ctx: Option<&u32>| d.borrow_mut().push(v.to_vec())),
            None,
        );
        let cluster = InMemoryCluster::new(net.node_id(0), 1, false);
        engine.submit("solo", &mut transport, &cluster, b"z", Some(7));
        assert_eq!(delivered.borrow().as_slice(), &[b"z".to_vec()]);
        assert!(net.drain_outbound(0).is_empty());
    }

    #[test]
    fn cluster_mode_submit_broadcasts_recruit() {
        let mut engine: Engine<()> = Engine::new(EngineConfig::default());
        let net = InMemoryNetwork::new(vec![NodeId::random(), NodeId::random(), NodeId::random()]);
        let mut transport = net.transport_for(0);
        engine.create_log("log", &mut transport, Box::new(|_: &[u8], _: Option<&()>| {}), None);
        let cluster = InMemoryCluster::new(net.node_id(0), 3, true);
        engine.submit("log", &mut transport, &cluster, b"hello", None);
        let outbound = net.drain_outbound(0);
        assert!(outbound.iter().any(|(kind, _)| *kind == MessageKind::Recruit));
    }
}
