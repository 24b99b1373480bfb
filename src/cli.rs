//! Diagnostic CLI surface (ambient; spec §6's "diagnostic CLI" plus
//! `SPEC_FULL.md` §3.1), grounded on the original module's
//! `Consensus_TestSet`/`Consensus_TestGet`/`Consensus_Info`/
//! `Consensus_ReplyInfo`. This is deliberately data, not wired to any
//! RESP/CLI transport — the actual command surface is host-specific
//! and out of scope (spec §1) — a host's own command dispatcher calls
//! these functions directly.

use std::cell::RefCell;
use std::rc::Rc;

use serde_derive::Serialize;

use crate::engine::Engine;
use crate::instance::Phase;
use crate::transport::{Cluster, Transport};

/// Well-known log name `test_set`/`test_get` operate on, created
/// lazily on first use (`Consensus_TestSet`'s behavior when no such
/// consensus object exists yet).
pub const TEST_LOG: &str = "__test__";

/// Per-instance snapshot, the shape of one entry in
/// `Consensus_ReplyInfo`'s reply array.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: u64,
    pub phase: Phase,
    pub learned: bool,
    pub learned_value: Option<Vec<u8>>,
    pub callback_fired: bool,
}

/// Per-log snapshot returned by [`info`].
#[derive(Debug, Clone, Serialize)]
pub struct LogInfo {
    pub name: String,
    pub cluster_min_delivered: i64,
    pub next_deliver_id: u64,
    pub instances: Vec<InstanceInfo>,
}

/// Tracks the most recently delivered value on [`TEST_LOG`] so
/// [`TestClient::test_get`] can answer without the host threading its
/// own storage through — the shape `Consensus_TestGet` has (a single
/// remembered value, overwritten on every delivery).
pub struct TestClient {
    last_value: Rc<RefCell<Option<Vec<u8>>>>,
}

impl Default for TestClient {
    fn default() -> Self {
        TestClient { last_value: Rc::new(RefCell::new(None)) }
    }
}

impl TestClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates [`TEST_LOG`] if it does not exist yet, wiring its
    /// approved callback to remember the delivered value.
    pub fn ensure_log<Ctx: Clone + 'static>(&self, engine: &mut Engine<Ctx>, transport: &mut dyn Transport) {
        if engine.log(TEST_LOG).is_some() {
            return;
        }
        let last_value = self.last_value.clone();
        engine.create_log(
            TEST_LOG,
            transport,
            Box::new(move |value: &[u8], _ctx: Option<&Ctx>| {
                *last_value.borrow_mut() = Some(value.to_vec());
            }),
            None,
        );
    }

    /// `Consensus_TestSet`: submits `bytes` on the well-known test log.
    pub fn test_set<Ctx: Clone + 'static>(
        &self,
        engine: &mut Engine<Ctx>,
        transport: &mut dyn Transport,
        cluster: &dyn Cluster,
        bytes: &[u8],
    ) {
        self.ensure_log(engine, transport);
        engine.submit(TEST_LOG, transport, cluster, bytes, None);
    }

    /// `Consensus_TestGet`: the most recently delivered test value, if
    /// any has been delivered yet.
    pub fn test_get(&self) -> Option<Vec<u8>> {
        self.last_value.borrow().clone()
    }
}

/// `Consensus_Info`: a serializable snapshot of every log this engine
/// knows about, in the shape a host would hand back over its own
/// command surface.
pub fn info<Ctx>(engine: &Engine<Ctx>) -> Vec<LogInfo> {
    engine
        .logs()
        .map(|log| LogInfo {
            name: log.name.clone(),
            cluster_min_delivered: log.cluster_min_delivered(),
            next_deliver_id: log.next_deliver_id(),
            instances: log
                .instances()
                .iter_ascending()
                .map(|inst| InstanceInfo {
                    id: inst.id,
                    phase: inst.phase,
                    learned: inst.learner.learned,
                    learned_value: inst.learner.learned_value.clone(),
                    callback_fired: inst.learner.callback_fired,
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tests::harness::{InMemoryCluster, InMemoryNetwork};
    use crate::node_id::NodeId;

    #[test]
    fn test_set_then_test_get_round_trips_in_non_cluster_mode() {
        let mut engine: Engine<()> = Engine::new(EngineConfig::default());
        let network = InMemoryNetwork::new(vec![NodeId::random()]);
        let mut transport = network.transport_for(0);
        let cluster = InMemoryCluster::new(network.node_id(0), 1, false);
        let client = TestClient::new();

        assert_eq!(client.test_get(), None);
        client.test_set(&mut engine, &mut transport, &cluster, b"probe");
        assert_eq!(client.test_get(), Some(b"probe".to_vec()));
    }

    #[test]
    fn info_reports_instance_snapshot() {
        let mut engine: Engine<()> = Engine::new(EngineConfig::default());
        let network = InMemoryNetwork::new(vec![NodeId::random()]);
        let mut transport = network.transport_for(0);
        let cluster = InMemoryCluster::new(network.node_id(0), 1, false);
        let client = TestClient::new();
        client.test_set(&mut engine, &mut transport, &cluster, b"x");

        let snapshot = info(&engine);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, TEST_LOG);
        // Non-cluster mode never creates an instance: delivery is synchronous.
        assert!(snapshot[0].instances.is_empty());
    }
}
