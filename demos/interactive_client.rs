//! Interactive client for the `__test__` log (`SPEC_FULL.md` §3.1),
//! generalizing the teacher's `start_client` example from a
//! usize-only proposer client to this engine's byte-string values
//! submitted through [`multi_paxos::cli::TestClient`].
//!
//! Run one of these per cluster node, all sharing the same multicast
//! group:
//!     RUST_LOG=multi_paxos=info cargo run --example interactive_client -- \
//!         <my_addr> <multicast_addr> <cluster_size>
//! Then type a line at the prompt to submit it; empty input exits.

extern crate env_logger;
#[macro_use]
extern crate log;
extern crate multi_paxos;
#[macro_use]
extern crate text_io;

use std::env;
use std::io::{self, Write};
use std::net::SocketAddrV4;
use std::sync::mpsc;
use std::thread;

use multi_paxos::cli::TestClient;
use multi_paxos::config::EngineConfig;
use multi_paxos::engine::Engine;
use multi_paxos::node_id::NodeId;
use multi_paxos::transport::Cluster;
use multi_paxos::udp::{decode_frame, UdpTransport};

struct StaticCluster {
    my_id: NodeId,
    cluster_size: usize,
}

impl Cluster for StaticCluster {
    fn is_cluster_mode(&self) -> bool {
        self.cluster_size > 1
    }

    fn my_node_id(&self) -> NodeId {
        self.my_id
    }

    fn cluster_size(&self) -> usize {
        self.cluster_size
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("usage: interactive_client <my_addr> <multicast_addr> <cluster_size>");
        return;
    }
    let my_addr: SocketAddrV4 = args[1].parse().expect("my_addr must be host:port");
    let multicast_addr: SocketAddrV4 = args[2].parse().expect("multicast_addr must be host:port");
    let cluster_size: usize = args[3].parse().expect("cluster_size must be a positive integer");

    let my_id = NodeId::random();
    info!("starting as node {} ({})", my_id, my_addr);

    let (tx, rx) = mpsc::channel();
    let recv_socket = UdpTransport::bind_receiver(&multicast_addr).expect("failed to bind multicast receiver");
    thread::spawn(move || {
        let mut buf = [0u8; 65536];
        loop {
            if let Ok((n, _)) = recv_socket.recv_from(&mut buf) {
                if let Some((sender, kind, payload)) = decode_frame(&buf[..n]) {
                    if tx.send((sender, kind, payload.to_vec())).is_err() {
                        return;
                    }
                }
            }
        }
    });

    let mut transport =
        UdpTransport::new(my_id, my_addr, multicast_addr, Default::default()).expect("failed to bind send socket");
    let cluster = StaticCluster { my_id, cluster_size };
    let mut engine: Engine<()> = Engine::new(EngineConfig::default());
    let client = TestClient::new();

    loop {
        while let Ok((sender, kind, payload)) = rx.try_recv() {
            engine.on_message(&mut transport, &cluster, sender, kind, &payload);
        }

        print!("Enter a value (empty to quit): ");
        io::stdout().flush().ok();
        let line: String = read!("{}\n");
        if line.is_empty() {
            break;
        }
        client.test_set(&mut engine, &mut transport, &cluster, line.as_bytes());
        println!("last delivered: {:?}", client.test_get());
    }
}
