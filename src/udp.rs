//! Reference `Transport` over UDP multicast (demo-only; not required
//! by the engine, not exercised by its unit tests — those use the
//! in-memory harness). Adapts the teacher's own `net_node.rs` socket
//! setup (`net2::UdpBuilder`, multicast join, `send_to`/`recv_from`)
//! to the injected-trait design `SPEC_FULL.md` §3.3 describes, so a
//! reader can see how the engine's traits connect to a real socket.
//!
//! Delayed and periodic self-sends have no wall clock of their own to
//! hook into here, so they spawn a short-lived `std::thread` that
//! sleeps and then re-sends to this node's own address — the
//! simplest stand-in for a host's real task scheduler.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use net2::UdpBuilder;

use crate::message::MessageKind;
use crate::node_id::{NodeId, NODE_ID_LEN};
use crate::transport::Transport;

fn kind_to_byte(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Recruit => 0,
        MessageKind::Recruited => 1,
        MessageKind::Denied => 2,
        MessageKind::Accept => 3,
        MessageKind::AcceptDenied => 4,
        MessageKind::ValueAccepted => 5,
        MessageKind::LearnValue => 6,
        MessageKind::CallbackTriggered => 7,
        MessageKind::LastIdTriggered => 8,
        MessageKind::StartInstance => 9,
        MessageKind::ShortTick => 10,
        MessageKind::LongTick => 11,
    }
}

fn byte_to_kind(b: u8) -> Option<MessageKind> {
    Some(match b {
        0 => MessageKind::Recruit,
        1 => MessageKind::Recruited,
        2 => MessageKind::Denied,
        3 => MessageKind::Accept,
        4 => MessageKind::AcceptDenied,
        5 => MessageKind::ValueAccepted,
        6 => MessageKind::LearnValue,
        7 => MessageKind::CallbackTriggered,
        8 => MessageKind::LastIdTriggered,
        9 => MessageKind::StartInstance,
        10 => MessageKind::ShortTick,
        11 => MessageKind::LongTick,
        _ => return None,
    })
}

/// Wire frame: `[sender NodeId; 40 bytes][kind; 1 byte][payload...]`.
fn encode_frame(sender: &NodeId, kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(NODE_ID_LEN + 1 + payload.len());
    buf.extend_from_slice(sender.as_bytes());
    buf.push(kind_to_byte(kind));
    buf.extend_from_slice(payload);
    buf
}

/// Decodes a received datagram back into `(sender, kind, payload)`.
/// Returns `None` on a truncated or unrecognized-kind datagram — a
/// malformed UDP datagram is simply dropped, the same "trusted
/// transport" contract every other handler assumes (spec §4.1).
pub fn decode_frame(datagram: &[u8]) -> Option<(NodeId, MessageKind, &[u8])> {
    if datagram.len() < NODE_ID_LEN + 1 {
        return None;
    }
    let mut id_bytes = [0u8; NODE_ID_LEN];
    id_bytes.copy_from_slice(&datagram[..NODE_ID_LEN]);
    let sender = NodeId::from_bytes(id_bytes);
    let kind = byte_to_kind(datagram[NODE_ID_LEN])?;
    Some((sender, kind, &datagram[NODE_ID_LEN + 1..]))
}

/// Sends to every peer and, for the multicast group, also potentially
/// to itself (multicast loopback is enabled at socket setup, matching
/// the teacher's `set_multicast_loop_v4(true)`).
pub struct UdpTransport {
    my_id: NodeId,
    send_socket: UdpSocket,
    multicast_addr: SocketAddrV4,
    peers: Arc<HashMap<NodeId, SocketAddrV4>>,
    my_addr: SocketAddrV4,
}

impl UdpTransport {
    /// `multicast_addr` is the group every node's receiver joins and
    /// every "to all" send targets; `peers` maps node id to the
    /// unicast address used for "to one specific node" sends;
    /// `my_addr` is this node's own unicast address, used for
    /// self-sends and the spawned delayed/periodic resend threads.
    pub fn new(
        my_id: NodeId,
        my_addr: SocketAddrV4,
        multicast_addr: SocketAddrV4,
        peers: HashMap<NodeId, SocketAddrV4>,
    ) -> std::io::Result<Self> {
        let send_socket = UdpSocket::bind("0.0.0.0:0")?;
        send_socket.set_multicast_loop_v4(true)?;
        Ok(UdpTransport {
            my_id,
            send_socket,
            multicast_addr,
            peers: Arc::new(peers),
            my_addr,
        })
    }

    /// Binds and joins the multicast group a host's receive loop reads
    /// from; pair with [`decode_frame`] and `Engine::on_message`.
    pub fn bind_receiver(multicast_addr: &SocketAddrV4) -> std::io::Result<UdpSocket> {
        let socket = UdpBuilder::new_v4()?.reuse_address(true)?.bind(multicast_addr)?;
        socket.join_multicast_v4(multicast_addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
        Ok(socket)
    }

    fn send_to_addr(&self, addr: &SocketAddrV4, kind: MessageKind, payload: &[u8]) {
        let frame = encode_frame(&self.my_id, kind, payload);
        let _ = self.send_socket.send_to(&frame, addr);
    }

    fn send_to_multicast(&self, kind: MessageKind, payload: &[u8]) {
        self.send_to_addr(&self.multicast_addr, kind, payload);
    }

    fn spawn_delayed_self_send(&self, kind: MessageKind, payload: Vec<u8>, delay_ms: u64, target: SocketAddrV4) {
        let my_id = self.my_id;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
                let frame = encode_frame(&my_id, kind, &payload);
                let _ = socket.send_to(&frame, target);
            }
        });
    }
}

impl Transport for UdpTransport {
    fn send_reliable_to(&mut self, target: &NodeId, kind: MessageKind, payload: &[u8]) {
        if let Some(addr) = self.peers.get(target) {
            self.send_to_addr(addr, kind, payload);
        }
    }

    fn send_reliable_to_all(&mut self, kind: MessageKind, payload: &[u8]) {
        self.send_to_multicast(kind, payload);
    }

    fn send_reliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]) {
        // Multicast loopback is enabled, so this reaches self too.
        self.send_to_multicast(kind, payload);
    }

    fn send_reliable_to_self(&mut self, kind: MessageKind, payload: &[u8]) {
        self.send_to_addr(&self.my_addr.clone(), kind, payload);
    }

    fn send_unreliable_to_all(&mut self, kind: MessageKind, payload: &[u8]) {
        self.send_to_multicast(kind, payload);
    }

    fn send_unreliable_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8]) {
        self.send_to_multicast(kind, payload);
    }

    fn send_delayed_to_self(&mut self, kind: MessageKind, payload: &[u8], delay_ms: u64) {
        self.spawn_delayed_self_send(kind, payload.to_vec(), delay_ms, self.my_addr);
    }

    fn send_delayed_to_all_and_self(&mut self, kind: MessageKind, payload: &[u8], delay_ms: u64) {
        let my_id = self.my_id;
        let multicast_addr = self.multicast_addr;
        let payload = payload.to_vec();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay_ms));
            if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
                let frame = encode_frame(&my_id, kind, &payload);
                let _ = socket.send_to(&frame, multicast_addr);
            }
        });
    }

    fn send_periodic_to_self(&mut self, kind: MessageKind, period_ms: u64) {
        let my_id = self.my_id;
        let my_addr = self.my_addr;
        thread::spawn(move || loop {
            thread::sleep(Duration::from_millis(period_ms));
            if let Ok(socket) = UdpSocket::bind("0.0.0.0:0") {
                let frame = encode_frame(&my_id, kind, &[]);
                let _ = socket.send_to(&frame, my_addr);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let id = NodeId::random();
        let frame = encode_frame(&id, MessageKind::Recruit, b"payload");
        let (sender, kind, payload) = decode_frame(&frame).unwrap();
        assert_eq!(sender, id);
        assert_eq!(kind, MessageKind::Recruit);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert!(decode_frame(&[0u8; NODE_ID_LEN]).is_none());
    }

    #[test]
    fn unknown_kind_byte_is_rejected() {
        let id = NodeId::random();
        let mut frame = encode_frame(&id, MessageKind::Recruit, b"");
        frame[NODE_ID_LEN] = 255;
        assert!(decode_frame(&frame).is_none());
    }
}
