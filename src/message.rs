//! Wire messages (C4). Nine kinds, all framed with the C1 codec, all
//! keyed by `(log_name, instance_id[, proposal_id])`.
//!
//! `MessageKind` is what a host registers a receiver for with its
//! `Transport` (spec §6's "registration of a named receiver ... that
//! accepts (sender_id, type, payload_ptr, payload_len)") — the engine
//! sends with a `MessageKind` and a payload, and the host routes
//! inbound bytes of that kind back into [`crate::engine::Engine::on_message`].
//! `StartInstance`, `ShortTick`, and `LongTick` are the three
//! internal self-sends the original module also registers
//! (`Consensus_StartInstance`, `Consensus_ShortPeriodicTasks`,
//! `Consensus_LongPeriodicTasks`) alongside the nine protocol messages.

use crate::buffer::{FramedReader, FramedWriter};
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Recruit,
    Recruited,
    Denied,
    Accept,
    AcceptDenied,
    ValueAccepted,
    LearnValue,
    CallbackTriggered,
    LastIdTriggered,
    StartInstance,
    ShortTick,
    LongTick,
}

/// A proposer broadcasting Phase 1: "recruit acceptors for proposal_id".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recruit {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
}

impl Recruit {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(Recruit {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
        })
    }
}

/// An acceptor's reply to Recruit when it promises the proposal id.
/// `old_proposal_id`/`accepted_value` carry whatever this acceptor had
/// already accepted, so the proposer can adopt it (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recruited {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
    pub old_proposal_id: u64,
    pub accepted_value: Option<Vec<u8>>,
}

impl Recruited {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.write_i64(self.old_proposal_id as i64);
        match &self.accepted_value {
            Some(v) => {
                w.write_i64(1);
                w.write_buf(v);
            }
            None => w.write_i64(0),
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        let log = r.read_string()?;
        let instance_id = r.read_i64()? as u64;
        let proposal_id = r.read_i64()? as u64;
        let old_proposal_id = r.read_i64()? as u64;
        let has_value = r.read_i64()? != 0;
        let accepted_value = if has_value { Some(r.read_buf()?) } else { None };
        Ok(Recruited {
            log,
            instance_id,
            proposal_id,
            old_proposal_id,
            accepted_value,
        })
    }
}

/// An acceptor's reply to Recruit or Accept when it rejects a stale
/// proposal id; carries the higher id it has already promised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denied {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
}

impl Denied {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(Denied {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
        })
    }
}

/// A proposer broadcasting Phase 2: "accept value for proposal_id".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accept {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
    pub value: Vec<u8>,
}

impl Accept {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.write_buf(&self.value);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(Accept {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
            value: r.read_buf()?,
        })
    }
}

/// `AcceptDenied` — sent back to a proposer by an acceptor that has
/// already promised a higher proposal id than the one in an `Accept`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptDenied {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
}

impl AcceptDenied {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(AcceptDenied {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
        })
    }
}

/// An acceptor confirming it stored the accepted value for this
/// proposal id; sent only to the proposer that sent the `Accept`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAccepted {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
}

impl ValueAccepted {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(ValueAccepted {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
        })
    }
}

/// Broadcast by an acceptor alongside its `ValueAccepted` reply, to
/// all-and-self, carrying the full accepted value so every learner can
/// tally it (spec §4.3's acceptor table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnValue {
    pub log: String,
    pub instance_id: u64,
    pub proposal_id: u64,
    pub value: Vec<u8>,
}

impl LearnValue {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_i64(self.proposal_id as i64);
        w.write_buf(&self.value);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(LearnValue {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            proposal_id: r.read_i64()? as u64,
            value: r.read_buf()?,
        })
    }
}

/// Anti-entropy rebroadcast of an already-learned value (no proposal
/// id — a decided instance has none left to track). spec §4.4, §4.6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTriggered {
    pub log: String,
    pub instance_id: u64,
    pub value: Vec<u8>,
}

impl CallbackTriggered {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.instance_id as i64);
        w.write_buf(&self.value);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(CallbackTriggered {
            log: r.read_string()?,
            instance_id: r.read_i64()? as u64,
            value: r.read_buf()?,
        })
    }
}

/// Watermark gossip: "my next_deliver_id - 1". spec §4.4, §4.6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastIdTriggered {
    pub log: String,
    pub last_delivered_id: i64,
}

impl LastIdTriggered {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FramedWriter::new();
        w.write_string(&self.log);
        w.write_i64(self.last_delivered_id);
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = FramedReader::new(bytes);
        Ok(LastIdTriggered {
            log: r.read_string()?,
            last_delivered_id: r.read_i64()?,
        })
    }
}
