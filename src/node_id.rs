//! Fixed-width node identity (spec §3, §6).
//!
//! Values submitted locally are prefixed with the submitter's node id
//! so that identical payloads from distinct nodes hash to distinct
//! proposed values. The original module fixes this prefix at
//! `REDISMODULE_NODE_ID_LEN`, a 40-character Redis Cluster node id
//! (40 lowercase hex ASCII characters, stored as the hex string
//! itself rather than decoded into raw bytes). `NodeId` keeps that
//! exact width and representation.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

pub const NODE_ID_LEN: usize = 40;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Generates a pseudo-random node id by concatenating two v4 UUIDs'
    /// hex representations and truncating to the protocol width. This
    /// generalizes the teacher's own use of `Uuid::new_v4()` for
    /// per-process identity to the fixed 40-byte width the wire
    /// protocol requires (one UUID's simple hex form is only 32
    /// characters).
    pub fn random() -> Self {
        let a = Uuid::new_v4().to_simple().to_string();
        let b = Uuid::new_v4().to_simple().to_string();
        let combined = format!("{}{}", a, b);
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(&combined.as_bytes()[..NODE_ID_LEN]);
        NodeId(bytes)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The bytes are themselves printable ASCII (hex digits), so this
        // never hits the lossy-replacement path in practice.
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseNodeIdError;

impl fmt::Display for ParseNodeIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node id must be exactly {} bytes", NODE_ID_LEN)
    }
}

impl std::error::Error for ParseNodeIdError {}

impl FromStr for NodeId {
    type Err = ParseNodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != NODE_ID_LEN {
            return Err(ParseNodeIdError);
        }
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes.copy_from_slice(s.as_bytes());
        Ok(NodeId(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_have_fixed_width_and_differ() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.as_bytes().len(), NODE_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_parse_round_trip() {
        let id = NodeId::random();
        let s = id.to_string();
        let parsed: NodeId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        assert_eq!("abc".parse::<NodeId>(), Err(ParseNodeIdError));
    }
}
