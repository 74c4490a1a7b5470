// Gossip Fan-Out
// In-process address book; broadcast submits to every peer and waits

use crate::codec::{CodecError, Frame};
use crate::node::SwarmNode;
use crate::peer::AcceptDecision;
use kolibri_core::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum GossipError {
    #[error("peer {0} already registered")]
    DuplicatePeer(NodeId),

    #[error("peer {0} not registered")]
    UnknownPeer(NodeId),

    #[error("peer {peer} rejected frame: {decision:?}")]
    Rejected {
        peer: NodeId,
        decision: AcceptDecision,
    },

    #[error("datagram too short or missing transport tag")]
    BadDatagram,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("gossip state poisoned")]
    Poisoned,
}

/// Datagram transport tag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Quic,
}

pub const TRANSPORT_COUNT: usize = 2;

impl Transport {
    pub fn tag(self) -> u8 {
        match self {
            Transport::Udp => b'U',
            Transport::Quic => b'Q',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Transport> {
        match tag {
            b'U' => Some(Transport::Udp),
            b'Q' => Some(Transport::Quic),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Transport::Udp => 0,
            Transport::Quic => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub datagrams: u64,
    pub frames_delivered: u64,
}

struct GossipState {
    peers: HashMap<NodeId, Arc<SwarmNode>>,
    stats: [TransportStats; TRANSPORT_COUNT],
}

/// Address book mapping node ids to swarm nodes, with per-transport
/// delivery counters.
pub struct GossipNetwork {
    state: Mutex<GossipState>,
}

impl GossipNetwork {
    pub fn new() -> Self {
        GossipNetwork {
            state: Mutex::new(GossipState {
                peers: HashMap::new(),
                stats: [TransportStats::default(); TRANSPORT_COUNT],
            }),
        }
    }

    pub fn add_peer(&self, node: Arc<SwarmNode>) -> Result<(), GossipError> {
        let node_id = node.node_id();
        let mut state = self.state.lock().map_err(|_| GossipError::Poisoned)?;
        if state.peers.contains_key(&node_id) {
            return Err(GossipError::DuplicatePeer(node_id));
        }
        state.peers.insert(node_id, node);
        Ok(())
    }

    pub fn remove_peer(&self, node_id: &NodeId) -> Result<(), GossipError> {
        let mut state = self.state.lock().map_err(|_| GossipError::Poisoned)?;
        state
            .peers
            .remove(node_id)
            .map(|_| ())
            .ok_or(GossipError::UnknownPeer(*node_id))
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().map(|s| s.peers.len()).unwrap_or(0)
    }

    /// Deliver `frame` to every registered peer except the source,
    /// waiting on each decision. Fails on the first non-accept.
    pub fn broadcast(
        &self,
        source_id: &NodeId,
        frame: &Frame,
        transport: Transport,
    ) -> Result<u64, GossipError> {
        let targets: Vec<Arc<SwarmNode>> = {
            let state = self.state.lock().map_err(|_| GossipError::Poisoned)?;
            state
                .peers
                .iter()
                .filter(|(id, _)| *id != source_id)
                .map(|(_, node)| Arc::clone(node))
                .collect()
        };

        let mut delivered = 0u64;
        for node in targets {
            let decision = node.submit_frame(*source_id, frame.clone(), true);
            if decision != AcceptDecision::Accept {
                warn!(peer = %node.node_id(), source = %source_id, ?decision,
                      "gossip broadcast rejected");
                return Err(GossipError::Rejected {
                    peer: node.node_id(),
                    decision,
                });
            }
            delivered += 1;
        }

        let mut state = self.state.lock().map_err(|_| GossipError::Poisoned)?;
        state.stats[transport.index()].datagrams += 1;
        state.stats[transport.index()].frames_delivered += delivered;
        Ok(delivered)
    }

    pub fn stats(&self, transport: Transport) -> TransportStats {
        self.state
            .lock()
            .map(|s| s.stats[transport.index()])
            .unwrap_or_default()
    }
}

impl Default for GossipNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a frame as a datagram: one transport tag byte + decimal frame.
pub fn datagram_encode(transport: Transport, frame: &Frame) -> Result<Vec<u8>, GossipError> {
    let wire = frame.serialize()?;
    let mut out = Vec::with_capacity(1 + wire.len());
    out.push(transport.tag());
    out.extend_from_slice(wire.as_bytes());
    Ok(out)
}

/// Decode a datagram back into its transport tag and frame.
pub fn datagram_decode(data: &[u8]) -> Result<(Transport, Frame), GossipError> {
    if data.len() < 2 {
        return Err(GossipError::BadDatagram);
    }
    let transport = Transport::from_tag(data[0]).ok_or(GossipError::BadDatagram)?;
    let body = std::str::from_utf8(&data[1..]).map_err(|_| GossipError::BadDatagram)?;
    Ok((transport, Frame::parse(body)?))
}
