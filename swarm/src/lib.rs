// Kolibri Swarm Protocol
// Fixed-width decimal frames, per-peer admission control, node worker, gossip

pub mod codec;
pub mod gossip;
pub mod node;
pub mod peer;

pub use codec::{
    BlockOfferPayload, CodecError, FkvDeltaPayload, Frame, FrameType, HelloPayload, PingPayload,
    ProgramOfferPayload, MAX_FRAME_LEN, PROTOCOL_VERSION,
};
pub use gossip::{GossipError, GossipNetwork, Transport, TransportStats};
pub use node::{
    BlockOfferHandler, BlockValidation, NodeOptions, OutboundFrame, PeerSnapshot, SwarmNode,
};
pub use peer::{
    AcceptDecision, PeerState, RateLimiter, Reputation, ReputationClass, TokenBucket,
};
