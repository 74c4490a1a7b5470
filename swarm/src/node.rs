// Swarm Node Worker
// One thread services the inbound frame queue; replies land in a bounded
// drop-oldest outbound ring

use crate::codec::{
    BlockOfferPayload, FkvDeltaPayload, Frame, FrameType, HelloPayload, PingPayload,
    ProgramOfferPayload, FRAME_TYPE_COUNT,
};
use crate::peer::{AcceptDecision, PeerState};
use kolibri_core::clock;
use kolibri_core::NodeId;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_PEERS: usize = 32;
const OUTBOUND_CAPACITY: usize = 64;

/// Outcome of handing a block offer to the chain link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockValidation {
    Accepted,
    Rejected,
    Pending,
}

/// Chain-side hook for BLOCK_OFFER frames. Registered once at node
/// construction; invoked from the worker thread.
pub trait BlockOfferHandler: Send + Sync {
    fn on_block_offer(&self, peer_id: &NodeId, offer: &BlockOfferPayload) -> BlockValidation;
}

#[derive(Clone, Debug)]
pub struct NodeOptions {
    pub node_id: NodeId,
    pub version: u16,
    pub services: u16,
    pub max_peers: usize,
}

impl NodeOptions {
    pub fn new(node_id: NodeId, version: u16, services: u16) -> Self {
        NodeOptions {
            node_id,
            version,
            services,
            max_peers: DEFAULT_MAX_PEERS,
        }
    }
}

/// A frame queued for delivery to a peer
#[derive(Clone, Debug)]
pub struct OutboundFrame {
    pub peer_id: NodeId,
    pub frame: Frame,
}

/// Frozen view of one peer's state
#[derive(Clone, Debug)]
pub struct PeerSnapshot {
    pub peer_id: NodeId,
    pub frames: [u32; FRAME_TYPE_COUNT],
    pub reputation_score: i32,
    pub infractions: u32,
    pub successes: u32,
    pub last_seen_ms: u64,
    pub hello: Option<HelloPayload>,
    pub ping: Option<PingPayload>,
    pub program_offer: Option<ProgramOfferPayload>,
    pub block_offer: Option<BlockOfferPayload>,
    pub fkv_delta: Option<FkvDeltaPayload>,
    pub blocks_accepted: u32,
    pub blocks_rejected: u32,
}

struct PeerContext {
    peer_id: NodeId,
    state: PeerState,
    frames: [u32; FRAME_TYPE_COUNT],
    last_seen_ms: u64,
    hello: Option<HelloPayload>,
    ping: Option<PingPayload>,
    program_offer: Option<ProgramOfferPayload>,
    block_offer: Option<BlockOfferPayload>,
    fkv_delta: Option<FkvDeltaPayload>,
    blocks_accepted: u32,
    blocks_rejected: u32,
}

impl PeerContext {
    fn new(peer_id: NodeId, now_ms: u64) -> Self {
        PeerContext {
            peer_id,
            state: PeerState::new(now_ms),
            frames: [0; FRAME_TYPE_COUNT],
            last_seen_ms: now_ms,
            hello: None,
            ping: None,
            program_offer: None,
            block_offer: None,
            fkv_delta: None,
            blocks_accepted: 0,
            blocks_rejected: 0,
        }
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id,
            frames: self.frames,
            reputation_score: self.state.reputation.score,
            infractions: self.state.reputation.infractions,
            successes: self.state.reputation.successes,
            last_seen_ms: self.last_seen_ms,
            hello: self.hello.clone(),
            ping: self.ping,
            program_offer: self.program_offer.clone(),
            block_offer: self.block_offer.clone(),
            fkv_delta: self.fkv_delta.clone(),
            blocks_accepted: self.blocks_accepted,
            blocks_rejected: self.blocks_rejected,
        }
    }
}

/// Completion handle for `submit_frame(wait = true)`
struct Completion {
    decision: Mutex<Option<AcceptDecision>>,
    cond: Condvar,
}

impl Completion {
    fn new() -> Self {
        Completion {
            decision: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    fn complete(&self, decision: AcceptDecision) {
        if let Ok(mut slot) = self.decision.lock() {
            *slot = Some(decision);
            self.cond.notify_one();
        }
    }

    fn wait(&self) -> AcceptDecision {
        let mut slot = match self.decision.lock() {
            Ok(slot) => slot,
            Err(_) => return AcceptDecision::ReputationBlocked,
        };
        loop {
            if let Some(decision) = *slot {
                return decision;
            }
            slot = match self.cond.wait(slot) {
                Ok(slot) => slot,
                Err(_) => return AcceptDecision::ReputationBlocked,
            };
        }
    }
}

struct FrameEvent {
    peer_id: NodeId,
    frame: Frame,
    completion: Option<Arc<Completion>>,
}

struct InboundQueue {
    events: VecDeque<FrameEvent>,
    shutdown: bool,
}

struct Outbox {
    ring: VecDeque<OutboundFrame>,
}

struct Shared {
    options: NodeOptions,
    queue: Mutex<InboundQueue>,
    queue_cond: Condvar,
    outbox: Mutex<Outbox>,
    outbox_cond: Condvar,
    peers: Mutex<Vec<PeerContext>>,
    handler: Option<Box<dyn BlockOfferHandler>>,
}

impl Shared {
    fn push_outbound(&self, peer_id: NodeId, frame: Frame) {
        let Ok(mut outbox) = self.outbox.lock() else {
            return;
        };
        // Drop the oldest reply rather than grow without bound
        if outbox.ring.len() == OUTBOUND_CAPACITY {
            outbox.ring.pop_front();
        }
        outbox.ring.push_back(OutboundFrame { peer_id, frame });
        self.outbox_cond.notify_one();
    }

    fn handle_hello(&self, peer: &mut PeerContext, payload: &HelloPayload) {
        peer.hello = Some(payload.clone());
        peer.frames[FrameType::Hello.index()] += 1;
        // The reply reports the peer's current score; the wire field is
        // three digits, so a perfect 1000 is reported as 999.
        let reputation = peer.state.reputation.score.clamp(0, 999) as u16;
        let reply = Frame::Hello(HelloPayload {
            version: self.options.version,
            node_id: self.options.node_id,
            services: self.options.services,
            reputation,
        });
        self.push_outbound(peer.peer_id, reply);
    }

    fn handle_ping(&self, peer: &mut PeerContext, payload: &PingPayload) {
        peer.ping = Some(*payload);
        peer.frames[FrameType::Ping.index()] += 1;
        let reply = Frame::Ping(PingPayload {
            nonce: payload.nonce,
            latency_hint_ms: payload.latency_hint_ms.max(1),
        });
        self.push_outbound(peer.peer_id, reply);
    }

    fn process_event(&self, event: &FrameEvent) -> AcceptDecision {
        let now_ms = clock::now_monotonic_ms();
        let Ok(mut peers) = self.peers.lock() else {
            return AcceptDecision::ReputationBlocked;
        };
        let slot = match peers.iter().position(|p| p.peer_id == event.peer_id) {
            Some(slot) => slot,
            None => {
                if peers.len() >= self.options.max_peers {
                    warn!(peer = %event.peer_id, "dropping frame: peer table full");
                    return AcceptDecision::ReputationBlocked;
                }
                peers.push(PeerContext::new(event.peer_id, now_ms));
                peers.len() - 1
            }
        };
        let peer = &mut peers[slot];
        peer.last_seen_ms = now_ms;

        let frame_type = event.frame.frame_type();
        let decision = peer.state.should_accept(frame_type, now_ms);
        if decision != AcceptDecision::Accept {
            return decision;
        }

        match &event.frame {
            Frame::Hello(payload) => self.handle_hello(peer, payload),
            Frame::Ping(payload) => self.handle_ping(peer, payload),
            Frame::ProgramOffer(payload) => {
                peer.program_offer = Some(payload.clone());
                peer.frames[FrameType::ProgramOffer.index()] += 1;
            }
            Frame::FkvDelta(payload) => {
                peer.fkv_delta = Some(payload.clone());
                peer.frames[FrameType::FkvDelta.index()] += 1;
            }
            Frame::BlockOffer(payload) => {
                peer.block_offer = Some(payload.clone());
                peer.frames[FrameType::BlockOffer.index()] += 1;
                let verdict = match &self.handler {
                    Some(handler) => handler.on_block_offer(&event.peer_id, payload),
                    None => BlockValidation::Rejected,
                };
                match verdict {
                    BlockValidation::Accepted => {
                        peer.blocks_accepted += 1;
                    }
                    BlockValidation::Rejected | BlockValidation::Pending => {
                        peer.blocks_rejected += 1;
                        warn!(peer = %event.peer_id, block = %payload.block_id,
                              "block offer rejected");
                        peer.state.report_violation();
                        return AcceptDecision::Accept;
                    }
                }
            }
        }
        peer.state.report_success(frame_type);
        AcceptDecision::Accept
    }
}

/// A swarm node: peer table, worker thread, inbound queue, outbound ring.
pub struct SwarmNode {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmNode {
    pub fn new(options: NodeOptions) -> Self {
        Self::with_handler(options, None)
    }

    /// Create a node with a chain link registered for BLOCK_OFFER frames.
    pub fn with_handler(
        options: NodeOptions,
        handler: Option<Box<dyn BlockOfferHandler>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            options,
            queue: Mutex::new(InboundQueue {
                events: VecDeque::new(),
                shutdown: false,
            }),
            queue_cond: Condvar::new(),
            outbox: Mutex::new(Outbox {
                ring: VecDeque::with_capacity(OUTBOUND_CAPACITY),
            }),
            outbox_cond: Condvar::new(),
            peers: Mutex::new(Vec::new()),
            handler,
        });
        SwarmNode {
            shared,
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread. Idempotent.
    pub fn start(&self) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(std::thread::spawn(move || worker_main(shared)));
    }

    /// Stop the worker. Pending queued events complete with
    /// `ReputationBlocked` so no waiter is left hanging.
    pub fn stop(&self) {
        {
            let Ok(mut queue) = self.shared.queue.lock() else {
                return;
            };
            queue.shutdown = true;
            self.shared.queue_cond.notify_all();
        }
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.shared.options.node_id
    }

    /// Submit an inbound frame on behalf of `peer_id`.
    ///
    /// With `wait = true` the call blocks until the worker has decided and
    /// returns that decision; otherwise it returns `Accept` immediately
    /// after enqueueing (the decision is applied asynchronously).
    pub fn submit_frame(&self, peer_id: NodeId, frame: Frame, wait: bool) -> AcceptDecision {
        let completion = wait.then(|| Arc::new(Completion::new()));
        {
            let Ok(mut queue) = self.shared.queue.lock() else {
                return AcceptDecision::ReputationBlocked;
            };
            if queue.shutdown {
                return AcceptDecision::ReputationBlocked;
            }
            queue.events.push_back(FrameEvent {
                peer_id,
                frame,
                completion: completion.clone(),
            });
            self.shared.queue_cond.notify_one();
        }
        match completion {
            Some(completion) => completion.wait(),
            None => AcceptDecision::Accept,
        }
    }

    /// Block up to `timeout_ms` for the next outbound frame.
    pub fn poll_outbound(&self, timeout_ms: u64) -> Option<OutboundFrame> {
        let deadline = Duration::from_millis(timeout_ms);
        let mut outbox = self.shared.outbox.lock().ok()?;
        if outbox.ring.is_empty() {
            if timeout_ms == 0 {
                return None;
            }
            let (guard, result) = self
                .shared
                .outbox_cond
                .wait_timeout_while(outbox, deadline, |o| o.ring.is_empty())
                .ok()?;
            outbox = guard;
            if result.timed_out() && outbox.ring.is_empty() {
                return None;
            }
        }
        outbox.ring.pop_front()
    }

    /// Frozen view of one peer, if known.
    pub fn peer_snapshot(&self, peer_id: &NodeId) -> Option<PeerSnapshot> {
        let peers = self.shared.peers.lock().ok()?;
        peers
            .iter()
            .find(|p| &p.peer_id == peer_id)
            .map(|p| p.snapshot())
    }
}

impl Drop for SwarmNode {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(shared: Arc<Shared>) {
    loop {
        let event = {
            let Ok(mut queue) = shared.queue.lock() else {
                return;
            };
            loop {
                if let Some(event) = queue.events.pop_front() {
                    if queue.shutdown {
                        // Drain: complete without processing
                        if let Some(completion) = &event.completion {
                            completion.complete(AcceptDecision::ReputationBlocked);
                        }
                        continue;
                    }
                    break Some(event);
                }
                if queue.shutdown {
                    break None;
                }
                queue = match shared.queue_cond.wait(queue) {
                    Ok(queue) => queue,
                    Err(_) => return,
                };
            }
        };
        let Some(event) = event else {
            return;
        };
        let decision = shared.process_event(&event);
        if let Some(completion) = &event.completion {
            completion.complete(decision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(id: &str) -> NodeOptions {
        NodeOptions::new(NodeId::parse(id).unwrap(), 1, 3)
    }

    #[test]
    fn test_hello_reply_describes_self() {
        let node = SwarmNode::new(options("1111111111111111"));
        node.start();
        let peer = NodeId::parse("2222222222222222").unwrap();

        let decision = node.submit_frame(
            peer,
            Frame::Hello(HelloPayload {
                version: 1,
                node_id: peer,
                services: 0,
                reputation: 600,
            }),
            true,
        );
        assert_eq!(decision, AcceptDecision::Accept);

        let reply = node.poll_outbound(1000).expect("hello reply");
        assert_eq!(reply.peer_id, peer);
        match reply.frame {
            Frame::Hello(hello) => {
                assert_eq!(hello.node_id.as_str(), "1111111111111111");
                assert_eq!(hello.services, 3);
                // Score was 600 when the reply was composed
                assert_eq!(hello.reputation, 600);
            }
            other => panic!("expected hello reply, got {other:?}"),
        }
        node.stop();
    }

    #[test]
    fn test_ping_echoes_nonce_and_clamps_latency() {
        let node = SwarmNode::new(options("1111111111111111"));
        node.start();
        let peer = NodeId::parse("3333333333333333").unwrap();

        let decision = node.submit_frame(
            peer,
            Frame::Ping(PingPayload {
                nonce: 777,
                latency_hint_ms: 0,
            }),
            true,
        );
        assert_eq!(decision, AcceptDecision::Accept);

        let reply = node.poll_outbound(1000).expect("ping echo");
        match reply.frame {
            Frame::Ping(ping) => {
                assert_eq!(ping.nonce, 777);
                assert_eq!(ping.latency_hint_ms, 1);
            }
            other => panic!("expected ping echo, got {other:?}"),
        }
        node.stop();
    }

    #[test]
    fn test_submit_without_wait_returns_immediately() {
        let node = SwarmNode::new(options("1111111111111111"));
        node.start();
        let peer = NodeId::parse("4444444444444444").unwrap();
        let decision = node.submit_frame(
            peer,
            Frame::Ping(PingPayload {
                nonce: 1,
                latency_hint_ms: 5,
            }),
            false,
        );
        assert_eq!(decision, AcceptDecision::Accept);
        // The echo still shows up once the worker has run
        assert!(node.poll_outbound(1000).is_some());
        node.stop();
    }

    #[test]
    fn test_submit_after_stop_is_blocked() {
        let node = SwarmNode::new(options("1111111111111111"));
        node.start();
        node.stop();
        let peer = NodeId::parse("5555555555555555").unwrap();
        let decision = node.submit_frame(
            peer,
            Frame::Ping(PingPayload {
                nonce: 1,
                latency_hint_ms: 5,
            }),
            true,
        );
        assert_eq!(decision, AcceptDecision::ReputationBlocked);
    }

    #[test]
    fn test_peer_snapshot_counts_frames() {
        let node = SwarmNode::new(options("1111111111111111"));
        node.start();
        let peer = NodeId::parse("6666666666666666").unwrap();
        for nonce in 0..3 {
            node.submit_frame(
                peer,
                Frame::Ping(PingPayload {
                    nonce,
                    latency_hint_ms: 2,
                }),
                true,
            );
        }
        let snapshot = node.peer_snapshot(&peer).expect("peer exists");
        assert_eq!(snapshot.frames[FrameType::Ping.index()], 3);
        assert_eq!(snapshot.successes, 3);
        assert_eq!(snapshot.ping.map(|p| p.latency_hint_ms), Some(2));
        assert!(node.peer_snapshot(&NodeId::zero()).is_none());
        node.stop();
    }
}
