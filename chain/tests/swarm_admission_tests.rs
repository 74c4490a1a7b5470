// Block offers travelling through a live swarm node into the chain

use kolibri_chain::{Chain, ChainLink, ChainPolicy, Formula, LinkConfig, SharedChainLink, StagedOffer};
use kolibri_core::crypto::{hmac_sha256, KeyPair};
use kolibri_core::{BlockId, NodeId};
use kolibri_swarm::codec::{BlockOfferPayload, Frame};
use kolibri_swarm::node::{NodeOptions, SwarmNode};
use kolibri_swarm::AcceptDecision;
use std::sync::Arc;

const HMAC_KEY: &[u8] = b"swarm-admission-shared-key";

struct Harness {
    chain: Arc<Chain>,
    link: Arc<ChainLink>,
    node: SwarmNode,
    keys: KeyPair,
}

fn harness() -> Harness {
    let keys = KeyPair::generate();
    let chain = Arc::new(Chain::with_policy(ChainPolicy {
        min_pou_threshold: 0.5,
        max_mdl_delta: None,
    }));
    let link = Arc::new(ChainLink::new(
        Arc::clone(&chain),
        LinkConfig {
            public_key: keys.public_key(),
            hmac_key: HMAC_KEY.to_vec(),
        },
    ));
    let node = SwarmNode::with_handler(
        NodeOptions::new(NodeId::parse("9999999999999999").unwrap(), 1, 0),
        Some(Box::new(SharedChainLink(Arc::clone(&link)))),
    );
    node.start();
    Harness {
        chain,
        link,
        node,
        keys,
    }
}

fn offer(block_id: &str, height: u32) -> BlockOfferPayload {
    BlockOfferPayload {
        block_id: BlockId::parse(block_id).unwrap(),
        height,
        poe_milli: 900,
        program_count: 1,
    }
}

fn stage(harness: &Harness, offer: &BlockOfferPayload, effectiveness: f64) {
    let message = ChainLink::canonical_message(offer);
    harness.link.stage_offer(
        offer.block_id,
        StagedOffer {
            formulas: vec![Formula::text("f", effectiveness, "x")],
            prev_hash: None,
            signature: harness.keys.sign(message.as_bytes()),
            hmac_tag: hmac_sha256(HMAC_KEY, message.as_bytes()),
        },
    );
}

#[test]
fn test_signed_offer_lands_on_chain() {
    let harness = harness();
    let peer = NodeId::parse("1212121212121212").unwrap();

    let payload = offer("0000000000000011", 1);
    stage(&harness, &payload, 0.9);

    let decision = harness
        .node
        .submit_frame(peer, Frame::BlockOffer(payload), true);
    assert_eq!(decision, AcceptDecision::Accept);
    assert_eq!(harness.chain.height(), 1);

    let snapshot = harness.node.peer_snapshot(&peer).unwrap();
    assert_eq!(snapshot.blocks_accepted, 1);
    assert_eq!(snapshot.blocks_rejected, 0);
    // BLOCK_OFFER reward is 40
    assert_eq!(snapshot.reputation_score, 640);
    harness.node.stop();
}

#[test]
fn test_unstaged_offer_penalizes_peer() {
    let harness = harness();
    let peer = NodeId::parse("3434343434343434").unwrap();

    let decision = harness
        .node
        .submit_frame(peer, Frame::BlockOffer(offer("0000000000000012", 1)), true);
    assert_eq!(decision, AcceptDecision::Accept);
    assert!(harness.chain.is_empty());

    let snapshot = harness.node.peer_snapshot(&peer).unwrap();
    assert_eq!(snapshot.blocks_accepted, 0);
    assert_eq!(snapshot.blocks_rejected, 1);
    // Violation penalty is 80
    assert_eq!(snapshot.reputation_score, 520);
    harness.node.stop();
}

#[test]
fn test_tampered_signature_never_reaches_chain() {
    let harness = harness();
    let peer = NodeId::parse("5656565656565656").unwrap();

    let payload = offer("0000000000000013", 1);
    let message = ChainLink::canonical_message(&payload);
    harness.link.stage_offer(
        payload.block_id,
        StagedOffer {
            formulas: vec![Formula::text("f", 0.9, "x")],
            prev_hash: None,
            signature: harness.keys.sign(b"forged"),
            hmac_tag: hmac_sha256(HMAC_KEY, message.as_bytes()),
        },
    );

    harness
        .node
        .submit_frame(peer, Frame::BlockOffer(payload), true);
    assert!(harness.chain.is_empty());
    let snapshot = harness.node.peer_snapshot(&peer).unwrap();
    assert_eq!(snapshot.blocks_rejected, 1);
    harness.node.stop();
}

#[test]
fn test_consecutive_offers_extend_the_chain() {
    let harness = harness();
    let peer = NodeId::parse("7878787878787878").unwrap();

    let first = offer("0000000000000021", 1);
    stage(&harness, &first, 0.9);
    harness
        .node
        .submit_frame(peer, Frame::BlockOffer(first), true);

    let second = offer("0000000000000022", 2);
    stage(&harness, &second, 0.8);
    harness
        .node
        .submit_frame(peer, Frame::BlockOffer(second), true);

    assert_eq!(harness.chain.height(), 2);
    assert!(harness.chain.verify());
    let snapshot = harness.node.peer_snapshot(&peer).unwrap();
    assert_eq!(snapshot.blocks_accepted, 2);
    harness.node.stop();
}
