// Two nodes exchanging frames through the gossip address book

use kolibri_core::NodeId;
use kolibri_swarm::codec::{Frame, FrameType, HelloPayload, PingPayload};
use kolibri_swarm::gossip::{datagram_decode, datagram_encode, GossipNetwork, Transport};
use kolibri_swarm::node::{NodeOptions, SwarmNode};
use kolibri_swarm::AcceptDecision;
use std::sync::Arc;

fn node(id: &str, services: u16) -> Arc<SwarmNode> {
    let node = Arc::new(SwarmNode::new(NodeOptions::new(
        NodeId::parse(id).unwrap(),
        1,
        services,
    )));
    node.start();
    node
}

#[test]
fn test_hello_exchange_between_two_nodes() {
    let a = node("1010101010101010", 1);
    let b = node("2020202020202020", 2);
    let network = GossipNetwork::new();
    network.add_peer(Arc::clone(&a)).unwrap();
    network.add_peer(Arc::clone(&b)).unwrap();

    // A introduces itself to the swarm
    let hello = Frame::Hello(HelloPayload {
        version: 1,
        node_id: a.node_id(),
        services: 1,
        reputation: 600,
    });
    let delivered = network.broadcast(&a.node_id(), &hello, Transport::Udp).unwrap();
    assert_eq!(delivered, 1);

    // B queued a reply describing itself, addressed back to A
    let reply = b.poll_outbound(1000).expect("hello reply");
    assert_eq!(reply.peer_id, a.node_id());
    let Frame::Hello(reply_hello) = &reply.frame else {
        panic!("expected hello reply, got {:?}", reply.frame);
    };
    assert_eq!(reply_hello.node_id, b.node_id());
    assert_eq!(reply_hello.services, 2);

    // Deliver the reply over the wire form, as a datagram would carry it
    let datagram = datagram_encode(Transport::Udp, &reply.frame).unwrap();
    let (transport, parsed) = datagram_decode(&datagram).unwrap();
    assert_eq!(transport, Transport::Udp);
    let decision = a.submit_frame(b.node_id(), parsed, true);
    assert_eq!(decision, AcceptDecision::Accept);

    // Both sides now know each other
    let b_view_of_a = b.peer_snapshot(&a.node_id()).unwrap();
    assert_eq!(b_view_of_a.frames[FrameType::Hello.index()], 1);
    assert_eq!(
        b_view_of_a.hello.as_ref().map(|h| h.node_id),
        Some(a.node_id())
    );
    let a_view_of_b = a.peer_snapshot(&b.node_id()).unwrap();
    assert_eq!(a_view_of_b.frames[FrameType::Hello.index()], 1);

    a.stop();
    b.stop();
}

#[test]
fn test_ping_pong_keeps_nonce() {
    let a = node("1010101010101010", 0);
    let b = node("2020202020202020", 0);

    let decision = b.submit_frame(
        a.node_id(),
        Frame::Ping(PingPayload {
            nonce: 123_456_789,
            latency_hint_ms: 25,
        }),
        true,
    );
    assert_eq!(decision, AcceptDecision::Accept);

    let echo = b.poll_outbound(1000).expect("ping echo");
    let Frame::Ping(pong) = echo.frame else {
        panic!("expected ping echo");
    };
    assert_eq!(pong.nonce, 123_456_789);
    assert_eq!(pong.latency_hint_ms, 25);

    // The echo parses on the wire unchanged
    let wire = Frame::Ping(pong).serialize().unwrap();
    assert_eq!(Frame::parse(&wire).unwrap(), Frame::Ping(pong));

    a.stop();
    b.stop();
}

#[test]
fn test_misbehaving_peer_gets_blocked_across_frames() {
    let b = node("2020202020202020", 0);
    let noisy = NodeId::parse("6666666666666666").unwrap();

    // HELLO allows a burst of one; hammering it bleeds reputation by 20
    // per rejected frame: 600 -> below 200 after 21 rejections
    let hello = Frame::Hello(HelloPayload {
        version: 1,
        node_id: noisy,
        services: 0,
        reputation: 600,
    });
    assert_eq!(
        b.submit_frame(noisy, hello.clone(), true),
        AcceptDecision::Accept
    );
    let mut last = AcceptDecision::Accept;
    for _ in 0..25 {
        last = b.submit_frame(noisy, hello.clone(), true);
    }
    assert_eq!(last, AcceptDecision::ReputationBlocked);

    // Even a polite ping is refused now
    assert_eq!(
        b.submit_frame(
            noisy,
            Frame::Ping(PingPayload {
                nonce: 1,
                latency_hint_ms: 1,
            }),
            true,
        ),
        AcceptDecision::ReputationBlocked
    );
    b.stop();
}
