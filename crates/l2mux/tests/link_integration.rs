//! End-to-end tests driving two links through their transport ends

use l2mux::{ChannelConfig, L2capChannel, L2capError, Link, LinkConfig, RawBuilder, TransportEnd};
use std::thread;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Move every frame one transport has queued over to the other
fn forward(from: &TransportEnd, to: &TransportEnd) -> usize {
    let mut moved = 0;
    while let Some(frame) = from.try_dequeue() {
        to.try_enqueue(frame).unwrap();
        moved += 1;
    }
    moved
}

#[test]
fn test_sdus_flow_in_both_directions() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let config = ChannelConfig::default().with_mps(24);
    let (a, a_user) = L2capChannel::new_dynamic(0x0040, config);
    let (b, b_user) = L2capChannel::new_dynamic(0x0040, config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    a_user.send(vec![0x11; 100]).unwrap();
    b_user.send(vec![0x22; 10]).unwrap();

    left.service();
    right.service();
    forward(&left_transport, &right_transport);
    forward(&right_transport, &left_transport);
    left.service();
    right.service();

    assert_eq!(b_user.receive(), Some(vec![0x11; 100]));
    assert_eq!(a_user.receive(), Some(vec![0x22; 10]));
    assert_eq!(left.stats().fragments_sent, 5);
    assert_eq!(right.stats().frames_received, 5);
}

#[test]
fn test_fixed_channel_with_builder_payload() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let (att, att_user) = L2capChannel::new_fixed(0x0004);
    let (peer, peer_user) = L2capChannel::new_fixed(0x0004);
    left.attach_channel(&att).unwrap();
    right.attach_channel(&peer).unwrap();

    let mut request = RawBuilder::new();
    request.add_u8(0x0A).add_u16(0x0003);
    att_user.send(request).unwrap();

    left.service();
    forward(&left_transport, &right_transport);
    right.service();

    assert_eq!(peer_user.receive(), Some(vec![0x0A, 0x03, 0x00]));
}

#[test]
fn test_threaded_producer_keeps_order() {
    init_logging();
    const PAYLOADS: usize = 50;

    let config = LinkConfig {
        link_queue_capacity: 4,
        ..LinkConfig::default()
    };
    let (mut left, left_transport) = Link::start(config);
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let channel_config = ChannelConfig::default().with_mps(16);
    let (a, a_user) = L2capChannel::new_dynamic(0x0041, channel_config);
    let (b, b_user) = L2capChannel::new_dynamic(0x0041, channel_config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    let producer = thread::spawn(move || {
        for index in 0..PAYLOADS {
            let payload = vec![index as u8; 1 + index % 40];
            loop {
                match a_user.send(payload.clone()) {
                    Ok(()) => break,
                    Err(L2capError::QueueFull) => thread::yield_now(),
                    Err(err) => panic!("unexpected send error: {err}"),
                }
            }
        }
    });

    let mut received = Vec::new();
    for _ in 0..1_000_000 {
        left.service();
        forward(&left_transport, &right_transport);
        right.service();
        received.extend(std::iter::from_fn(|| b_user.receive()));

        if received.len() == PAYLOADS {
            break;
        }
        thread::yield_now();
    }

    producer.join().unwrap();

    let expected: Vec<Vec<u8>> = (0..PAYLOADS)
        .map(|index| vec![index as u8; 1 + index % 40])
        .collect();
    assert_eq!(received, expected);
}

#[test]
fn test_credit_based_channel_end_to_end() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let sender_config = ChannelConfig::default().with_credits(2, 0);
    let receiver_config = ChannelConfig::default().with_credits(0, 2);
    let (a, a_user) = L2capChannel::new_dynamic(0x0050, sender_config);
    let (b, b_user) = L2capChannel::new_dynamic(0x0050, receiver_config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    for index in 0..3u8 {
        a_user.send(vec![index]).unwrap();
    }

    left.service();
    assert_eq!(forward(&left_transport, &right_transport), 2);
    right.service();
    assert_eq!(b_user.receive(), Some(vec![0]));
    assert_eq!(b_user.receive(), Some(vec![1]));
    assert_eq!(right.data_controller(0x0050).unwrap().peer_credits(), Some(0));

    // Credits from the peer release the third payload
    assert!(right.grant_peer_credits(0x0050, 1));
    assert!(left.add_credits(0x0050, 1));
    forward(&left_transport, &right_transport);
    right.service();

    assert_eq!(b_user.receive(), Some(vec![2]));
    assert_eq!(left.scheduler().credits(0x0050), Some(0));
}

#[test]
fn test_peer_exceeding_credits_is_dropped() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let (a, a_user) = L2capChannel::new_dynamic(0x0050, ChannelConfig::default());
    let receiver_config = ChannelConfig::default().with_credits(0, 1);
    let (b, b_user) = L2capChannel::new_dynamic(0x0050, receiver_config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    a_user.send(vec![1]).unwrap();
    a_user.send(vec![2]).unwrap();
    left.service();
    forward(&left_transport, &right_transport);
    right.service();

    assert_eq!(b_user.receive(), Some(vec![1]));
    assert_eq!(b_user.receive(), None);
    let stats = right.data_controller(0x0050).unwrap().stats();
    assert_eq!(stats.frames_dropped_malformed, 1);
}

#[test]
fn test_credit_violation_does_not_spoil_next_payload() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let receiver_config = ChannelConfig::default().with_credits(0, 1);
    let (a, a_user) = L2capChannel::new_dynamic(0x0050, ChannelConfig::default());
    let (b, b_user) = L2capChannel::new_dynamic(0x0050, receiver_config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    a_user.send(vec![1]).unwrap();
    a_user.send(vec![2]).unwrap();
    left.service();
    forward(&left_transport, &right_transport);
    right.service();
    assert_eq!(b_user.receive(), Some(vec![1]));
    assert_eq!(b_user.receive(), None);

    assert!(right.grant_peer_credits(0x0050, 5));
    a_user.send(vec![3]).unwrap();
    left.service();
    forward(&left_transport, &right_transport);
    right.service();

    assert_eq!(b_user.receive(), Some(vec![3]));
    let stats = right.data_controller(0x0050).unwrap().stats();
    assert_eq!(stats.frames_dropped_malformed, 1);
    assert_eq!(stats.sdus_delivered, 2);
}

#[test]
fn test_full_size_mtu_payload_crosses_link() {
    init_logging();
    let (mut left, left_transport) = Link::start(LinkConfig::default());
    let (mut right, right_transport) = Link::start(LinkConfig::default());

    let config = ChannelConfig::new(u16::MAX);
    let (a, a_user) = L2capChannel::new_dynamic(0x0040, config);
    let (b, b_user) = L2capChannel::new_dynamic(0x0040, config);
    left.attach_channel(&a).unwrap();
    right.attach_channel(&b).unwrap();

    let payload: Vec<u8> = (0..u16::MAX as usize).map(|i| (i % 251) as u8).collect();
    a_user.send(payload.clone()).unwrap();
    left.service();
    forward(&left_transport, &right_transport);
    right.service();

    assert_eq!(right.stats().frames_unroutable, 0);
    assert_eq!(b_user.receive(), Some(payload));
}

#[test]
fn test_garbage_from_transport_is_survived() {
    init_logging();
    let (mut link, transport) = Link::start(LinkConfig::default());
    let (a, a_user) = L2capChannel::new_dynamic(0x0040, ChannelConfig::default());
    link.attach_channel(&a).unwrap();

    transport.try_enqueue(vec![]).unwrap();
    transport.try_enqueue(vec![0x02, 0x00]).unwrap();
    transport.try_enqueue(vec![0xFF, 0xFF, 0x40, 0x00, 0x00]).unwrap();
    // Valid header, supervisory control field
    transport.try_enqueue(vec![0x02, 0x00, 0x40, 0x00, 0x01, 0x00]).unwrap();
    // Unsegmented I-frame, TxSeq 0
    transport.try_enqueue(vec![0x04, 0x00, 0x40, 0x00, 0x00, 0x00, 0xAB, 0xCD]).unwrap();

    assert_eq!(link.on_fragment_arrived(), 5);
    assert_eq!(a_user.receive(), Some(vec![0xAB, 0xCD]));

    let stats = link.stats();
    assert_eq!(stats.frames_unroutable, 3);
    let channel_stats = link.data_controller(0x0040).unwrap().stats();
    assert_eq!(channel_stats.frames_dropped_malformed, 1);
}

#[test]
fn test_send_rejects_oversized_payload() {
    let (_channel, user) = L2capChannel::new_dynamic(0x0040, ChannelConfig::new(48));

    assert_eq!(
        user.send(vec![0u8; 49]),
        Err(L2capError::MtuExceeded { size: 49, mtu: 48 })
    );
    assert!(user.send(vec![0u8; 48]).is_ok());
}
