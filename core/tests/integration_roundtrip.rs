// Integration test: framer -> link -> reassembler -> dispatcher
//
// This test verifies that:
// - Any message survives framing at any MTU and any write split
// - Frame counts follow ceil((len + 3) / (mtu - 4))
// - A DataPipe on the loopback link sends and receives complete messages

use datapipe_core::message::encode_framed;
use datapipe_core::transport::ble::{frame_count, max_frame_size};
use datapipe_core::{
    DataPipe, DeliveryMode, FramePlan, LoopbackLink, LoopbackPeripheral, Message,
    PeripheralEvents, PipeConfig, Reassembler, SendOutcome, ThrottlePolicy,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn connected_pipe(mtu: u16, config: PipeConfig) -> (DataPipe<LoopbackPeripheral>, LoopbackLink) {
    let link = LoopbackLink::new();
    let mut pipe = DataPipe::new(config, link.peripheral()).expect("Valid config");
    pipe.begin().expect("Begin");
    link.connect(mtu);
    pipe.on_peer_connected(mtu);
    (pipe, link)
}

/// Central side: rebuild whatever the peripheral transmitted
fn receive_all(link: &LoopbackLink) -> Vec<Message> {
    let mut rx = Reassembler::default();
    link.take_frames()
        .iter()
        .flat_map(|frame| rx.push(&frame.bytes))
        .collect()
}

proptest! {
    #[test]
    fn prop_roundtrip_any_mtu(
        kind in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        mtu in 7u16..=517,
    ) {
        let message = Message::binary(kind, &payload).expect("Within limit");
        let plan = FramePlan::new(&message, mtu).expect("MTU fits a header");

        let mut rx = Reassembler::default();
        let mut done = Vec::new();
        for frame in plan.frames() {
            prop_assert!(frame.len() <= max_frame_size(mtu));
            done.extend(rx.push(frame));
        }

        prop_assert_eq!(done, vec![message]);
        prop_assert!(rx.is_idle());
    }

    #[test]
    fn prop_frame_count_formula(len in 0usize..20_000, mtu in 7u16..=517) {
        let message = Message::binary(3, &vec![0x5A; len]).expect("Within limit");
        let plan = FramePlan::new(&message, mtu).expect("MTU fits a header");
        let expected = (len + 3).div_ceil(mtu as usize - 4);

        prop_assert_eq!(plan.frame_count(), expected);
        prop_assert_eq!(plan.frames().count(), expected);
        prop_assert_eq!(frame_count(len + 3, max_frame_size(mtu)), expected);
        prop_assert_eq!(plan.frames().flatten().copied().collect::<Vec<u8>>(), encode_framed(&message));
    }

    #[test]
    fn prop_arbitrary_write_splits(
        payload in proptest::collection::vec(any::<u8>(), 0..1024),
        cuts in proptest::collection::vec(1usize..64, 1..64),
    ) {
        let message = Message::binary(9, &payload).expect("Within limit");
        let bytes = encode_framed(&message);

        let mut rx = Reassembler::default();
        let mut done = Vec::new();
        let mut rest = bytes.as_slice();
        let mut cut = cuts.iter().cycle();
        while !rest.is_empty() {
            let n = (*cut.next().expect("Cycle never ends")).min(rest.len());
            done.extend(rx.push(&rest[..n]));
            rest = &rest[n..];
        }

        prop_assert_eq!(done, vec![message]);
    }
}

#[test]
fn test_one_byte_fragmentation() {
    let payload: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
    let message = Message::binary(0x42, &payload).expect("Valid");

    let mut rx = Reassembler::default();
    let mut done = Vec::new();
    for byte in encode_framed(&message) {
        done.extend(rx.push(&[byte]));
    }

    assert_eq!(done, vec![message]);
    println!("✓ 303 single-byte writes rebuilt one message");
}

#[test]
fn test_json_small_mtu_single_frame() {
    let (mut pipe, link) = connected_pipe(23, PipeConfig::new("Json"));

    let outcome = pipe.send_json(&json!({"a": 1}));
    assert!(matches!(outcome, SendOutcome::Sent { frames: 1 }));

    let frames = link.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].mode, DeliveryMode::Confirmed);
    assert_eq!(frames[0].bytes, b"\x00\x07\x00{\"a\":1}".to_vec());
    println!("✓ {{\"a\":1}} sent as one 10-byte indication");
}

#[test]
fn test_binary_500_bytes_at_minimum_mtu() {
    let config = PipeConfig::new("Bulk")
        .with_delivery_mode(DeliveryMode::Unconfirmed)
        .with_throttle(ThrottlePolicy::none());
    let (mut pipe, link) = connected_pipe(23, config);
    let payload: Vec<u8> = (0..500u16).map(|i| i as u8).collect();

    let outcome = pipe.send_binary(5, &payload);
    assert!(matches!(outcome, SendOutcome::Sent { frames: 27 }));

    let frames = link.take_frames();
    assert_eq!(frames.len(), 27);
    assert!(frames[..26].iter().all(|f| f.bytes.len() == 19));
    assert_eq!(frames[26].bytes.len(), 9);
    assert_eq!(frames[0].bytes[..3], [5, 0xF4, 0x01]);

    let mut rx = Reassembler::default();
    let done: Vec<Message> = frames.iter().flat_map(|f| rx.push(&f.bytes)).collect();
    assert_eq!(done, vec![Message::binary(5, &payload).expect("Valid")]);
    println!("✓ 500-byte payload: 27 notifications, reassembled intact");
}

#[test]
fn test_max_payload_confirmed() {
    let (mut pipe, link) = connected_pipe(517, PipeConfig::new("Max"));
    let payload = vec![0xC3; 65_535];

    let outcome = pipe.send_binary(1, &payload);
    assert!(matches!(outcome, SendOutcome::Sent { frames: 128 }));
    assert!(link.take_frames().iter().all(|f| f.mode == DeliveryMode::Confirmed));

    pipe.send_binary(1, &payload);
    let done = receive_all(&link);
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].payload().len(), 65_535);
    println!("✓ 65535-byte payload: 128 indications at MTU 517");
}

#[test]
fn test_oversized_payload_rejected() {
    let (mut pipe, link) = connected_pipe(517, PipeConfig::new("Big"));

    let outcome = pipe.send_binary(1, &vec![0; 65_536]);
    assert!(matches!(outcome, SendOutcome::Rejected(_)));
    assert_eq!(link.pending_frames(), 0);
}

#[test]
fn test_largest_message_header_carries_full_length() {
    let (mut pipe, link) = connected_pipe(517, PipeConfig::new("Max"));
    let message = Message::new(1, vec![0xAB; 65_535]).expect("Largest payload");

    // 65538 framed bytes in 513-byte frames
    assert!(matches!(pipe.send(&message), SendOutcome::Sent { frames: 128 }));
    let frames = link.take_frames();
    assert_eq!(frames.len(), 128);
    assert_eq!(&frames[0].bytes[..3], &[0x01, 0xFF, 0xFF]);

    let mut rx = Reassembler::default();
    let done: Vec<Message> = frames.iter().flat_map(|f| rx.push(&f.bytes)).collect();
    assert_eq!(done, vec![message]);
    assert!(rx.is_idle());

    // one byte more never becomes a Message to send
    assert!(Message::new(1, vec![0xAB; 65_536]).is_err());
}

#[test]
fn test_mtu_too_small_for_header() {
    let (mut pipe, link) = connected_pipe(6, PipeConfig::new("Tiny"));

    let outcome = pipe.send_binary(1, b"x");
    assert!(matches!(outcome, SendOutcome::FrameTooSmall { mtu: 6 }));
    assert_eq!(link.pending_frames(), 0);

    link.set_mtu(7);
    assert!(pipe.send_binary(1, b"x").is_sent());
    let frames = link.take_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].bytes, vec![1, 1, 0]);
    assert_eq!(frames[1].bytes, b"x".to_vec());
}

#[test]
fn test_unconfirmed_frames_are_paced() {
    let config = PipeConfig::new("Paced").with_delivery_mode(DeliveryMode::Unconfirmed);
    let (mut pipe, link) = connected_pipe(23, config);

    // 12 frames: more than 10, so 10 ms between each
    let start = Instant::now();
    assert!(matches!(pipe.send_binary(2, &[0; 220]), SendOutcome::Sent { frames: 12 }));
    assert!(start.elapsed() >= Duration::from_millis(110));

    // 3 frames: 5 ms between each
    let start = Instant::now();
    assert!(matches!(pipe.send_binary(2, &[0; 40]), SendOutcome::Sent { frames: 3 }));
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert_eq!(link.take_frames().len(), 15);
}

#[test]
fn test_inbound_split_json_dispatch() {
    let (mut pipe, _link) = connected_pipe(23, PipeConfig::new("Rx"));
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipe.set_on_json(move |doc| sink.lock().push(doc.clone()));

    let document = json!({"sensor": "temp", "readings": [21.5, 21.7, 21.9], "unit": "C"});
    let message = Message::json(&document).expect("Valid");
    let plan = FramePlan::new(&message, 23).expect("Fits");
    assert!(plan.frame_count() > 1);

    for frame in plan.frames() {
        pipe.on_bytes_written(frame);
    }

    assert_eq!(seen.lock().as_slice(), &[document]);
    println!("✓ JSON document rebuilt from {} writes", plan.frame_count());
}

#[test]
fn test_back_to_back_messages_in_one_write() {
    let (mut pipe, _link) = connected_pipe(23, PipeConfig::new("Burst"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipe.set_on_binary(move |kind, data| sink.lock().push((kind, data.to_vec())));

    let mut write = encode_framed(&Message::binary(1, b"one").expect("Valid"));
    write.extend(encode_framed(&Message::binary(2, b"two").expect("Valid")));
    pipe.on_bytes_written(&write);

    assert_eq!(
        seen.lock().as_slice(),
        &[(1u8, b"one".to_vec()), (2u8, b"two".to_vec())]
    );
}
