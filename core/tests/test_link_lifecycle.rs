// Link lifecycle: connect, drop mid-message, recover
//
// Covers what happens to both directions of the pipe when the central goes
// away or the stack fails partway through a message.

use datapipe_core::message::encode_framed;
use datapipe_core::{
    AbortReason, DataPipe, DeliveryMode, GattError, LoopbackLink, LoopbackPeripheral, Message,
    PeripheralEvents, PipeConfig, Reassembler, SendOutcome, ThrottlePolicy, TYPE_JSON,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

fn started_pipe(config: PipeConfig) -> (DataPipe<LoopbackPeripheral>, LoopbackLink) {
    let link = LoopbackLink::new();
    let mut pipe = DataPipe::new(config, link.peripheral()).expect("Valid config");
    pipe.begin().expect("Begin");
    (pipe, link)
}

fn attach(pipe: &mut DataPipe<LoopbackPeripheral>, link: &LoopbackLink, mtu: u16) {
    link.connect(mtu);
    pipe.on_peer_connected(mtu);
}

fn detach(pipe: &mut DataPipe<LoopbackPeripheral>, link: &LoopbackLink) {
    link.disconnect();
    pipe.on_peer_disconnected(0x13);
}

#[test]
fn test_inbound_disconnect_mid_message_leaves_no_stale_bytes() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Rx"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipe.set_on_binary(move |kind, data| sink.lock().push((kind, data.to_vec())));

    attach(&mut pipe, &link, 23);
    let first = encode_framed(&Message::binary(7, &[0x11; 100]).expect("Valid"));
    pipe.on_bytes_written(&first[..40]);
    assert_eq!(pipe.reassembler().buffered_len(), 37);

    detach(&mut pipe, &link);
    assert!(pipe.reassembler().is_idle());

    attach(&mut pipe, &link, 23);
    let second = encode_framed(&Message::binary(8, &[0x22; 10]).expect("Valid"));
    pipe.on_bytes_written(&second);

    assert_eq!(seen.lock().as_slice(), &[(8u8, vec![0x22; 10])]);
    println!("✓ Partial message dropped on disconnect, next message clean");
}

#[test]
fn test_partial_header_cleared_on_reconnect() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Hdr"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipe.set_on_binary(move |kind, data| sink.lock().push((kind, data.to_vec())));

    attach(&mut pipe, &link, 23);
    pipe.on_bytes_written(&[0x03, 0xFF]);
    assert_eq!(pipe.reassembler().pending_header_len(), 2);

    // a fresh connection without a disconnect callback still starts clean
    attach(&mut pipe, &link, 23);
    pipe.on_bytes_written(&[0x04, 0x02, 0x00, b'o', b'k']);

    assert_eq!(seen.lock().as_slice(), &[(4u8, b"ok".to_vec())]);
}

#[test]
fn test_readvertise_after_each_disconnect() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Adv"));
    assert!(link.is_advertising());

    for round in 1..=3 {
        attach(&mut pipe, &link, 185);
        assert!(!link.is_advertising());
        assert!(pipe.is_connected());
        assert_eq!(pipe.mtu(), 185);

        detach(&mut pipe, &link);
        assert!(link.is_advertising());
        assert!(!pipe.is_connected());
        assert_eq!(pipe.mtu(), 23);
        assert_eq!(link.advertise_count(), round + 1);
    }
    println!("✓ Advertising restarted after 3 disconnects");
}

#[test]
fn test_outbound_disconnect_mid_sequence() {
    let config = PipeConfig::new("Tx")
        .with_delivery_mode(DeliveryMode::Unconfirmed)
        .with_throttle(ThrottlePolicy::none());
    let (mut pipe, link) = started_pipe(config);
    attach(&mut pipe, &link, 23);
    link.drop_after(3);

    // 200 payload bytes at MTU 23: 11 frames
    let outcome = pipe.send_binary(4, &[0xAB; 200]);
    match outcome {
        SendOutcome::Aborted { sent, total, reason } => {
            assert_eq!(sent, 3);
            assert_eq!(total, 11);
            assert_eq!(reason, AbortReason::Disconnected);
        }
        other => panic!("Expected abort, got {:?}", other),
    }
    assert_eq!(link.take_frames().len(), 3);

    pipe.on_peer_disconnected(0x08);
    attach(&mut pipe, &link, 23);
    assert!(matches!(pipe.send_binary(4, &[0xAB; 200]), SendOutcome::Sent { frames: 11 }));

    let mut rx = Reassembler::default();
    let done: Vec<Message> = link
        .take_frames()
        .iter()
        .flat_map(|f| rx.push(&f.bytes))
        .collect();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].payload(), vec![0xAB; 200]);
}

#[test]
fn test_indication_failure_aborts_remaining_frames() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Fail"));
    attach(&mut pipe, &link, 23);
    link.fail_transmit_at(2);

    let outcome = pipe.send_binary(4, &[0; 200]);
    match outcome {
        SendOutcome::Aborted {
            sent: 2,
            total: 11,
            reason: AbortReason::TransmitFailed(GattError::IndicationFailed(_)),
        } => {}
        other => panic!("Expected indication abort, got {:?}", other),
    }
    assert_eq!(link.take_frames().len(), 2);
    assert!(pipe.is_connected());
}

#[test]
fn test_notify_failure_aborts_remaining_frames() {
    let config = PipeConfig::new("NotifyFail")
        .with_delivery_mode(DeliveryMode::Unconfirmed)
        .with_throttle(ThrottlePolicy::none());
    let (mut pipe, link) = started_pipe(config);
    attach(&mut pipe, &link, 23);
    link.fail_transmit_at(1);

    let outcome = pipe.send_binary(4, &[0x3C; 200]);
    match outcome {
        SendOutcome::Aborted {
            sent: 1,
            total: 11,
            reason: AbortReason::TransmitFailed(GattError::WriteFailed(_)),
        } => {}
        other => panic!("Expected notify abort, got {:?}", other),
    }
    let frames = link.take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].mode, DeliveryMode::Unconfirmed);
    assert!(pipe.is_connected());

    // the next message goes out whole and rebuilds cleanly on a fresh receiver
    assert!(matches!(pipe.send_binary(4, &[0x3C; 200]), SendOutcome::Sent { frames: 11 }));
    let mut rx = Reassembler::default();
    let done: Vec<Message> = link
        .take_frames()
        .iter()
        .flat_map(|f| rx.push(&f.bytes))
        .collect();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].payload(), vec![0x3C; 200]);
}

#[test]
fn test_decode_failure_does_not_poison_pipe() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Json"));
    let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    pipe.set_on_json(move |doc| sink.lock().push(doc.clone()));
    attach(&mut pipe, &link, 23);

    pipe.on_bytes_written(&[TYPE_JSON, 0x03, 0x00, b'{', b'{', b'{']);
    assert!(seen.lock().is_empty());
    assert!(pipe.reassembler().is_idle());

    let good = encode_framed(&Message::json(&json!({"ok": true})).expect("Valid"));
    pipe.on_bytes_written(&good);
    assert_eq!(seen.lock().as_slice(), &[json!({"ok": true})]);
}

#[test]
fn test_runtime_mode_switch() {
    let (mut pipe, link) = started_pipe(PipeConfig::new("Mode").with_throttle(ThrottlePolicy::none()));
    attach(&mut pipe, &link, 64);
    assert_eq!(pipe.delivery_mode(), DeliveryMode::Confirmed);

    pipe.send_json(&json!({"n": 1}));
    pipe.set_delivery_mode(DeliveryMode::Unconfirmed);
    pipe.send_json(&json!({"n": 2}));
    pipe.set_delivery_mode(DeliveryMode::Confirmed);
    pipe.send_json(&json!({"n": 3}));

    let modes: Vec<DeliveryMode> = link.take_frames().into_iter().map(|f| f.mode).collect();
    assert_eq!(
        modes,
        vec![
            DeliveryMode::Confirmed,
            DeliveryMode::Unconfirmed,
            DeliveryMode::Confirmed
        ]
    );
}

#[test]
fn test_stop_and_restart() {
    let link = LoopbackLink::new();
    {
        let mut pipe = DataPipe::new(PipeConfig::new("Once"), link.peripheral()).expect("Valid");
        pipe.begin().expect("Begin");
        attach(&mut pipe, &link, 23);
        pipe.stop();
        assert!(!link.is_connected());
        assert!(matches!(pipe.send_binary(1, b"late"), SendOutcome::NotConnected));
    }
    assert!(link.service().is_none());

    let mut pipe = DataPipe::new(PipeConfig::new("Twice"), link.peripheral()).expect("Valid");
    pipe.begin().expect("Stack is free again");
    assert_eq!(link.service().map(|s| s.device_name), Some("Twice".to_string()));
}
