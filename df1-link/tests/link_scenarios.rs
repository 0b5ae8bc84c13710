//! End-to-end scenarios for one connection: a registered client on the
//! TCP side, a scripted remote station on the serial side.

mod common;

use common::*;
use df1_link::checksum::bcc;
use df1_link::tx::build_frame;
use df1_link::types::ErrorDetect;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Echo command payload used across the scenarios: dst 1, src 2,
/// CMD 0x06, STS 0, TNS 0x1234, FNC 0, data AA 55 01.
const ECHO_PAYLOAD: [u8; 10] = [
    0x01, 0x02, 0x06, 0x00, 0x34, 0x12, 0x00, 0xaa, 0x55, 0x01,
];

#[tokio::test]
async fn echo_frame_on_the_wire_with_bcc() {
    init_tracing();
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "echo").await;

    submit(&mut client, &ECHO_PAYLOAD).await;

    let frame = read_n(&mut serial, 15).await;
    assert_eq!(
        frame,
        [0x10, 0x02, 0x01, 0x02, 0x06, 0x00, 0x34, 0x12, 0x00, 0xaa, 0x55, 0x01, 0x10, 0x03, 0xef]
    );

    serial.write_all(&[DLE, ACK]).await.unwrap();
    assert_eq!(read_n(&mut client, 1).await, [MSG_ACK]);
    cancel.cancel();
}

#[tokio::test]
async fn payload_dle_is_doubled_on_the_wire() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "stuff").await;

    let payload = [0x01, 0x02, 0x06, 0x00, 0x10, 0x20];
    submit(&mut client, &payload).await;

    let frame = read_n(&mut serial, 2 + 7 + 2 + 1).await;
    assert_eq!(
        frame,
        [
            0x10, 0x02, 0x01, 0x02, 0x06, 0x00, 0x10, 0x10, 0x20, 0x10, 0x03,
            bcc(&payload)
        ]
    );
    serial.write_all(&[DLE, ACK]).await.unwrap();
    assert_eq!(read_n(&mut client, 1).await, [MSG_ACK]);
    cancel.cancel();
}

#[tokio::test]
async fn nak_forces_identical_retransmission() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "retry").await;

    submit(&mut client, &ECHO_PAYLOAD).await;
    let first = read_n(&mut serial, 15).await;

    serial.write_all(&[DLE, NAK]).await.unwrap();
    let second = read_n(&mut serial, 15).await;
    assert_eq!(first, second);

    serial.write_all(&[DLE, ACK]).await.unwrap();
    assert_eq!(read_n(&mut client, 1).await, [MSG_ACK]);
    cancel.cancel();
}

#[tokio::test]
async fn too_many_naks_fail_the_transmission() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "naks").await;

    submit(&mut client, &ECHO_PAYLOAD).await;
    // max_nak is three: two retransmissions, then failure.
    for _ in 0..2 {
        let _ = read_n(&mut serial, 15).await;
        serial.write_all(&[DLE, NAK]).await.unwrap();
    }
    let _ = read_n(&mut serial, 15).await;
    serial.write_all(&[DLE, NAK]).await.unwrap();

    assert_eq!(read_n(&mut client, 1).await, [MSG_NAK]);
    cancel.cancel();
}

#[tokio::test]
async fn silence_solicits_enq_and_ack_completes_without_retransmit() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 100, true)).await;
    let mut client = register(port, 2, "enq").await;

    submit(&mut client, &ECHO_PAYLOAD).await;
    let _ = read_n(&mut serial, 15).await;

    // No response: after ack_timeout the transmitter solicits with ENQ.
    let enq = read_n(&mut serial, 2).await;
    assert_eq!(enq, [DLE, ENQ]);

    // The remote re-emits its last ACK; the data frame must not be
    // retransmitted.
    serial.write_all(&[DLE, ACK]).await.unwrap();
    assert_eq!(read_n(&mut client, 1).await, [MSG_ACK]);
    expect_silence(&mut serial, Duration::from_millis(300)).await;
    cancel.cancel();
}

#[tokio::test]
async fn exhausted_enqs_fail_the_transmission() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 50, true)).await;
    let mut client = register(port, 2, "timeout").await;

    submit(&mut client, &ECHO_PAYLOAD).await;
    let _ = read_n(&mut serial, 15).await;
    // max_enq is three; the fourth timeout gives up.
    for _ in 0..3 {
        assert_eq!(read_n(&mut serial, 2).await, [DLE, ENQ]);
    }
    assert_eq!(read_n(&mut client, 1).await, [MSG_NAK]);
    cancel.cancel();
}

#[tokio::test]
async fn duplicate_message_is_acked_but_not_delivered() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "dups").await;

    // Inbound reply-style message for node 2.
    let inbound = [0x02, 0x01, 0x46, 0x00, 0x34, 0x12, 0xaa];
    let frame = build_frame(&inbound, ErrorDetect::Bcc);

    serial.write_all(&frame).await.unwrap();
    let msg = read_n(&mut client, 2 + inbound.len()).await;
    assert_eq!(msg[0], SOH);
    assert_eq!(msg[1] as usize, inbound.len());
    assert_eq!(&msg[2..], &inbound);
    client.write_all(&[MSG_ACK]).await.unwrap();
    assert_eq!(read_n(&mut serial, 2).await, [DLE, ACK]);

    // The identical frame again: ACKed on the wire, nothing delivered.
    serial.write_all(&frame).await.unwrap();
    assert_eq!(read_n(&mut serial, 2).await, [DLE, ACK]);
    expect_silence(&mut client, Duration::from_millis(200)).await;
    cancel.cancel();
}

#[tokio::test]
async fn client_nak_rejects_inbound_message() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, false)).await;
    let mut client = register(port, 2, "reject").await;

    let inbound = [0x02, 0x01, 0x46, 0x00, 0x34, 0x12, 0xaa];
    serial
        .write_all(&build_frame(&inbound, ErrorDetect::Bcc))
        .await
        .unwrap();
    let _ = read_n(&mut client, 2 + inbound.len()).await;
    client.write_all(&[MSG_NAK]).await.unwrap();
    assert_eq!(read_n(&mut serial, 2).await, [DLE, NAK]);
    cancel.cancel();
}

#[tokio::test]
async fn unknown_destination_is_acked_on_behalf() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, false)).await;
    let mut client = register(port, 2, "lonely").await;

    let inbound = [0x09, 0x01, 0x46, 0x00, 0x34, 0x12, 0xaa];
    serial
        .write_all(&build_frame(&inbound, ErrorDetect::Bcc))
        .await
        .unwrap();
    assert_eq!(read_n(&mut serial, 2).await, [DLE, ACK]);
    expect_silence(&mut client, Duration::from_millis(200)).await;
    cancel.cancel();
}

#[tokio::test]
async fn corrupt_checksum_is_naked() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Crc, 1000, false)).await;
    let _client = register(port, 2, "crc").await;

    let inbound = [0x02, 0x01, 0x46, 0x00, 0x34, 0x12, 0xaa];
    let mut frame = build_frame(&inbound, ErrorDetect::Crc);
    let last = frame.len() - 1;
    frame[last] ^= 0xff;
    serial.write_all(&frame).await.unwrap();
    assert_eq!(read_n(&mut serial, 2).await, [DLE, NAK]);
    cancel.cancel();
}

#[tokio::test]
async fn duplicate_address_registration_is_rejected() {
    let (_serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let _first = register(port, 2, "first").await;
    let mut second = register(port, 2, "second").await;

    // The service disconnects the second client.
    let mut buf = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        use tokio::io::AsyncReadExt;
        second.read(&mut buf).await
    })
    .await
    .expect("timed out waiting for disconnect")
    .expect("read failed");
    assert_eq!(closed, 0);
    cancel.cancel();
}

#[tokio::test]
async fn second_soh_while_pending_disconnects_client() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, true)).await;
    let mut client = register(port, 2, "greedy").await;

    submit(&mut client, &ECHO_PAYLOAD).await;
    let _ = read_n(&mut serial, 15).await;
    // A second message before the first completes is a violation.
    submit(&mut client, &ECHO_PAYLOAD).await;

    let mut buf = [0u8; 8];
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        use tokio::io::AsyncReadExt;
        loop {
            match client.read(&mut buf).await {
                Ok(0) => break true,
                Ok(_) => continue,
                Err(_) => break true,
            }
        }
    })
    .await
    .expect("timed out waiting for disconnect");
    assert!(closed);
    cancel.cancel();
}

#[tokio::test]
async fn round_robin_alternates_between_clients() {
    let (mut serial, port, cancel) = start(config(ErrorDetect::Bcc, 1000, false)).await;
    let mut a = register(port, 2, "a").await;
    let mut b = register(port, 3, "b").await;

    // Both clients queue a message while the line is busy with a's.
    let msg_a = [0x01, 0x02, 0x06, 0x00, 0x11, 0x11];
    let msg_b = [0x01, 0x03, 0x06, 0x00, 0x22, 0x22];
    submit(&mut a, &msg_a).await;
    let first = read_n(&mut serial, build_frame(&msg_a, ErrorDetect::Bcc).len()).await;
    assert_eq!(first, build_frame(&msg_a, ErrorDetect::Bcc));
    submit(&mut b, &msg_b).await;
    submit_after_ack(&mut serial).await;
    assert_eq!(read_n(&mut a, 1).await, [MSG_ACK]);

    // b is next in line.
    let second = read_n(&mut serial, build_frame(&msg_b, ErrorDetect::Bcc).len()).await;
    assert_eq!(second, build_frame(&msg_b, ErrorDetect::Bcc));
    submit_after_ack(&mut serial).await;
    assert_eq!(read_n(&mut b, 1).await, [MSG_ACK]);
    cancel.cancel();
}

async fn submit_after_ack(serial: &mut tokio::io::DuplexStream) {
    serial.write_all(&[DLE, ACK]).await.unwrap();
}
