#![allow(dead_code)]

use df1_link::config::ConnectionConfig;
use df1_link::conn::{run_connection, Conn};
use df1_link::types::{Duplex, ErrorDetect};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

static INIT_TRACING: std::sync::Once = std::sync::Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

pub const SOH: u8 = 0x01;
pub const MSG_ACK: u8 = 0x06;
pub const MSG_NAK: u8 = 0x15;
pub const DLE: u8 = 0x10;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const ENQ: u8 = 0x05;

pub fn config(error_detect: ErrorDetect, ack_timeout: u64, duplicate_detect: bool) -> ConnectionConfig {
    ConnectionConfig {
        name: "test".into(),
        device: "unused".into(),
        port: 0,
        duplex: Duplex::Full,
        error_detect,
        baud: 19200,
        duplicate_detect,
        max_nak: 3,
        max_enq: 3,
        ack_timeout,
    }
}

/// Start one connection over an in-memory serial line. Returns the
/// remote end of the line, the client TCP port and the cancel token.
pub async fn start(cfg: ConnectionConfig) -> (DuplexStream, u16, CancellationToken) {
    let (local, remote) = tokio::io::duplex(4096);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let conn = Conn::new(&cfg);
    tokio::spawn(run_connection(local, listener, conn, cancel.clone()));
    (remote, port, cancel)
}

/// Connect and register a client at a node address.
pub async fn register(port: u16, addr: u8, name: &str) -> TcpStream {
    let mut socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    socket.write_all(&[addr, name.len() as u8]).await.unwrap();
    socket.write_all(name.as_bytes()).await.unwrap();
    // Give the connection task a moment to process the registration.
    tokio::time::sleep(Duration::from_millis(50)).await;
    socket
}

/// Submit an application message on behalf of a registered client.
pub async fn submit(socket: &mut TcpStream, payload: &[u8]) {
    socket.write_all(&[SOH, payload.len() as u8]).await.unwrap();
    socket.write_all(payload).await.unwrap();
}

/// Read exactly `n` bytes or panic after two seconds.
pub async fn read_n<R>(reader: &mut R, n: usize) -> Vec<u8>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = vec![0u8; n];
    tokio::time::timeout(Duration::from_secs(2), reader.read_exact(&mut buf))
        .await
        .expect("timed out waiting for bytes")
        .expect("stream closed");
    buf
}

/// Assert nothing arrives within the window.
pub async fn expect_silence<R>(reader: &mut R, window: Duration)
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(window, reader.read_exact(&mut buf)).await;
    assert!(read.is_err(), "unexpected byte 0x{:02x}", buf[0]);
}
