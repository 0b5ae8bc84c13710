#![allow(dead_code)]

use df1_link::config::ConnectionConfig;
use df1_link::conn::{run_connection, Conn};
use df1_link::tx::build_frame;
use df1_link::types::{Duplex, ErrorDetect};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
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

pub const DLE: u8 = 0x10;
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;

/// Start a DF1 service over an in-memory serial line, BCC checksums.
/// Returns the client port, the remote serial end and the cancel token.
pub async fn start_service() -> (u16, DuplexStream, CancellationToken) {
    let cfg = ConnectionConfig {
        name: "test".into(),
        device: "unused".into(),
        port: 0,
        duplex: Duplex::Full,
        error_detect: ErrorDetect::Bcc,
        baud: 19200,
        duplicate_detect: true,
        max_nak: 3,
        max_enq: 3,
        ack_timeout: 1000,
    };
    let (local, remote) = tokio::io::duplex(4096);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    let conn = Conn::new(&cfg);
    tokio::spawn(run_connection(local, listener, conn, cancel.clone()));
    (port, remote, cancel)
}

/// Read one complete BCC frame from the line and return its destuffed
/// payload.
pub async fn read_frame(serial: &mut DuplexStream) -> Vec<u8> {
    async fn next(serial: &mut DuplexStream) -> u8 {
        let mut b = [0u8; 1];
        serial.read_exact(&mut b).await.expect("line closed");
        b[0]
    }
    // Hunt for DLE STX.
    loop {
        if next(serial).await != DLE {
            continue;
        }
        if next(serial).await == STX {
            break;
        }
    }
    let mut payload = Vec::new();
    loop {
        let byte = next(serial).await;
        if byte != DLE {
            payload.push(byte);
            continue;
        }
        match next(serial).await {
            DLE => payload.push(DLE),
            ETX => break,
            other => panic!("unexpected symbol after DLE: 0x{:02x}", other),
        }
    }
    let cs = next(serial).await;
    assert_eq!(cs, df1_link::checksum::bcc(&payload), "frame checksum");
    payload
}

/// Acknowledge the last frame.
pub async fn plc_ack(serial: &mut DuplexStream) {
    serial.write_all(&[DLE, ACK]).await.unwrap();
}

/// Reject the last frame.
pub async fn plc_nak(serial: &mut DuplexStream) {
    serial.write_all(&[DLE, NAK]).await.unwrap();
}

/// Build and send a reply to a received command payload: addresses are
/// swapped, the reply bit set, the TNS echoed, `sts` and `data` filled
/// in.
pub async fn plc_reply(serial: &mut DuplexStream, command: &[u8], sts: u8, data: &[u8]) {
    let mut reply = vec![
        command[1],        // back to the originating node
        command[0],        // from the command's destination
        command[2] | 0x40, // reply bit
        sts,
        command[4],
        command[5],
    ];
    reply.extend_from_slice(data);
    serial
        .write_all(&build_frame(&reply, ErrorDetect::Bcc))
        .await
        .unwrap();
}

/// A PLC that ACKs each command and answers it through `respond`,
/// which maps the command payload to (sts, reply data). Runs until the
/// line closes.
pub fn script_plc<F>(mut serial: DuplexStream, mut respond: F) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&[u8]) -> (u8, Vec<u8>) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            // The frame hunt skips the service's ACK of the previous
            // reply.
            let command = read_frame(&mut serial).await;
            plc_ack(&mut serial).await;
            let (sts, data) = respond(&command);
            plc_reply(&mut serial, &command, sts, &data).await;
        }
    })
}
