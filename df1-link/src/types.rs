use serde::Deserialize;
use std::fmt;

/// Link layer symbols embedded after a DLE on the wire.
pub mod sym {
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const ENQ: u8 = 0x05;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;
    pub const DLE: u8 = 0x10;
}

/// Service framing bytes exchanged between a client and the service over TCP.
pub mod msg {
    /// Starts a framed application message in either direction.
    pub const SOH: u8 = 0x01;
    /// Positive outcome: transmission succeeded / inbound message accepted.
    pub const ACK: u8 = 0x06;
    /// Negative outcome: transmission failed / inbound message rejected.
    pub const NAK: u8 = 0x15;
}

/// Maximum length of a connection name.
pub const CONN_NAME_LEN: usize = 16;

/// Maximum length of a client name, not counting any terminator.
pub const CLIENT_NAME_LEN: usize = 16;

/// System tick period driving the RX/TX timers.
pub const TICK_MS: u64 = 10;

/// A DF1 node address. One byte of logical identity on the line.
pub type NodeAddr = u8;

/// Serial line duplex mode. Parsed and stored; the engine currently
/// behaves identically in all three modes (no half-duplex polling).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    #[default]
    Full,
    /// Half duplex master.
    Master,
    /// Half duplex slave.
    Slave,
}

impl fmt::Display for Duplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Duplex::Full => write!(f, "full"),
            Duplex::Master => write!(f, "master"),
            Duplex::Slave => write!(f, "slave"),
        }
    }
}

/// Frame error detection scheme. Must match the remote station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDetect {
    /// CRC-16, polynomial 0xA001, LSB first, two checksum bytes.
    #[default]
    Crc,
    /// Block check character, one checksum byte.
    Bcc,
}

impl ErrorDetect {
    /// Number of checksum bytes trailing a frame.
    pub fn width(self) -> usize {
        match self {
            ErrorDetect::Crc => 2,
            ErrorDetect::Bcc => 1,
        }
    }
}

impl fmt::Display for ErrorDetect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetect::Crc => write!(f, "crc"),
            ErrorDetect::Bcc => write!(f, "bcc"),
        }
    }
}

/// Per-connection diagnostic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkCounters {
    /// Messages attempted to send.
    pub tx_attempts: u64,
    /// Messages successfully sent.
    pub tx_success: u64,
    /// Messages successfully received.
    pub msg_rx: u64,
    /// ACKs received.
    pub acks_in: u64,
    /// NAKs received.
    pub naks_in: u64,
    /// Timeouts awaiting a response.
    pub resp_timeouts: u64,
    /// ENQs sent.
    pub enqs_out: u64,
    /// Messages that could not be sent.
    pub tx_fail: u64,
    /// ACKs sent.
    pub acks_out: u64,
    /// NAKs sent.
    pub naks_out: u64,
    /// ENQs received.
    pub enqs_in: u64,
    /// Messages too small.
    pub runts: u64,
    /// Received bad checksums.
    pub bad_cs: u64,
    /// Destination node not found.
    pub unknown_dst: u64,
    /// Spurious bytes received.
    pub bytes_ignored: u64,
    /// Duplicate messages received.
    pub dups: u64,
    /// Receiver overflows.
    pub rx_overflow: u64,
}

/// Per-client diagnostic counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientCounters {
    /// Message transmission attempts.
    pub tx_attempts: u64,
    /// Messages successfully transmitted.
    pub tx_success: u64,
    /// Messages failed to transmit.
    pub tx_fail: u64,
    /// Messages rejected because the client's outbound queue was full.
    pub sink_full: u64,
    /// Messages received destined for the client.
    pub msg_rx: u64,
    /// Messages received but rejected by the client.
    pub msg_reject: u64,
    /// Messages received and accepted by the client.
    pub msg_accept: u64,
    /// Timed out awaiting a response from the client.
    pub rx_timeouts: u64,
}
