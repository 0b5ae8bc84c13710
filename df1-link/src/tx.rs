//! DF1 message transmitter.
//!
//! Frames one client message at a time (`DLE STX`, stuffed payload,
//! `DLE ETX`, checksum), hands it to the line output, and runs the
//! ACK/NAK/ENQ retry protocol. Exactly one message is in flight per
//! connection; the client registry feeds the next one only once the
//! transmitter returns to idle.

use crate::buffer::BoundedBuf;
use crate::checksum::{bcc, crc16_update};
use crate::client::ClientId;
use crate::types::{sym, ErrorDetect, TICK_MS};

const TX_BUF_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    /// Frame staged in the line output, awaiting write completion.
    PendWrite,
    /// Frame written to the line, awaiting ACK/NAK.
    PendResp,
}

/// What a transmitter timeout tick asks the connection to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTimeout {
    /// Solicit the remote's last response with a `DLE ENQ`.
    SolicitEnq,
    /// ENQ allowance exhausted; the transmission has failed.
    Fail,
}

/// Disposition of an incoming NAK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxNak {
    Retransmit,
    Fail,
    /// No transmission awaiting a response.
    Unexpected,
}

/// Build a complete DF1 frame for an application payload.
pub fn build_frame(payload: &[u8], scheme: ErrorDetect) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(sym::DLE);
    frame.push(sym::STX);
    let mut crc: u16 = 0;
    for &byte in payload {
        frame.push(byte);
        if scheme == ErrorDetect::Crc {
            crc = crc16_update(crc, byte);
        }
        // A DLE in the payload goes out doubled.
        if byte == sym::DLE {
            frame.push(sym::DLE);
        }
    }
    frame.push(sym::DLE);
    frame.push(sym::ETX);
    match scheme {
        ErrorDetect::Crc => {
            crc = crc16_update(crc, sym::ETX);
            frame.extend_from_slice(&crc.to_le_bytes());
        }
        ErrorDetect::Bcc => frame.push(bcc(payload)),
    }
    frame
}

#[derive(Debug)]
pub struct Transmitter {
    state: TxState,
    msg: BoundedBuf,
    scheme: ErrorDetect,
    max_nak: u32,
    max_enq: u32,
    nak_cnt: u32,
    enq_cnt: u32,
    eticks: u32,
    tticks: u32,
    owner: Option<ClientId>,
}

impl Transmitter {
    pub fn new(scheme: ErrorDetect, max_nak: u8, max_enq: u8, ack_timeout_ms: u64) -> Self {
        Self {
            state: TxState::Idle,
            msg: BoundedBuf::new(TX_BUF_SIZE),
            scheme,
            max_nak: max_nak as u32,
            max_enq: max_enq as u32,
            nak_cnt: 0,
            enq_cnt: 0,
            eticks: 0,
            tticks: (ack_timeout_ms / TICK_MS).max(1) as u32,
            owner: None,
        }
    }

    pub fn busy(&self) -> bool {
        self.state != TxState::Idle
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    /// Forget the originating client; used when it disconnects while its
    /// message is still in flight.
    pub fn clear_owner(&mut self) {
        self.owner = None;
    }

    /// Frame a payload for transmission on behalf of a client. Returns
    /// false if the framed message does not fit the transmit buffer, in
    /// which case nothing is staged.
    #[must_use]
    pub fn load(&mut self, owner: ClientId, payload: &[u8]) -> bool {
        let frame = build_frame(payload, self.scheme);
        self.msg.clear();
        if !self.msg.extend(&frame) {
            return false;
        }
        self.owner = Some(owner);
        true
    }

    /// Copy the staged frame into the line output. Used both for the
    /// initial attempt and for NAK-driven retransmissions.
    #[must_use]
    pub fn send(&mut self, line_out: &mut BoundedBuf) -> bool {
        self.state = TxState::PendWrite;
        line_out.extend(self.msg.as_slice())
    }

    /// Queue a `DLE ENQ`, re-entering the write-pending state.
    #[must_use]
    pub fn send_enq(&mut self, line_out: &mut BoundedBuf) -> bool {
        self.state = TxState::PendWrite;
        line_out.extend(&[sym::DLE, sym::ENQ])
    }

    /// The line layer finished writing the staged bytes.
    pub fn data_sent(&mut self) {
        if self.state == TxState::PendWrite {
            self.state = TxState::PendResp;
            self.eticks = 0;
        }
    }

    /// Advance the response timer one tick. `paused` suspends the timer
    /// while the receiver is mid-frame and embedded responses are in use.
    pub fn tick(&mut self, paused: bool) -> Option<TxTimeout> {
        if paused {
            return None;
        }
        if self.state != TxState::PendResp {
            return None;
        }
        self.eticks += 1;
        if self.eticks <= self.tticks {
            return None;
        }
        self.enq_cnt += 1;
        if self.enq_cnt > self.max_enq {
            Some(TxTimeout::Fail)
        } else {
            Some(TxTimeout::SolicitEnq)
        }
    }

    /// An ACK arrived. Returns true when a transmission was completed by
    /// it; false when no response was awaited.
    pub fn on_ack(&mut self) -> bool {
        if self.state == TxState::PendResp {
            self.flush();
            true
        } else {
            false
        }
    }

    /// A NAK arrived.
    pub fn on_nak(&mut self) -> TxNak {
        if self.state != TxState::PendResp {
            return TxNak::Unexpected;
        }
        self.nak_cnt += 1;
        if self.nak_cnt >= self.max_nak {
            TxNak::Fail
        } else {
            TxNak::Retransmit
        }
    }

    pub fn max_nak(&self) -> u32 {
        self.max_nak
    }

    pub fn max_enq(&self) -> u32 {
        self.max_enq
    }

    /// Discard the current message and reset the retry counters.
    pub fn flush(&mut self) {
        self.nak_cnt = 0;
        self.enq_cnt = 0;
        self.msg.clear();
        self.state = TxState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_echo_command_with_bcc() {
        // Echo(dnode=1) from src 2, tns 0x1234, data AA 55 01.
        let payload = [
            0x01, 0x02, 0x06, 0x00, 0x34, 0x12, 0x00, 0xaa, 0x55, 0x01,
        ];
        let frame = build_frame(&payload, ErrorDetect::Bcc);
        let expected = [
            0x10, 0x02, 0x01, 0x02, 0x06, 0x00, 0x34, 0x12, 0x00, 0xaa, 0x55, 0x01, 0x10, 0x03,
            0xef,
        ];
        assert_eq!(frame, expected);
    }

    #[test]
    fn stuffs_payload_dle() {
        let frame = build_frame(&[0x10, 0x20], ErrorDetect::Bcc);
        assert_eq!(
            frame,
            [0x10, 0x02, 0x10, 0x10, 0x20, 0x10, 0x03, bcc(&[0x10, 0x20])]
        );
    }

    #[test]
    fn crc_frame_covers_etx() {
        let payload = [0x01, 0x02, 0x06, 0x00, 0x34, 0x12];
        let frame = build_frame(&payload, ErrorDetect::Crc);
        let mut covered = payload.to_vec();
        covered.push(sym::ETX);
        let crc = crate::checksum::crc16(&covered);
        assert_eq!(&frame[frame.len() - 2..], &crc.to_le_bytes());
    }

    #[test]
    fn nak_retry_until_limit() {
        let mut tx = Transmitter::new(ErrorDetect::Bcc, 3, 3, 1000);
        let mut out = BoundedBuf::new(64);
        assert!(tx.load(1, &[0x01, 0x02, 0x06, 0x00, 0x34, 0x12]));
        assert!(tx.send(&mut out));
        tx.data_sent();
        assert_eq!(tx.on_nak(), TxNak::Retransmit);
        assert!(tx.send(&mut out));
        tx.data_sent();
        assert_eq!(tx.on_nak(), TxNak::Retransmit);
        assert!(tx.send(&mut out));
        tx.data_sent();
        assert_eq!(tx.on_nak(), TxNak::Fail);
    }

    #[test]
    fn timeout_solicits_enq_then_fails() {
        let mut tx = Transmitter::new(ErrorDetect::Bcc, 3, 2, 50);
        let mut out = BoundedBuf::new(64);
        assert!(tx.load(1, &[0x01, 0x02, 0x06, 0x00, 0x34, 0x12]));
        assert!(tx.send(&mut out));
        tx.data_sent();
        out.clear();

        let mut timeouts = Vec::new();
        for _ in 0..3 {
            loop {
                if let Some(t) = tx.tick(false) {
                    timeouts.push(t);
                    if t == TxTimeout::SolicitEnq {
                        assert!(tx.send_enq(&mut out));
                        assert_eq!(out.as_slice(), &[sym::DLE, sym::ENQ]);
                        out.clear();
                        tx.data_sent();
                    }
                    break;
                }
            }
        }
        assert_eq!(
            timeouts,
            [TxTimeout::SolicitEnq, TxTimeout::SolicitEnq, TxTimeout::Fail]
        );
    }

    #[test]
    fn paused_tick_does_not_advance() {
        let mut tx = Transmitter::new(ErrorDetect::Bcc, 3, 3, 20);
        let mut out = BoundedBuf::new(64);
        assert!(tx.load(1, &[0x01, 0x02, 0x06, 0x00, 0x34, 0x12]));
        assert!(tx.send(&mut out));
        tx.data_sent();
        for _ in 0..100 {
            assert_eq!(tx.tick(true), None);
        }
        assert!(tx.busy());
    }

    #[test]
    fn ack_completes_and_resets() {
        let mut tx = Transmitter::new(ErrorDetect::Bcc, 3, 3, 1000);
        let mut out = BoundedBuf::new(64);
        assert!(tx.load(7, &[0x01, 0x02, 0x06, 0x00, 0x34, 0x12]));
        assert!(tx.send(&mut out));
        tx.data_sent();
        assert!(tx.on_ack());
        assert!(!tx.busy());
        // A stray ACK with nothing in flight is flagged.
        assert!(!tx.on_ack());
    }
}
