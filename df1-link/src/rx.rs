//! DF1 message receiver.
//!
//! Assembles the destuffed application byte stream into complete messages,
//! validates the trailing checksum, suppresses duplicates, and tracks the
//! ACK/NAK echo state used to answer ENQ solicitations. The connection
//! layer feeds it bytes between `DLE STX` and the end of the checksum and
//! performs the actual line writes.

use crate::buffer::BoundedBuf;
use crate::checksum::ChecksumAcc;
use crate::client::ClientId;
use crate::types::{sym, ErrorDetect, LinkCounters};
use bytes::Bytes;

const RX_BUF_SIZE: usize = 512;

/// Ticks allowed from the first application byte through the last
/// checksum byte before the frame is abandoned (~500 ms).
const RX_TIMEOUT_TICKS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    /// DLE STX received, collecting application bytes.
    App,
    /// DLE ETX received, awaiting the first checksum byte.
    Cs1,
    /// Awaiting the second checksum byte (CRC only).
    Cs2,
    /// Message delivered, awaiting the client's accept/reject.
    Pend,
}

/// An ACK or NAK observed by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Ack,
    Nak,
}

/// Outcome of feeding one byte to the receiver.
#[derive(Debug)]
pub enum RxStep {
    Consumed,
    /// `DLE ACK`/`DLE NAK` inside the application stream; belongs to the
    /// transmitter.
    Embedded(Response),
    /// End of frame reached.
    Complete(RxVerdict),
}

/// Disposition of a completed frame.
#[derive(Debug)]
pub enum RxVerdict {
    /// Frame larger than the receive buffer; answered with a NAK.
    Overflow,
    /// Payload shorter than a minimal message; answered with a NAK.
    Runt,
    BadChecksum,
    /// Retransmission of the previous message; answered with an ACK but
    /// not delivered.
    Duplicate,
    /// A valid, novel message. The receiver is now in `Pend` until a
    /// client accepts or rejects it.
    Deliver(Bytes),
}

#[derive(Debug)]
pub struct Receiver {
    state: RxState,
    app: BoundedBuf,
    scheme: ErrorDetect,
    acc: ChecksumAcc,
    /// Checksum received from the frame, widened to 16 bits.
    msg_cs: u16,
    /// Bytes at payload positions 1, 2, 4, 5 of the last valid message.
    dup: [u8; 4],
    dup_detect: bool,
    eticks: u32,
    tticks: u32,
    last_was_ack: bool,
    overflow: bool,
    prev_dle: bool,
    /// Client that received the pending message.
    owner: Option<ClientId>,
}

impl Receiver {
    pub fn new(scheme: ErrorDetect, dup_detect: bool) -> Self {
        Self {
            state: RxState::Idle,
            app: BoundedBuf::new(RX_BUF_SIZE),
            scheme,
            acc: ChecksumAcc::new(scheme),
            msg_cs: 0,
            dup: [0; 4],
            dup_detect,
            eticks: 0,
            tticks: RX_TIMEOUT_TICKS,
            last_was_ack: false,
            overflow: false,
            prev_dle: false,
            owner: None,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Whether a frame is currently being assembled.
    pub fn is_active(&self) -> bool {
        matches!(self.state, RxState::App | RxState::Cs1 | RxState::Cs2)
    }

    pub fn is_pending(&self) -> bool {
        self.state == RxState::Pend
    }

    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: Option<ClientId>) {
        self.owner = owner;
    }

    pub fn last_was_ack(&self) -> bool {
        self.last_was_ack
    }

    /// Force the ENQ echo state to NAK.
    pub fn set_nak(&mut self) {
        self.last_was_ack = false;
    }

    /// Record that an ACK or NAK went out for the current message and
    /// return the receiver to idle.
    pub fn responded(&mut self, ack: bool) {
        self.last_was_ack = ack;
        self.state = RxState::Idle;
        self.owner = None;
    }

    /// Begin a new frame after `DLE STX`.
    pub fn start_frame(&mut self) {
        self.app.clear();
        self.eticks = 0;
        self.prev_dle = false;
        self.overflow = false;
        self.acc = ChecksumAcc::new(self.scheme);
        self.state = RxState::App;
    }

    /// Feed one post-symbol-layer byte into the state machine.
    pub fn feed(&mut self, byte: u8, cnt: &mut LinkCounters) -> RxStep {
        match self.state {
            RxState::App => self.feed_app(byte, cnt),
            RxState::Cs1 => match self.scheme {
                ErrorDetect::Crc => {
                    self.msg_cs = byte as u16;
                    self.state = RxState::Cs2;
                    RxStep::Consumed
                }
                ErrorDetect::Bcc => {
                    self.msg_cs = byte as u16;
                    RxStep::Complete(self.accept(cnt))
                }
            },
            RxState::Cs2 => {
                self.msg_cs |= (byte as u16) << 8;
                RxStep::Complete(self.accept(cnt))
            }
            // The connection only feeds bytes while a frame is active.
            RxState::Idle | RxState::Pend => RxStep::Consumed,
        }
    }

    /// Advance the frame-completion timer one tick. Returns true when the
    /// allowance is exhausted and the partial frame has been abandoned.
    pub fn tick(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.eticks += 1;
        if self.eticks > self.tticks {
            self.state = RxState::Idle;
            self.last_was_ack = false;
            true
        } else {
            false
        }
    }

    fn feed_app(&mut self, byte: u8, cnt: &mut LinkCounters) -> RxStep {
        match byte {
            sym::ETX if self.prev_dle => {
                // The ETX is covered by the CRC but not by the BCC.
                if self.scheme == ErrorDetect::Crc {
                    self.acc.add(sym::ETX);
                }
                self.state = RxState::Cs1;
                return RxStep::Consumed;
            }
            sym::DLE if !self.prev_dle => {
                self.prev_dle = true;
                return RxStep::Consumed;
            }
            sym::ACK if self.prev_dle => {
                self.prev_dle = false;
                return RxStep::Embedded(Response::Ack);
            }
            sym::NAK if self.prev_dle => {
                self.prev_dle = false;
                return RxStep::Embedded(Response::Nak);
            }
            _ if self.prev_dle && byte != sym::DLE => {
                // Anything else after a DLE is not allowed.
                self.last_was_ack = false;
                return RxStep::Consumed;
            }
            _ => {}
        }
        self.prev_dle = false;
        if !self.overflow && !self.app.push(byte) {
            self.overflow = true;
            cnt.rx_overflow += 1;
        }
        self.acc.add(byte);
        RxStep::Consumed
    }

    fn accept(&mut self, cnt: &mut LinkCounters) -> RxVerdict {
        if self.overflow {
            return RxVerdict::Overflow;
        }
        if self.app.len() < 6 {
            cnt.runts += 1;
            return RxVerdict::Runt;
        }
        if self.acc.value() != self.msg_cs {
            cnt.bad_cs += 1;
            return RxVerdict::BadChecksum;
        }
        if self.dup_detect {
            let d = self.app.as_slice();
            let quad = [d[1], d[2], d[4], d[5]];
            let duplicate = quad == self.dup;
            self.dup = quad;
            if duplicate {
                cnt.dups += 1;
                return RxVerdict::Duplicate;
            }
        }
        cnt.msg_rx += 1;
        self.state = RxState::Pend;
        RxVerdict::Deliver(self.app.take())
    }
}
