//! Message slots and transaction correlation.
//!
//! A session owns a fixed pool of message slots. Each outstanding
//! command occupies one slot from initiation until its reply arrives,
//! it times out, or the link reports a delivery failure. Slot state is a
//! bit set: a command is complete once it has been transmitted,
//! acknowledged by the link layer, and its reply received, in any
//! arrival order.

use crate::error::PcccResult;
use crate::types::{FileType, ReplyValue};
use bytes::BytesMut;
use std::time::Instant;

/// Size of one slot's message buffer.
pub(crate) const SLOT_BUF_SIZE: usize = 300;

/// Slot state bits.
pub(crate) mod state {
    pub const UNUSED: u8 = 0;
    /// Pending transmission to the link layer.
    pub const PEND: u8 = 1;
    /// Transmitted, pending acknowledgement from the link layer.
    pub const TX: u8 = 2;
    /// Acknowledged by the link layer.
    pub const ACK_RCVD: u8 = 4;
    /// Reply received from the remote node.
    pub const REPLY_RCVD: u8 = 8;
    pub const CMD_DONE: u8 = TX | ACK_RCVD | REPLY_RCVD;
}

/// Completion callback for a command issued in non-blocking mode.
pub type Notify = Box<dyn FnOnce(PcccResult<ReplyValue>) + Send>;

/// Reply decoder attached to a command slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ReplyDecoder {
    /// The reply carries no data beyond its status.
    #[default]
    None,
    /// Compare the echoed bytes against the sent payload.
    Echo,
    /// Decode `elements` items of the declared file type.
    TypedRead,
    SlcFileInfo,
    LinkParam,
}

pub(crate) struct MsgSlot {
    pub state: u8,
    pub is_cmd: bool,
    /// Message bytes as sent over the service framing.
    pub buf: BytesMut,
    pub tns: u16,
    pub decoder: ReplyDecoder,
    pub file_type: Option<FileType>,
    /// Elements expected in a typed reply.
    pub elements: usize,
    /// Data bytes sent (echo) or expected in the reply (typed read).
    pub bytes: usize,
    /// Reply deadline, armed once the link layer acknowledges.
    pub expires: Option<Instant>,
    pub notify: Option<Notify>,
    /// Decoded outcome held until the link acknowledgement completes
    /// the command.
    pub result: Option<PcccResult<ReplyValue>>,
}

impl MsgSlot {
    fn new() -> Self {
        Self {
            state: state::UNUSED,
            is_cmd: false,
            buf: BytesMut::with_capacity(SLOT_BUF_SIZE),
            tns: 0,
            decoder: ReplyDecoder::None,
            file_type: None,
            elements: 0,
            bytes: 0,
            expires: None,
            notify: None,
            result: None,
        }
    }

    /// Clear the slot and mark it unused.
    pub fn flush(&mut self) {
        self.state = state::UNUSED;
        self.expires = None;
        self.buf.clear();
    }
}

pub(crate) struct MsgPool {
    pub slots: Vec<MsgSlot>,
    /// Index of the message currently being transmitted.
    pub cur: usize,
}

impl MsgPool {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| MsgSlot::new()).collect(),
            cur: 0,
        }
    }

    /// Claim the first unused slot.
    pub fn get_free(&mut self) -> Option<usize> {
        let i = self
            .slots
            .iter()
            .position(|s| s.state == state::UNUSED)?;
        let slot = &mut self.slots[i];
        slot.state = state::PEND;
        slot.is_cmd = false;
        slot.decoder = ReplyDecoder::None;
        slot.file_type = None;
        slot.elements = 0;
        slot.bytes = 0;
        slot.notify = None;
        slot.result = None;
        Some(i)
    }

    /// Find the outstanding command matching a reply's transaction
    /// number.
    pub fn find_cmd(&self, tns: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state != state::UNUSED && s.is_cmd && s.tns == tns)
    }

    /// Next slot awaiting transmission, scanning one full cycle starting
    /// after the cursor so a slot at the cursor position is still found.
    /// Returns None while a transmission is in flight.
    pub fn next_pending(&self) -> Option<usize> {
        if self.slots[self.cur].state == state::TX {
            return None;
        }
        let n = self.slots.len();
        (1..=n)
            .map(|off| (self.cur + off) % n)
            .find(|&i| self.slots[i].state == state::PEND)
    }

    pub fn reset_cursor(&mut self) {
        self.cur = 0;
    }
}

/// Source node address of a framed message.
pub(crate) fn src(m: &[u8]) -> u8 {
    m[1]
}

/// Command opcode with the reply and priority bits cleared.
pub(crate) fn cmd(m: &[u8]) -> u8 {
    m[2] & !0x60
}

/// Replies have bit six set in their CMD byte.
pub(crate) fn is_reply(m: &[u8]) -> bool {
    m[2] & 0x40 != 0
}

pub(crate) fn sts(m: &[u8]) -> u8 {
    m[3]
}

pub(crate) fn tns(m: &[u8]) -> u16 {
    u16::from_le_bytes([m[4], m[5]])
}

pub(crate) fn ext_sts(m: &[u8]) -> Option<u8> {
    m.get(6).copied()
}

/// Owner node reported with certain extended status values.
pub(crate) fn owner_node(m: &[u8]) -> Option<u8> {
    if m.len() < 6 {
        None
    } else {
        Some(m[5])
    }
}

/// Data section of a reply, after the six byte header.
pub(crate) fn data(m: &[u8]) -> &[u8] {
    &m[6..]
}
