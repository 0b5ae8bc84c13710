//! Connection to a DF1 link layer service.
//!
//! A session registers a source node address with the service and
//! multiplexes PCCC commands over the TCP connection. Commands run in
//! one of two modes: with a completion callback the initiating call
//! returns immediately and the application drives `read`/`write`/`tick`
//! from its own loop; without one the call transmits, then blocks with
//! the session timeout until the reply arrives.

use crate::error::{PcccError, PcccResult};
use crate::msg::{self, state, MsgPool, MsgSlot, Notify, ReplyDecoder, SLOT_BUF_SIZE};
use crate::sts;
use crate::types::{FileType, ReplyValue, SlcFileInfo, NAME_LEN};
use crate::{data, wire};
use bytes::{Buf, BufMut, BytesMut};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Socket buffer bound, matching the slot buffer size.
const SOCK_BUF_SIZE: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Idle,
    MsgLen,
    Msg,
}

pub struct Session {
    stream: Option<TcpStream>,
    src_addr: u8,
    timeout: Duration,
    tns: u16,
    sock_in: BytesMut,
    sock_out: BytesMut,
    msg_in: BytesMut,
    msg_in_len: usize,
    read_mode: ReadMode,
    pool: MsgPool,
    connected: bool,
}

impl Session {
    /// Create a session with `slots` outstanding message buffers and a
    /// reply timeout in seconds. The initial transaction number is
    /// randomised per process and never zero.
    pub fn new(src_addr: u8, timeout_secs: u64, slots: usize) -> PcccResult<Self> {
        if timeout_secs == 0 {
            return Err(PcccError::InvalidParameter(
                "timeout must be non-zero".into(),
            ));
        }
        if slots == 0 {
            return Err(PcccError::InvalidParameter(
                "message slot count must be non-zero".into(),
            ));
        }
        let mut tns = rand::random::<u16>() ^ (std::process::id() as u16);
        if tns == 0 {
            tns = 42;
        }
        Ok(Self {
            stream: None,
            src_addr,
            timeout: Duration::from_secs(timeout_secs),
            tns,
            sock_in: BytesMut::with_capacity(SOCK_BUF_SIZE),
            sock_out: BytesMut::with_capacity(SOCK_BUF_SIZE),
            msg_in: BytesMut::with_capacity(SOCK_BUF_SIZE),
            msg_in_len: 0,
            read_mode: ReadMode::Idle,
            pool: MsgPool::new(slots),
            connected: false,
        })
    }

    pub fn src_addr(&self) -> u8 {
        self.src_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connect to the service and register the source node address under
    /// `name`. Registration failures surface on the next read or write;
    /// the service simply closes a rejected connection.
    pub async fn connect(&mut self, host: &str, port: u16, name: &str) -> PcccResult<()> {
        if self.connected {
            return Err(PcccError::Link("already connected".into()));
        }
        if name.is_empty() {
            return Err(PcccError::InvalidParameter(
                "client name cannot be empty".into(),
            ));
        }
        if name.len() > NAME_LEN {
            return Err(PcccError::InvalidParameter(format!(
                "client name too long, {} characters max",
                NAME_LEN
            )));
        }
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| PcccError::Link(format!("failed to connect: {}", e)))?;
        self.stream = Some(stream);
        self.connected = true;
        self.sock_out.put_u8(self.src_addr);
        self.sock_out.put_u8(name.len() as u8);
        self.sock_out.put_slice(name.as_bytes());
        self.write().await.map_err(|e| {
            PcccError::Link(format!("failed to send registration message: {}", e))
        })
    }

    /// Read from the service connection and process whatever completes:
    /// link acknowledgements, delivery failures and reply messages, with
    /// their callbacks.
    pub async fn read(&mut self) -> PcccResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(PcccError::NoConnection);
        };
        match stream.read_buf(&mut self.sock_in).await {
            Err(e) => {
                let err = PcccError::Link(format!("error reading: {}", e));
                self.fail_link(&err);
                Err(err)
            }
            Ok(0) => {
                let err = PcccError::Link("remote end closed connection".into());
                self.fail_link(&err);
                Err(err)
            }
            Ok(_) => {
                self.parse_link();
                Ok(())
            }
        }
    }

    /// Whether data is queued for transmission to the service.
    pub fn write_ready(&self) -> bool {
        !self.sock_out.is_empty()
    }

    /// Flush queued data to the service connection.
    pub async fn write(&mut self) -> PcccResult<()> {
        if !self.connected {
            return Err(PcccError::NoConnection);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(PcccError::NoConnection);
        };
        if self.sock_out.is_empty() {
            return Ok(());
        }
        let out = self.sock_out.split();
        match stream.write_all(&out).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = PcccError::Link(format!("error writing: {}", e));
                self.fail_link(&err);
                Err(err)
            }
        }
    }

    /// Expire outstanding commands. Call at least once per second when
    /// using completion callbacks.
    pub fn tick(&mut self) {
        if !self.connected {
            return;
        }
        let now = Instant::now();
        for slot in &mut self.pool.slots {
            if slot.is_cmd && slot.expires.is_some_and(|deadline| now >= deadline) {
                let notify = slot.notify.take();
                slot.flush();
                if let Some(notify) = notify {
                    notify(Err(PcccError::Timeout));
                }
            }
        }
    }

    /// Close the connection. Outstanding commands complete with a link
    /// error.
    pub async fn close(&mut self) -> PcccResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.abort_all(&PcccError::Link("connection closed".into()));
        self.sock_in.clear();
        self.sock_out.clear();
        self.msg_in.clear();
        self.read_mode = ReadMode::Idle;
        self.pool.reset_cursor();
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn fail_link(&mut self, err: &PcccError) {
        self.connected = false;
        self.stream = None;
        self.abort_all(err);
    }

    fn abort_all(&mut self, err: &PcccError) {
        for slot in &mut self.pool.slots {
            if slot.state != state::UNUSED {
                let notify = slot.notify.take();
                slot.flush();
                if let Some(notify) = notify {
                    notify(Err(err.clone()));
                }
            }
        }
    }

    fn parse_link(&mut self) {
        while self.sock_in.has_remaining() {
            let byte = self.sock_in.get_u8();
            match self.read_mode {
                ReadMode::Idle => match byte {
                    wire::SOH => {
                        self.msg_in.clear();
                        self.read_mode = ReadMode::MsgLen;
                    }
                    wire::ACK => self.rcv_link_ack(),
                    wire::NAK => self.rcv_link_nak(),
                    _ => {}
                },
                ReadMode::MsgLen => {
                    self.msg_in_len = byte as usize;
                    self.read_mode = ReadMode::Msg;
                }
                ReadMode::Msg => {
                    self.msg_in.put_u8(byte);
                    if self.msg_in.len() == self.msg_in_len {
                        self.read_mode = ReadMode::Idle;
                        self.parse_msg();
                    }
                }
            }
        }
    }

    /// A complete message arrived from the link layer.
    fn parse_msg(&mut self) {
        if self.msg_in.len() < 6 {
            warn!(len = self.msg_in.len(), "runt message from link service dropped");
            return;
        }
        if !msg::is_reply(&self.msg_in) {
            // Unsolicited commands are not serviced; acknowledge so the
            // remote transmitter does not stall, and drop.
            warn!("unsolicited command message acknowledged and dropped");
            self.sock_out.put_u8(wire::ACK);
            return;
        }
        self.sock_out.put_u8(wire::ACK);
        let tns = msg::tns(&self.msg_in);
        let Some(i) = self.pool.find_cmd(tns) else {
            debug!(tns, "reply with no outstanding command dropped");
            return;
        };
        self.pool.slots[i].state |= state::REPLY_RCVD;
        if self.pool.slots[i].notify.is_some() {
            let result = self.decode_reply(i);
            let slot = &mut self.pool.slots[i];
            slot.result = Some(result);
            if slot.state == state::CMD_DONE {
                let notify = slot.notify.take();
                let result = slot.result.take().expect("result stored above");
                slot.flush();
                if let Some(notify) = notify {
                    notify(result);
                }
            }
        }
    }

    /// The link layer acknowledged delivery of the current message.
    fn rcv_link_ack(&mut self) {
        let timeout = self.timeout;
        let i = self.pool.cur;
        let slot = &mut self.pool.slots[i];
        slot.state |= state::ACK_RCVD;
        if slot.is_cmd {
            // In callback mode the reply deadline starts at delivery.
            if slot.notify.is_some() {
                slot.expires = Some(Instant::now() + timeout + Duration::from_secs(1));
            }
            // The reply may already have arrived ahead of this ACK.
            if slot.state == state::CMD_DONE {
                let notify = slot.notify.take();
                let result = slot.result.take().unwrap_or(Ok(ReplyValue::None));
                slot.flush();
                if let Some(notify) = notify {
                    notify(result);
                }
            }
        } else {
            slot.flush();
        }
        self.send_next();
    }

    /// The link layer could not deliver the current message.
    fn rcv_link_nak(&mut self) {
        let i = self.pool.cur;
        let slot = &mut self.pool.slots[i];
        let was_cmd = slot.is_cmd;
        let notify = slot.notify.take();
        slot.flush();
        if was_cmd {
            if let Some(notify) = notify {
                notify(Err(PcccError::NoDeliver));
            }
        }
        self.send_next();
    }

    /// Queue slot `i` onto the service connection, framed with SOH and
    /// its length.
    pub(crate) fn queue_send(&mut self, i: usize) -> PcccResult<()> {
        let slot = &mut self.pool.slots[i];
        if self.sock_out.len() + 2 + slot.buf.len() > SOCK_BUF_SIZE {
            return Err(PcccError::BufferOverflow("message send".into()));
        }
        self.sock_out.put_u8(wire::SOH);
        self.sock_out.put_u8(slot.buf.len() as u8);
        self.sock_out.extend_from_slice(&slot.buf);
        slot.state = state::TX;
        self.pool.cur = i;
        Ok(())
    }

    /// Queue the next pending message, if any and if none is in flight.
    fn send_next(&mut self) {
        if let Some(i) = self.pool.next_pending() {
            if let Err(e) = self.queue_send(i) {
                // Leave the slot pending; a later acknowledgement will
                // retry once the socket buffer drains.
                warn!(error = %e, "deferring next message");
            }
        }
    }

    /// Initialize a command slot with the common header, returning its
    /// index.
    pub(crate) fn cmd_init(
        &mut self,
        notify: Option<Notify>,
        decoder: ReplyDecoder,
        dnode: u8,
        cmd: u8,
        func: u8,
    ) -> PcccResult<usize> {
        if !self.connected {
            return Err(PcccError::NoConnection);
        }
        let i = self.pool.get_free().ok_or(PcccError::NoBuffer)?;
        let tns = self.tns;
        self.tns = self.tns.wrapping_add(1);
        let slot = &mut self.pool.slots[i];
        slot.is_cmd = true;
        slot.notify = notify;
        slot.decoder = decoder;
        slot.tns = tns;
        slot.buf.put_u8(dnode);
        slot.buf.put_u8(self.src_addr);
        slot.buf.put_u8(cmd);
        slot.buf.put_u8(0); // STS placeholder
        slot.buf.put_u16_le(tns);
        // A handful of commands carry no FNC byte.
        match cmd {
            0x00 | 0x01 | 0x02 | 0x04 | 0x05 | 0x08 => {}
            _ => slot.buf.put_u8(func),
        }
        Ok(i)
    }

    /// Fail a partially built command, releasing its slot.
    pub(crate) fn fail_slot(&mut self, i: usize, err: PcccError) -> PcccError {
        self.pool.slots[i].flush();
        err
    }

    /// Check that a slot's assembled message still fits its buffer.
    pub(crate) fn check_slot_capacity(&mut self, i: usize, ctx: &str) -> PcccResult<()> {
        if self.pool.slots[i].buf.len() > SLOT_BUF_SIZE {
            Err(self.fail_slot(i, PcccError::BufferOverflow(ctx.into())))
        } else {
            Ok(())
        }
    }

    pub(crate) fn slot_mut(&mut self, i: usize) -> &mut MsgSlot {
        &mut self.pool.slots[i]
    }

    /// Transmit an assembled command. With a callback the message is
    /// queued (or waits for the transmit cursor) and the call returns
    /// None; without one the call blocks until the outcome is known and
    /// returns the decoded reply.
    pub(crate) async fn cmd_send(&mut self, i: usize) -> PcccResult<Option<ReplyValue>> {
        if self.pool.slots[i].notify.is_none() {
            return self.send_one_at_a_time(i).await.map(Some);
        }
        self.send_next();
        Ok(None)
    }

    async fn send_one_at_a_time(&mut self, i: usize) -> PcccResult<ReplyValue> {
        self.queue_send(i)?;
        self.write().await?;
        let mut ack_sent = false;
        loop {
            self.read_bounded(i).await?;
            // A link layer NAK released the slot: delivery failed.
            if self.pool.slots[i].state == state::UNUSED {
                return Err(PcccError::NoDeliver);
            }
            // Acknowledge the reply; the ACK byte is already queued.
            if self.pool.slots[i].state & state::REPLY_RCVD != 0 && !ack_sent {
                ack_sent = true;
                self.write().await?;
                break;
            }
            if self.pool.slots[i].state == state::CMD_DONE {
                break;
            }
        }
        let result = self.decode_reply(i);
        self.pool.slots[i].flush();
        result
    }

    /// One read from the service, bounded by the session timeout once
    /// the command has been acknowledged and no partial message is
    /// buffered.
    async fn read_bounded(&mut self, i: usize) -> PcccResult<()> {
        let armed = self.pool.slots[i].state & state::ACK_RCVD != 0
            && self.read_mode == ReadMode::Idle;
        if !armed {
            return self.read().await;
        }
        match tokio::time::timeout(self.timeout, self.read()).await {
            Ok(result) => result,
            Err(_) => {
                self.pool.slots[i].flush();
                Err(PcccError::Timeout)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_connected(&mut self) {
        self.connected = true;
    }

    #[cfg(test)]
    pub(crate) fn set_tns(&mut self, tns: u16) {
        self.tns = tns;
    }

    #[cfg(test)]
    pub(crate) fn slot_bytes(&self, i: usize) -> &[u8] {
        &self.pool.slots[i].buf
    }

    /// Check the STS and run the slot's reply decoder over the buffered
    /// message.
    fn decode_reply(&self, i: usize) -> PcccResult<ReplyValue> {
        let m = &self.msg_in[..];
        if let Some(diagnosis) = sts::sts_check(m) {
            return Err(PcccError::Reply(diagnosis));
        }
        let slot = &self.pool.slots[i];
        let reply_data = msg::data(m);
        match slot.decoder {
            ReplyDecoder::None => Ok(ReplyValue::None),
            ReplyDecoder::Echo => {
                if reply_data.len() != slot.bytes {
                    return Err(PcccError::Reply(
                        "number of received bytes doesn't match number of bytes sent".into(),
                    ));
                }
                // The sent payload follows the six byte header plus FNC.
                if reply_data != &slot.buf[7..] {
                    return Err(PcccError::Reply("received data mismatch".into()));
                }
                Ok(ReplyValue::None)
            }
            ReplyDecoder::TypedRead => {
                if reply_data.len() != slot.bytes {
                    return Err(PcccError::Reply(
                        "received unexpected amount of data".into(),
                    ));
                }
                let file_type = slot.file_type.expect("typed read slots carry a file type");
                data::decode_array(reply_data, file_type, slot.elements).map(ReplyValue::Data)
            }
            ReplyDecoder::SlcFileInfo => {
                if reply_data.len() != 8 {
                    return Err(PcccError::Reply(
                        "received unexpected amount of data".into(),
                    ));
                }
                let bytes =
                    u32::from_le_bytes([reply_data[0], reply_data[1], reply_data[2], reply_data[3]]);
                let elements = u16::from_le_bytes([reply_data[4], reply_data[5]]);
                // reply_data[6] is reserved.
                let file_type = FileType::from_wire(reply_data[7]).ok_or_else(|| {
                    PcccError::Reply(format!(
                        "received unknown file type - 0x{:x}",
                        reply_data[7]
                    ))
                })?;
                Ok(ReplyValue::FileInfo(SlcFileInfo {
                    bytes,
                    elements,
                    file_type,
                }))
            }
            ReplyDecoder::LinkParam => {
                if reply_data.len() != 1 {
                    return Err(PcccError::Reply(
                        "received unexpected amount of data".into(),
                    ));
                }
                Ok(ReplyValue::LinkParam(reply_data[0]))
            }
        }
    }
}
