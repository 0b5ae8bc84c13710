//! A DF1 connection: one serial line, its receiver and transmitter, and
//! the clients multiplexed onto it.
//!
//! The connection state is owned exclusively by one task running
//! [`run_connection`]. Client sockets are serviced by small reader/writer
//! tasks that exchange bytes with the owning task over channels, so no
//! state is shared and no locks are taken.

use crate::buffer::BoundedBuf;
use crate::client::{Client, ClientId, ClientRegistry, ClientState, CLIENT_OUT_QUEUE};
use crate::config::ConnectionConfig;
use crate::rx::{Receiver, Response, RxStep, RxVerdict};
use crate::tx::{Transmitter, TxNak, TxState, TxTimeout};
use crate::types::{msg, sym, Duplex, ErrorDetect, LinkCounters, CLIENT_NAME_LEN, TICK_MS};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const LINE_OUT_SIZE: usize = 512;
const EVENT_QUEUE: usize = 64;

/// Events from client socket reader tasks to the connection task.
#[derive(Debug)]
pub enum ClientEvent {
    Data(ClientId, Bytes),
    Closed(ClientId),
}

enum ByteAction {
    Nothing,
    Violation,
    Register,
    RcvAck,
    RcvNak,
    MsgComplete,
}

#[derive(Debug)]
pub struct Conn {
    name: String,
    duplex: Duplex,
    scheme: ErrorDetect,
    /// Bytes queued for the serial line.
    line_out: BoundedBuf,
    /// Previous link layer byte was a DLE.
    read_sym: bool,
    /// Embedded responses have been observed on this line.
    embed_rsp: bool,
    rx: Receiver,
    tx: Transmitter,
    registry: ClientRegistry,
    counters: LinkCounters,
}

impl Conn {
    pub fn new(cfg: &ConnectionConfig) -> Self {
        info!("[{}] Initializing connection.", cfg.name);
        Self {
            name: cfg.name.clone(),
            duplex: cfg.duplex,
            scheme: cfg.error_detect,
            line_out: BoundedBuf::new(LINE_OUT_SIZE),
            read_sym: false,
            embed_rsp: false,
            rx: Receiver::new(cfg.error_detect, cfg.duplicate_detect),
            tx: Transmitter::new(cfg.error_detect, cfg.max_nak, cfg.max_enq, cfg.ack_timeout),
            registry: ClientRegistry::new(),
            counters: LinkCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse raw bytes from the line, dispatching link symbols and
    /// feeding application bytes to the receiver.
    fn parse_line_data(&mut self, input: &mut BytesMut) {
        use bytes::Buf;
        while !input.is_empty() {
            if self.rx.is_active() {
                self.rx_consume(input);
                continue;
            }
            let byte = input.get_u8();
            if self.read_sym {
                self.read_sym = false;
                match byte {
                    sym::STX => {
                        debug!("[{}] Received DLE STX.", self.name);
                        self.rx.start_frame();
                    }
                    sym::ENQ => {
                        self.counters.enqs_in += 1;
                        self.on_enq();
                    }
                    sym::ACK => {
                        self.counters.acks_in += 1;
                        debug!("[{}] Received DLE ACK.", self.name);
                        self.handle_tx_ack();
                    }
                    sym::NAK => {
                        self.counters.naks_in += 1;
                        debug!("[{}] Received DLE NAK.", self.name);
                        self.handle_tx_nak();
                    }
                    other => {
                        // Unknown symbol after a DLE; a DLE re-arms the escape.
                        debug!("[{}] Spurious byte received.", self.name);
                        self.counters.bytes_ignored += 1;
                        self.rx.set_nak();
                        if other == sym::DLE {
                            self.read_sym = true;
                        }
                    }
                }
                continue;
            }
            if byte == sym::DLE {
                self.read_sym = true;
            } else {
                // Any link data not prefixed with a DLE is ignored.
                debug!("[{}] Spurious byte received.", self.name);
                self.counters.bytes_ignored += 1;
                self.rx.set_nak();
            }
        }
    }

    fn rx_consume(&mut self, input: &mut BytesMut) {
        use bytes::Buf;
        while self.rx.is_active() && !input.is_empty() {
            let byte = input.get_u8();
            match self.rx.feed(byte, &mut self.counters) {
                RxStep::Consumed => {}
                RxStep::Embedded(rsp) => self.on_embedded(rsp),
                RxStep::Complete(verdict) => self.on_verdict(verdict),
            }
        }
    }

    fn on_embedded(&mut self, rsp: Response) {
        if !self.embed_rsp {
            self.embed_rsp = true;
            info!("[{}] Detected embedded responses.", self.name);
        }
        match rsp {
            Response::Ack => self.handle_tx_ack(),
            Response::Nak => self.handle_tx_nak(),
        }
    }

    fn on_verdict(&mut self, verdict: RxVerdict) {
        match verdict {
            RxVerdict::Overflow => {
                debug!("[{}] Oversized message received.", self.name);
                self.send_nak();
            }
            RxVerdict::Runt => {
                debug!("[{}] Received message is too small.", self.name);
                self.send_nak();
            }
            RxVerdict::BadChecksum => self.send_nak(),
            RxVerdict::Duplicate => {
                debug!("[{}] Received duplicate message.", self.name);
                self.send_ack();
            }
            RxVerdict::Deliver(payload) => self.route_inbound(payload),
        }
    }

    /// Deliver a received message to the client registered at the
    /// destination node address in its first byte.
    fn route_inbound(&mut self, payload: Bytes) {
        let dst = payload[0];
        let Some(id) = self.registry.find_addr(dst) else {
            error!(
                "[{}] Message received for unknown destination address - {}.",
                self.name, dst
            );
            self.counters.unknown_dst += 1;
            self.send_ack();
            return;
        };
        if payload.len() > u8::MAX as usize {
            warn!(
                "[{}] Received message too large for client framing ({} bytes).",
                self.name,
                payload.len()
            );
            self.send_nak();
            return;
        }
        let mut framed = BytesMut::with_capacity(payload.len() + 2);
        framed.put_u8(msg::SOH);
        framed.put_u8(payload.len() as u8);
        framed.extend_from_slice(&payload);
        let name = self.name.clone();
        let client = self.registry.get_mut(id).expect("client just resolved");
        debug!("[{}.{}] Sending received message to client.", name, client.name);
        match client.out.try_send(framed.freeze()) {
            Ok(()) => {
                client.counters.msg_rx += 1;
                self.rx.set_owner(Some(id));
            }
            Err(_) => {
                error!(
                    "[{}.{}] Received message dropped because client's outbound queue is full.",
                    name, client.name
                );
                client.counters.sink_full += 1;
                self.send_nak();
            }
        }
    }

    fn send_ack(&mut self) {
        debug!("[{}] Sending DLE ACK.", self.name);
        if !self.line_out.extend(&[sym::DLE, sym::ACK]) {
            error!(
                "[{}] Failed to send ACK due to line buffer full.",
                self.name
            );
        }
        self.rx.responded(true);
        self.counters.acks_out += 1;
    }

    fn send_nak(&mut self) {
        debug!("[{}] Sending DLE NAK.", self.name);
        if !self.line_out.extend(&[sym::DLE, sym::NAK]) {
            error!(
                "[{}] Failed to send NAK due to line buffer full.",
                self.name
            );
        }
        self.rx.responded(false);
        self.counters.naks_out += 1;
    }

    fn on_enq(&mut self) {
        debug!("[{}] Received DLE ENQ.", self.name);
        if self.rx.is_pending() {
            // The remote gave up waiting while a client still holds the
            // message; acknowledge on its behalf.
            if let Some(id) = self.rx.owner() {
                if let Some(client) = self.registry.get_mut(id) {
                    error!(
                        "[{}.{}] Remote node transmitter timed out before client acknowledged a received message.",
                        self.name, client.name
                    );
                    client.counters.rx_timeouts += 1;
                }
            }
            self.send_ack();
            return;
        }
        if self.rx.last_was_ack() {
            self.send_ack();
        } else {
            self.send_nak();
        }
    }

    fn handle_tx_ack(&mut self) {
        if self.tx.on_ack() {
            self.counters.tx_success += 1;
            self.client_msg_tx_ok();
        } else {
            error!("[{}] Received unexpected ACK.", self.name);
            self.rx.set_nak();
            self.counters.bytes_ignored += 2;
        }
    }

    fn handle_tx_nak(&mut self) {
        match self.tx.on_nak() {
            TxNak::Retransmit => {
                if !self.tx.send(&mut self.line_out) {
                    error!(
                        "[{}] Message transmission failed because line output buffer full.",
                        self.name
                    );
                    self.tx.flush();
                    self.client_msg_tx_fail();
                }
            }
            TxNak::Fail => {
                error!(
                    "[{}] Message transmission failed after {} NAK(s) received.",
                    self.name,
                    self.tx.max_nak()
                );
                self.tx.flush();
                self.counters.tx_fail += 1;
                self.client_msg_tx_fail();
            }
            TxNak::Unexpected => {
                error!("[{}] Received unexpected NAK.", self.name);
                self.rx.set_nak();
                self.counters.bytes_ignored += 2;
            }
        }
    }

    fn client_msg_tx_ok(&mut self) {
        if let Some(id) = self.tx.owner() {
            if let Some(client) = self.registry.get_mut(id) {
                debug!(
                    "[{}.{}] Sending transmission success message to client.",
                    self.name, client.name
                );
                if client.out.try_send(Bytes::from_static(&[msg::ACK])).is_err() {
                    error!(
                        "[{}.{}] Could not send transmission success notice to client because its outbound queue is full.",
                        self.name, client.name
                    );
                }
                client.state = ClientState::Idle;
                client.counters.tx_success += 1;
            }
        } else {
            error!(
                "[{}] Message transmission completed for defunct client.",
                self.name
            );
        }
        self.find_next_tx(None);
    }

    fn client_msg_tx_fail(&mut self) {
        if let Some(id) = self.tx.owner() {
            if let Some(client) = self.registry.get_mut(id) {
                debug!(
                    "[{}.{}] Sending transmission failure message.",
                    self.name, client.name
                );
                if client.out.try_send(Bytes::from_static(&[msg::NAK])).is_err() {
                    error!(
                        "[{}.{}] Could not send transmission failure notice to client because its outbound queue is full.",
                        self.name, client.name
                    );
                }
                client.state = ClientState::Idle;
                client.counters.tx_fail += 1;
            }
        } else {
            error!(
                "[{}] Message transmission failed for defunct client.",
                self.name
            );
        }
        self.find_next_tx(None);
    }

    /// Dispatch the next complete client message to the idle transmitter.
    fn find_next_tx(&mut self, start: Option<ClientId>) {
        if self.tx.busy() || self.registry.is_empty() {
            return;
        }
        if let Some(id) = self.registry.next_ready(start) {
            self.dispatch(id);
        }
    }

    fn dispatch(&mut self, id: ClientId) {
        let payload = {
            let Some(client) = self.registry.get_mut(id) else {
                return;
            };
            debug!(
                "[{}.{}] Beginning message transmission.",
                self.name, client.name
            );
            client.state = ClientState::MsgPend;
            client.counters.tx_attempts += 1;
            client.df1_tx.take()
        };
        self.registry.set_last_served(id);
        self.counters.tx_attempts += 1;
        if !self.tx.load(id, &payload) {
            error!(
                "[{}] Message dropped due to transmit buffer overflow.",
                self.name
            );
            self.tx.flush();
            self.client_msg_tx_fail();
        } else if !self.tx.send(&mut self.line_out) {
            error!(
                "[{}] Message transmission failed because line output buffer full.",
                self.name
            );
            self.tx.flush();
            self.client_msg_tx_fail();
        }
    }

    /// Timer tick: advance the receiver and transmitter timeouts.
    pub fn on_tick(&mut self) {
        if self.rx.tick() {
            debug!("[{}] Message reception timeout.", self.name);
        }
        // With embedded responses in use the awaited ACK may ride inside
        // the frame currently being received; hold the timer meanwhile.
        let paused = self.embed_rsp && self.rx.is_active();
        match self.tx.tick(paused) {
            None => {}
            Some(TxTimeout::SolicitEnq) => {
                debug!("[{}] Transmitter timeout.", self.name);
                self.counters.resp_timeouts += 1;
                debug!("[{}] Sending DLE ENQ.", self.name);
                if !self.tx.send_enq(&mut self.line_out) {
                    error!(
                        "[{}] ENQ transmission failed because line output buffer full.",
                        self.name
                    );
                    self.tx.flush();
                    self.client_msg_tx_fail();
                } else {
                    self.counters.enqs_out += 1;
                }
            }
            Some(TxTimeout::Fail) => {
                self.counters.resp_timeouts += 1;
                error!(
                    "[{}] Message transmission failed after {} ENQ(s) sent.",
                    self.name,
                    self.tx.max_enq()
                );
                self.tx.flush();
                self.counters.tx_fail += 1;
                self.client_msg_tx_fail();
            }
        }
    }

    /// Bytes arrived from a client socket.
    pub fn on_client_data(&mut self, id: ClientId, data: &[u8]) {
        for &byte in data {
            if !self.client_byte(id, byte) {
                self.close_client(id);
                return;
            }
        }
    }

    fn client_byte(&mut self, id: ClientId, byte: u8) -> bool {
        use ClientState::*;
        let action = {
            let Some(client) = self.registry.get_mut(id) else {
                return true;
            };
            match client.state {
                Connected => {
                    // First byte is the requested node address.
                    client.addr = byte;
                    client.state = RegLen;
                    ByteAction::Nothing
                }
                RegLen => {
                    if byte == 0 || byte as usize > CLIENT_NAME_LEN {
                        error!(
                            "[{}] Client requested invalid name length {}.",
                            self.name, byte
                        );
                        ByteAction::Violation
                    } else {
                        client.name_len = byte as usize;
                        client.name.clear();
                        client.state = RegName;
                        ByteAction::Nothing
                    }
                }
                RegName => {
                    client.name.push(byte as char);
                    if client.name.len() == client.name_len {
                        ByteAction::Register
                    } else {
                        ByteAction::Nothing
                    }
                }
                Idle if byte == msg::SOH => {
                    debug!(
                        "[{}.{}] Receiving new application layer message from client.",
                        self.name, client.name
                    );
                    client.state = MsgLen;
                    ByteAction::Nothing
                }
                Idle | MsgReady | MsgPend => match byte {
                    msg::SOH => {
                        // Only one outstanding message allowed at a time.
                        error!(
                            "[{}.{}] Message received from client while one is already pending transmission.",
                            self.name, client.name
                        );
                        ByteAction::Violation
                    }
                    msg::ACK => ByteAction::RcvAck,
                    msg::NAK => ByteAction::RcvNak,
                    _ => {
                        error!(
                            "[{}.{}] Received unknown message type from client.",
                            self.name, client.name
                        );
                        ByteAction::Violation
                    }
                },
                MsgLen => {
                    if byte == 0 {
                        error!(
                            "[{}.{}] Client submitted an empty message.",
                            self.name, client.name
                        );
                        ByteAction::Violation
                    } else {
                        client.new_msg_len = byte as usize;
                        client.state = Msg;
                        ByteAction::Nothing
                    }
                }
                Msg => {
                    if !client.df1_tx.push(byte) {
                        error!(
                            "[{}.{}] Buffer overflow while receiving application data.",
                            self.name, client.name
                        );
                        ByteAction::Violation
                    } else if client.df1_tx.len() == client.new_msg_len {
                        client.state = MsgReady;
                        ByteAction::MsgComplete
                    } else {
                        ByteAction::Nothing
                    }
                }
            }
        };
        match action {
            ByteAction::Nothing => true,
            ByteAction::Violation => false,
            ByteAction::Register => self.register_client(id),
            ByteAction::RcvAck => {
                self.client_rcv_ack(id);
                true
            }
            ByteAction::RcvNak => {
                self.client_rcv_nak(id);
                true
            }
            ByteAction::MsgComplete => {
                self.find_next_tx(Some(id));
                true
            }
        }
    }

    fn register_client(&mut self, id: ClientId) -> bool {
        let (addr, name) = match self.registry.get(id) {
            Some(c) => (c.addr, c.name.clone()),
            None => return true,
        };
        if let Some(existing) = self.registry.find_addr(addr) {
            let owner = self
                .registry
                .get(existing)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            error!(
                "[{}.{}] Client tried to register at address {} which is already used by client {}.",
                self.name, name, addr, owner
            );
            return false;
        }
        info!(
            "[{}.{}] Client registered at address {}.",
            self.name, name, addr
        );
        if let Some(client) = self.registry.get_mut(id) {
            client.state = ClientState::Idle;
        }
        true
    }

    /// Client acknowledged a received message.
    fn client_rcv_ack(&mut self, id: ClientId) {
        if self.rx.owner() == Some(id) {
            if let Some(client) = self.registry.get_mut(id) {
                debug!(
                    "[{}.{}] Client accepted message from receiver.",
                    self.name, client.name
                );
                client.counters.msg_accept += 1;
            }
            self.send_ack();
        } else if let Some(client) = self.registry.get(id) {
            error!(
                "[{}.{}] Received unexpected ACK from client.",
                self.name, client.name
            );
        }
    }

    /// Client rejected a received message.
    fn client_rcv_nak(&mut self, id: ClientId) {
        if self.rx.owner() == Some(id) {
            if let Some(client) = self.registry.get_mut(id) {
                debug!(
                    "[{}.{}] Client rejected message from receiver.",
                    self.name, client.name
                );
                client.counters.msg_reject += 1;
            }
            self.send_nak();
        } else if let Some(client) = self.registry.get(id) {
            error!(
                "[{}.{}] Received unexpected NAK from client.",
                self.name, client.name
            );
        }
    }

    pub fn close_client(&mut self, id: ClientId) {
        let Some(client) = self.registry.remove(id) else {
            return;
        };
        info!("[{}.{}] Closing client.", self.name, client.name);
        info!(
            "[{}.{}] Client stats: {} msgs tx; {} msgs rx.",
            self.name, client.name, client.counters.tx_attempts, client.counters.msg_rx
        );
        // A message in flight for this client completes unnotified.
        if self.tx.owner() == Some(id) {
            self.tx.clear_owner();
        }
        // An unacknowledged delivery is acknowledged on its behalf.
        if self.rx.owner() == Some(id) {
            self.send_ack();
        }
        client.cancel.cancel();
    }

    fn accept_client(
        &mut self,
        socket: TcpStream,
        peer: SocketAddr,
        events: mpsc::Sender<ClientEvent>,
    ) {
        let id = self.registry.allocate_id();
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(CLIENT_OUT_QUEUE);
        let cancel = CancellationToken::new();
        let (rd, wr) = socket.into_split();
        tokio::spawn(client_reader(id, rd, events, cancel.clone()));
        tokio::spawn(client_writer(wr, out_rx, cancel.clone()));
        self.registry.insert(Client::new(id, peer, out_tx, cancel));
        info!("[{}] Client connected from {}.", self.name, peer);
    }

    async fn flush_line<L>(&mut self, line: &mut L) -> std::io::Result<()>
    where
        L: AsyncWrite + Unpin,
    {
        if !self.line_out.is_empty() {
            let data = self.line_out.take();
            line.write_all(&data).await?;
            line.flush().await?;
        }
        // The staged frame is now fully queued at the line driver.
        if self.tx.state() == TxState::PendWrite {
            self.tx.data_sent();
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        for client in self.registry.drain() {
            info!("[{}.{}] Closing client.", self.name, client.name);
            client.cancel.cancel();
        }
        info!("[{}] Closing connection.", self.name);
        info!(
            "[{}] Connection stats: {} msgs tx; {} msgs rx.",
            self.name, self.counters.tx_attempts, self.counters.msg_rx
        );
    }
}

/// Drive one connection until cancellation or a fatal line error.
pub async fn run_connection<L>(
    mut line: L,
    listener: TcpListener,
    mut conn: Conn,
    cancel: CancellationToken,
) where
    L: AsyncRead + AsyncWrite + Unpin,
{
    let (ev_tx, mut ev_rx) = mpsc::channel::<ClientEvent>(EVENT_QUEUE);
    let mut tick = interval(Duration::from_millis(TICK_MS));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut line_in = BytesMut::with_capacity(1024);
    info!(
        duplex = %conn.duplex,
        error_detect = %conn.scheme,
        "[{}] Connection running.",
        conn.name
    );
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => conn.on_tick(),
            read = line.read_buf(&mut line_in) => match read {
                Ok(0) => {
                    error!("[{}] Serial line closed.", conn.name);
                    break;
                }
                Ok(_) => conn.parse_line_data(&mut line_in),
                Err(e) => {
                    error!("[{}] Error reading serial line: {}.", conn.name, e);
                    break;
                }
            },
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => conn.accept_client(socket, peer, ev_tx.clone()),
                Err(e) => warn!("[{}] Failed to accept client connection: {}.", conn.name, e),
            },
            Some(event) = ev_rx.recv() => match event {
                ClientEvent::Data(id, data) => conn.on_client_data(id, &data),
                ClientEvent::Closed(id) => {
                    if conn.registry.get(id).is_some() {
                        info!("[{}] Client disconnected.", conn.name);
                    }
                    conn.close_client(id);
                }
            },
        }
        if let Err(e) = conn.flush_line(&mut line).await {
            error!("[{}] Error writing serial line: {}.", conn.name, e);
            break;
        }
    }
    conn.shutdown();
}

async fn client_reader(
    id: ClientId,
    mut rd: OwnedReadHalf,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(512);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = rd.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    let _ = events.send(ClientEvent::Closed(id)).await;
                    return;
                }
                Ok(_) => {
                    if events.send(ClientEvent::Data(id, buf.split().freeze())).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
}

async fn client_writer(
    mut wr: OwnedWriteHalf,
    mut out: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            item = out.recv() => match item {
                None => return,
                Some(data) => {
                    if wr.write_all(&data).await.is_err() {
                        return;
                    }
                }
            },
        }
    }
}
