//! Registered peers of a DF1 connection.
//!
//! A client connects over TCP, registers a node address and a name, and
//! from then on exchanges framed application messages with the line. The
//! registry owns the client table and the round-robin transmit cursor;
//! the per-byte protocol handling lives in the connection layer, which
//! also drives the receiver and transmitter.

use crate::buffer::BoundedBuf;
use crate::types::{ClientCounters, NodeAddr};
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type ClientId = u32;

/// Name shown in logs until registration completes.
pub const UNREGISTERED_NAME: &str = "*!REG*";

const CLIENT_BUF_SIZE: usize = 512;

/// Outbound queue depth per client, in framed messages. A full queue is
/// the "socket buffer full" condition of the protocol.
pub const CLIENT_OUT_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connection accepted, first registration byte pending.
    Connected,
    /// Next byte is the length of the client's name.
    RegLen,
    /// Receiving the client's name.
    RegName,
    /// Registered, no message in progress.
    Idle,
    /// Next byte is the length of an application message.
    MsgLen,
    /// Receiving an application message.
    Msg,
    /// Application message completely received, queued for the line.
    MsgReady,
    /// Application message handed to the transmitter.
    MsgPend,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub addr: NodeAddr,
    pub state: ClientState,
    pub(crate) name_len: usize,
    pub(crate) new_msg_len: usize,
    /// Message being assembled for transmission on the client's behalf.
    pub df1_tx: BoundedBuf,
    /// Bounded queue toward the client's socket writer task.
    pub out: mpsc::Sender<Bytes>,
    /// Cancels the client's reader/writer tasks.
    pub cancel: CancellationToken,
    pub counters: ClientCounters,
    pub peer: SocketAddr,
}

impl Client {
    pub fn new(
        id: ClientId,
        peer: SocketAddr,
        out: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: UNREGISTERED_NAME.to_string(),
            addr: 0,
            state: ClientState::Connected,
            name_len: 0,
            new_msg_len: 0,
            df1_tx: BoundedBuf::new(CLIENT_BUF_SIZE),
            out,
            cancel,
            counters: ClientCounters::default(),
            peer,
        }
    }

    /// Whether registration has completed and the client is addressable.
    pub fn registered(&self) -> bool {
        !matches!(
            self.state,
            ClientState::Connected | ClientState::RegLen | ClientState::RegName
        )
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<Client>,
    next_id: ClientId,
    /// Client most recently dispatched to the transmitter.
    last_served: Option<ClientId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> ClientId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    pub fn insert(&mut self, client: Client) {
        self.clients.push(client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.id == id)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let pos = self.clients.iter().position(|c| c.id == id)?;
        Some(self.clients.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    /// Find the registered client holding a node address.
    pub fn find_addr(&self, addr: NodeAddr) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|c| c.registered() && c.addr == addr)
            .map(|c| c.id)
    }

    pub fn set_last_served(&mut self, id: ClientId) {
        self.last_served = Some(id);
    }

    /// Next client with a complete message, searching round-robin. The
    /// scan starts after the previously served client (or at `start` when
    /// given) and covers every client exactly once, so a client that
    /// became ready while holding the cursor position is still found.
    pub fn next_ready(&self, start: Option<ClientId>) -> Option<ClientId> {
        if self.clients.is_empty() {
            return None;
        }
        let n = self.clients.len();
        let first = match start {
            Some(id) => self.clients.iter().position(|c| c.id == id).unwrap_or(0),
            None => match self.last_served {
                Some(id) => self
                    .clients
                    .iter()
                    .position(|c| c.id == id)
                    .map(|p| (p + 1) % n)
                    .unwrap_or(0),
                None => 0,
            },
        };
        for i in 0..n {
            let c = &self.clients[(first + i) % n];
            if c.state == ClientState::MsgReady {
                return Some(c.id);
            }
        }
        None
    }

    /// Remove every client, returning them for teardown.
    pub fn drain(&mut self) -> Vec<Client> {
        std::mem::take(&mut self.clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(reg: &mut ClientRegistry, addr: NodeAddr, state: ClientState) -> ClientId {
        let id = reg.allocate_id();
        let (out, _rx) = mpsc::channel(1);
        let mut c = Client::new(
            id,
            "127.0.0.1:0".parse().unwrap(),
            out,
            CancellationToken::new(),
        );
        c.addr = addr;
        c.state = state;
        reg.insert(c);
        id
    }

    #[test]
    fn addresses_resolve_only_when_registered() {
        let mut reg = ClientRegistry::new();
        let a = dummy(&mut reg, 5, ClientState::Idle);
        let _b = dummy(&mut reg, 6, ClientState::Connected);
        assert_eq!(reg.find_addr(5), Some(a));
        assert_eq!(reg.find_addr(6), None);
    }

    #[test]
    fn round_robin_starts_after_last_served() {
        let mut reg = ClientRegistry::new();
        let a = dummy(&mut reg, 1, ClientState::MsgReady);
        let b = dummy(&mut reg, 2, ClientState::MsgReady);
        let c = dummy(&mut reg, 3, ClientState::MsgReady);

        assert_eq!(reg.next_ready(None), Some(a));
        reg.set_last_served(a);
        assert_eq!(reg.next_ready(None), Some(b));
        reg.set_last_served(b);
        assert_eq!(reg.next_ready(None), Some(c));
        reg.set_last_served(c);
        // Wraps around.
        assert_eq!(reg.next_ready(None), Some(a));
    }

    #[test]
    fn cursor_position_is_still_served() {
        let mut reg = ClientRegistry::new();
        let a = dummy(&mut reg, 1, ClientState::Idle);
        let _b = dummy(&mut reg, 2, ClientState::Idle);
        reg.set_last_served(a);
        // `a` becomes ready while being the cursor; the full-cycle scan
        // must reach it.
        reg.get_mut(a).unwrap().state = ClientState::MsgReady;
        assert_eq!(reg.next_ready(None), Some(a));
    }

    #[test]
    fn explicit_start_takes_priority() {
        let mut reg = ClientRegistry::new();
        let _a = dummy(&mut reg, 1, ClientState::MsgReady);
        let b = dummy(&mut reg, 2, ClientState::MsgReady);
        assert_eq!(reg.next_ready(Some(b)), Some(b));
    }
}
