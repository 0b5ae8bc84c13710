//! Allen-Bradley DF1 link layer engine.
//!
//! Multiplexes a half/full-duplex serial byte stream between TCP clients
//! registered by logical node address: DLE framing and stuffing, BCC and
//! CRC-16 error detection, the ACK/NAK/ENQ retry machinery, duplicate
//! detection, and round-robin scheduling of client messages onto the
//! line. The `df1d` binary wraps this crate into a service process.

pub mod buffer;
pub mod checksum;
pub mod client;
pub mod config;
pub mod conn;
pub mod error;
pub mod rx;
pub mod service;
pub mod tx;
pub mod types;

pub use config::{ConnectionConfig, ServiceConfig};
pub use conn::{run_connection, Conn};
pub use error::{LinkError, LinkResult};
pub use service::Service;
pub use types::{Duplex, ErrorDetect};
