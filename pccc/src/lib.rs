//! Allen-Bradley PCCC application layer client.
//!
//! Issues PCCC commands to programmable controllers through a DF1 link
//! layer service reached over TCP. Commands are correlated to replies by
//! transaction number from a fixed pool of message slots, and run either
//! blocking (one at a time) or callback-driven from an application-owned
//! event loop.
//!
//! ```no_run
//! use pccc::{FileType, ReplyValue, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pccc::PcccError> {
//!     let mut session = Session::new(2, 5, 4)?;
//!     session.connect("127.0.0.1", 5600, "demo").await?;
//!     let reply = session
//!         .cmd_protected_typed_logical_read_2(None, 1, FileType::Int, 7, 0, 4)
//!         .await?;
//!     if let Some(ReplyValue::Data(values)) = reply {
//!         println!("N7:0..4 = {:?}", values);
//!     }
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod addr;
mod cmd;
pub mod data;
pub mod error;
mod msg;
mod session;
pub mod sts;
pub mod types;

/// Service framing bytes shared with the link layer service.
pub(crate) mod wire {
    pub const SOH: u8 = 0x01;
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;
}

pub use error::{PcccError, PcccResult};
pub use msg::Notify;
pub use session::Session;
pub use types::{
    ControlElement, CounterElement, FileData, FileType, Mode, PlcAddress, ReplyValue,
    SlcFileInfo, StringElement, TimeBase, TimerElement,
};
