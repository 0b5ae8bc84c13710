use thiserror::Error;

pub type PcccResult<T> = std::result::Result<T, PcccError>;

/// Outcome taxonomy of the PCCC client.
///
/// The descriptive text the original library kept in a side buffer rides
/// in the variant payloads, so `to_string()` yields the canonical phrase
/// plus the specific description in one go.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PcccError {
    /// Not connected to a link layer service.
    #[error("not connected to a link layer service")]
    NoConnection,

    /// The connection to the link layer service failed.
    #[error("link layer service connection error: {0}")]
    Link(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unrecoverable error; the session must be closed.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// An internal buffer could not hold the data being assembled.
    #[error("internal buffer overflow: {0}")]
    BufferOverflow(String),

    /// The message slot pool is exhausted.
    #[error("no message buffers available to process command")]
    NoBuffer,

    /// The link layer service could not deliver the command.
    #[error("link layer service could not deliver command")]
    NoDeliver,

    /// No reply arrived within the session timeout.
    #[error("timed out awaiting a reply")]
    Timeout,

    /// The reply carried a non-zero STS or failed to decode.
    #[error("reply contained an error: {0}")]
    Reply(String),
}
