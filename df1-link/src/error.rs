use thiserror::Error;

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Errors surfaced by the link layer service.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// No connection could be brought up from the configuration.
    #[error("no connections initialized")]
    NoConnections,
}
