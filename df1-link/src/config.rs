//! Service configuration.
//!
//! One `[[connection]]` table per serial line:
//!
//! ```toml
//! [[connection]]
//! name = "line0"
//! device = "/dev/ttyS0"
//! baud = 19200
//! port = 5600
//! duplex = "full"            # full | master | slave
//! error_detect = "crc"       # crc | bcc
//! duplicate_detect = true
//! max_nak = 3
//! max_enq = 3
//! ack_timeout = 1000         # milliseconds
//! ```

use crate::error::{LinkError, LinkResult};
use crate::types::{Duplex, ErrorDetect, CONN_NAME_LEN};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Baud rates the service accepts.
pub const BAUD_RATES: [u32; 8] = [110, 300, 600, 1200, 2400, 9600, 19200, 38400];

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub connection: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Text name used in log messages.
    pub name: String,
    /// Serial port device path.
    pub device: String,
    /// TCP port to listen on for client connections.
    pub port: u16,
    #[serde(default)]
    pub duplex: Duplex,
    #[serde(default)]
    pub error_detect: ErrorDetect,
    #[serde(default = "ConnectionConfig::baud_default")]
    pub baud: u32,
    #[serde(default = "ConnectionConfig::duplicate_detect_default")]
    pub duplicate_detect: bool,
    /// NAKs tolerated before a transmission fails.
    #[serde(default = "ConnectionConfig::max_nak_default")]
    pub max_nak: u8,
    /// ENQs solicited before a transmission fails.
    #[serde(default = "ConnectionConfig::max_enq_default")]
    pub max_enq: u8,
    /// Milliseconds to await an ACK per attempt.
    #[serde(default = "ConnectionConfig::ack_timeout_default")]
    pub ack_timeout: u64,
}

impl ConnectionConfig {
    fn baud_default() -> u32 {
        19200
    }

    fn duplicate_detect_default() -> bool {
        true
    }

    fn max_nak_default() -> u8 {
        3
    }

    fn max_enq_default() -> u8 {
        3
    }

    fn ack_timeout_default() -> u64 {
        1000
    }

    fn validate(&self) -> LinkResult<()> {
        if self.name.is_empty() || self.name.len() > CONN_NAME_LEN {
            return Err(LinkError::Config(format!(
                "connection name must be 1..={} characters, got {:?}",
                CONN_NAME_LEN, self.name
            )));
        }
        if !BAUD_RATES.contains(&self.baud) {
            return Err(LinkError::Config(format!(
                "[{}] illegal baud rate {}, expected one of {:?}",
                self.name, self.baud, BAUD_RATES
            )));
        }
        if self.device.is_empty() {
            return Err(LinkError::Config(format!(
                "[{}] serial device must not be empty",
                self.name
            )));
        }
        if self.ack_timeout == 0 {
            return Err(LinkError::Config(format!(
                "[{}] ack_timeout must be non-zero",
                self.name
            )));
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Load and validate the configuration file. Environment variables
    /// prefixed `DF1__` override file values.
    pub fn load(path: &str) -> LinkResult<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("DF1")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LinkError::Config(e.to_string()))?;
        let parsed: ServiceConfig = cfg
            .try_deserialize()
            .map_err(|e| LinkError::Config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> LinkResult<()> {
        if self.connection.is_empty() {
            return Err(LinkError::Config(
                "configuration declares no connections".into(),
            ));
        }
        for conn in &self.connection {
            conn.validate()?;
        }
        let mut names: Vec<&str> = self.connection.iter().map(|c| c.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.connection.len() {
            return Err(LinkError::Config("connection names must be unique".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionConfig {
        ConnectionConfig {
            name: "line0".into(),
            device: "/dev/ttyS0".into(),
            port: 5600,
            duplex: Duplex::Full,
            error_detect: ErrorDetect::Crc,
            baud: 19200,
            duplicate_detect: true,
            max_nak: 3,
            max_enq: 3,
            ack_timeout: 1000,
        }
    }

    #[test]
    fn accepts_valid_connection() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_illegal_baud() {
        let mut cfg = base();
        cfg.baud = 57600;
        assert!(matches!(cfg.validate(), Err(LinkError::Config(_))));
    }

    #[test]
    fn rejects_zero_ack_timeout() {
        let mut cfg = base();
        cfg.ack_timeout = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_names() {
        let cfg = ServiceConfig {
            connection: vec![base(), base()],
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_toml_defaults() {
        let toml = r#"
            [[connection]]
            name = "line0"
            device = "/dev/ttyUSB0"
            port = 5600
        "#;
        let cfg = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let parsed: ServiceConfig = cfg.try_deserialize().unwrap();
        assert_eq!(parsed.connection.len(), 1);
        let c = &parsed.connection[0];
        assert_eq!(c.baud, 19200);
        assert_eq!(c.error_detect, ErrorDetect::Crc);
        assert_eq!(c.duplex, Duplex::Full);
        assert!(c.duplicate_detect);
        assert_eq!(c.max_nak, 3);
        assert_eq!(c.ack_timeout, 1000);
    }

    #[test]
    fn parses_explicit_modes() {
        let toml = r#"
            [[connection]]
            name = "halfdup"
            device = "/dev/ttyS1"
            port = 5601
            duplex = "slave"
            error_detect = "bcc"
            duplicate_detect = false
        "#;
        let cfg = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let parsed: ServiceConfig = cfg.try_deserialize().unwrap();
        let c = &parsed.connection[0];
        assert_eq!(c.duplex, Duplex::Slave);
        assert_eq!(c.error_detect, ErrorDetect::Bcc);
        assert!(!c.duplicate_detect);
    }
}
