//! Brings configured connections up and runs them to completion.

use crate::config::ServiceConfig;
use crate::conn::{run_connection, Conn};
use crate::error::{LinkError, LinkResult};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running DF1 link layer service: one task per connection.
pub struct Service {
    tasks: Vec<JoinHandle<()>>,
}

impl Service {
    /// Open every configured connection and spawn its task. Connections
    /// that fail to come up are logged and skipped; at least one must
    /// succeed.
    pub async fn start(cfg: &ServiceConfig, cancel: CancellationToken) -> LinkResult<Self> {
        let mut tasks = Vec::new();
        for conn_cfg in &cfg.connection {
            let serial = match tokio_serial::new(&conn_cfg.device, conn_cfg.baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .open_native_async()
            {
                Ok(s) => s,
                Err(e) => {
                    error!(
                        "[{}] Failed to open serial device {}: {}.",
                        conn_cfg.name, conn_cfg.device, e
                    );
                    continue;
                }
            };
            let listener = match TcpListener::bind(("0.0.0.0", conn_cfg.port)).await {
                Ok(l) => l,
                Err(e) => {
                    error!(
                        "[{}] Failed to bind listening socket on port {}: {}.",
                        conn_cfg.name, conn_cfg.port, e
                    );
                    continue;
                }
            };
            // 8N1: ten bit times per byte on the wire.
            let byte_usec = 10_000_000u64 / conn_cfg.baud as u64;
            info!(
                "[{}] Serial device {} at {} baud (~{} us/byte), listening on port {}.",
                conn_cfg.name, conn_cfg.device, conn_cfg.baud, byte_usec, conn_cfg.port
            );
            let conn = Conn::new(conn_cfg);
            tasks.push(tokio::spawn(run_connection(
                serial,
                listener,
                conn,
                cancel.clone(),
            )));
        }
        if tasks.is_empty() {
            return Err(LinkError::NoConnections);
        }
        Ok(Self { tasks })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every connection task to finish.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}
