//! Device session management
//!
//! The session is the only component touching the transport. It owns an
//! optional TCP stream (created on connect, dropped on close or on a
//! transport fault), frames requests, and classifies failures:
//!
//! - socket establishment failure -> [`CompSrvError::ConnectFailed`]
//! - I/O error, timeout or frame desync mid-session -> [`CompSrvError::Transport`]
//! - device exception response -> [`CompSrvError::Protocol`] with the
//!   echoed original function code, exception code and target address
//!
//! No retry happens here; the reconnection policy lives in the supervisor.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::CompressorConfig;
use crate::error::{CompSrvError, Result};
use crate::protocol::{self, ResponsePdu, MBAP_HEADER_LEN};

/// Transport boundary for the compressor controller.
///
/// One session per unit; all I/O is serialized through `&mut self` on a
/// single worker task.
#[async_trait]
pub trait DeviceSession: Send {
    /// Establish the transport. Replaces any existing connection.
    async fn connect(&mut self) -> Result<()>;

    /// Drop the transport. Safe to call when already disconnected.
    async fn close(&mut self);

    /// Whether a transport is currently established
    fn is_connected(&self) -> bool;

    /// Read `count` registers starting at `address`
    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// Write a single register
    async fn write_register(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Modbus TCP session for one compressor unit
pub struct ModbusTcpSession {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl ModbusTcpSession {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, request_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout: request_timeout,
            stream: None,
            transaction_id: 0,
        }
    }

    pub fn from_config(config: &CompressorConfig) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.unit_id,
            config.request_timeout(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send one request PDU and read back the matching response PDU.
    ///
    /// Any failure in here tears the stream down; a desynced connection
    /// cannot be trusted for the next exchange.
    async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let result = self.exchange_inner(request).await;
        if matches!(result, Err(CompSrvError::Transport(_))) {
            self.stream = None;
        }
        result
    }

    async fn exchange_inner(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let io_timeout = self.timeout;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let transaction_id = self.transaction_id;
        let unit_id = self.unit_id;
        let frame = protocol::frame(transaction_id, unit_id, request);

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| CompSrvError::Transport("session is not connected".to_string()))?;

        timeout(io_timeout, stream.write_all(&frame))
            .await
            .map_err(|_| CompSrvError::Transport("request send timed out".to_string()))?
            .map_err(|e| CompSrvError::Transport(format!("send failed: {e}")))?;
        debug!("sent {} byte frame, transaction {}", frame.len(), transaction_id);

        let mut header = [0u8; MBAP_HEADER_LEN];
        timeout(io_timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| CompSrvError::Transport("response timed out".to_string()))?
            .map_err(|e| CompSrvError::Transport(format!("receive failed: {e}")))?;

        let (response_txn, response_unit, pdu_len) = protocol::parse_mbap(&header)?;
        if response_txn != transaction_id {
            return Err(CompSrvError::Transport(format!(
                "transaction id mismatch: sent {transaction_id}, got {response_txn}"
            )));
        }
        if response_unit != unit_id {
            return Err(CompSrvError::Transport(format!(
                "unit id mismatch: expected {unit_id}, got {response_unit}"
            )));
        }

        let mut pdu = vec![0u8; pdu_len];
        timeout(io_timeout, stream.read_exact(&mut pdu))
            .await
            .map_err(|_| CompSrvError::Transport("response body timed out".to_string()))?
            .map_err(|e| CompSrvError::Transport(format!("receive failed: {e}")))?;
        debug!("received {} byte response PDU", pdu.len());
        Ok(pdu)
    }
}

#[async_trait]
impl DeviceSession for ModbusTcpSession {
    async fn connect(&mut self) -> Result<()> {
        self.stream = None;
        let endpoint = self.endpoint();

        let stream = timeout(self.timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| CompSrvError::ConnectFailed(format!("connection to {endpoint} timed out")))?
            .map_err(|e| CompSrvError::ConnectFailed(format!("cannot connect to {endpoint}: {e}")))?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY on {}: {}", endpoint, e);
        }

        info!("connected to compressor at {} (unit {})", endpoint, self.unit_id);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("disconnected from {}", self.endpoint());
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = protocol::read_request(address, count);
        let pdu = self.exchange(&request).await?;
        match protocol::parse_response(&pdu)? {
            ResponsePdu::Registers(words) => {
                if words.len() != count as usize {
                    return Err(CompSrvError::Transport(format!(
                        "short read at 0x{address:04X}: asked for {count} registers, got {}",
                        words.len()
                    )));
                }
                Ok(words)
            }
            ResponsePdu::Exception {
                original_code,
                exception_code,
            } => Err(CompSrvError::Protocol {
                original_code,
                exception_code,
                address,
            }),
            ResponsePdu::WriteEcho { .. } => Err(CompSrvError::Transport(
                "write echo received for a read request".to_string(),
            )),
        }
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = protocol::write_request(address, value);
        let pdu = self.exchange(&request).await?;
        match protocol::parse_response(&pdu)? {
            ResponsePdu::WriteEcho { .. } => Ok(()),
            ResponsePdu::Exception {
                original_code,
                exception_code,
            } => Err(CompSrvError::Protocol {
                original_code,
                exception_code,
                address,
            }),
            ResponsePdu::Registers(_) => Err(CompSrvError::Transport(
                "register data received for a write request".to_string(),
            )),
        }
    }
}
