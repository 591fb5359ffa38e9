//! Telemetry sink boundary
//!
//! Decoded snapshots leave the service as named structured records. A sink
//! suppresses records that are unchanged since their last publish unless
//! the `forced` flag is set, so consumers are not flooded with identical
//! status/error events every poll tick while measurements still flow.
//!
//! [`RedisSink`] publishes JSON to pub/sub channels named
//! `<prefix>:<topic>`; [`MemorySink`] records publishes for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::config::SinkConfig;
use crate::error::{CompSrvError, Result};
use crate::registers::{
    AnalogSnapshot, CompressorInfo, ErrorSnapshot, StatusSnapshot, TimerSnapshot, WarningSnapshot,
};

/// One named structured record
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    Status(StatusSnapshot),
    Errors(ErrorSnapshot),
    Warnings(WarningSnapshot),
    AnalogData(AnalogSnapshot),
    TimerInfo(TimerSnapshot),
    CompressorInfo(CompressorInfo),
}

impl TelemetryRecord {
    /// Topic name used for channel routing and change suppression
    pub fn topic(&self) -> &'static str {
        match self {
            TelemetryRecord::Status(_) => "status",
            TelemetryRecord::Errors(_) => "errors",
            TelemetryRecord::Warnings(_) => "warnings",
            TelemetryRecord::AnalogData(_) => "analogData",
            TelemetryRecord::TimerInfo(_) => "timerInfo",
            TelemetryRecord::CompressorInfo(_) => "compressorInfo",
        }
    }

    /// Record payload as a JSON value
    pub fn payload(&self) -> Result<serde_json::Value> {
        let payload = match self {
            TelemetryRecord::Status(s) => serde_json::to_value(s),
            TelemetryRecord::Errors(s) => serde_json::to_value(s),
            TelemetryRecord::Warnings(s) => serde_json::to_value(s),
            TelemetryRecord::AnalogData(s) => serde_json::to_value(s),
            TelemetryRecord::TimerInfo(s) => serde_json::to_value(s),
            TelemetryRecord::CompressorInfo(s) => serde_json::to_value(s),
        };
        payload.map_err(|e| CompSrvError::Sink(format!("cannot serialize record: {e}")))
    }
}

/// Telemetry/event publisher boundary.
///
/// `forced` means "publish even if unchanged since the last publish".
#[async_trait]
pub trait TelemetrySink: Send {
    async fn publish(&mut self, record: TelemetryRecord, forced: bool) -> Result<()>;
}

/// Per-topic change suppression shared by sink implementations
#[derive(Debug, Default)]
struct ChangeGuard {
    last: HashMap<&'static str, TelemetryRecord>,
}

impl ChangeGuard {
    /// Whether this record should go out, updating the last-seen entry
    fn should_publish(&mut self, record: &TelemetryRecord, forced: bool) -> bool {
        let unchanged = self.last.get(record.topic()) == Some(record);
        if unchanged && !forced {
            return false;
        }
        self.last.insert(record.topic(), record.clone());
        true
    }
}

/// Redis pub/sub telemetry sink
pub struct RedisSink {
    client: redis::Client,
    connection: Option<MultiplexedConnection>,
    channel_prefix: String,
    guard: ChangeGuard,
}

impl RedisSink {
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| CompSrvError::Sink(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            connection: None,
            channel_prefix: config.channel_prefix.clone(),
            guard: ChangeGuard::default(),
        })
    }

    async fn connection(&mut self) -> Result<&mut MultiplexedConnection> {
        if self.connection.is_none() {
            let connection = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| CompSrvError::Sink(format!("cannot connect to redis: {e}")))?;
            info!("telemetry sink connected to redis");
            self.connection = Some(connection);
        }
        // Just inserted above when absent
        Ok(self.connection.as_mut().unwrap_or_else(|| unreachable!()))
    }
}

#[async_trait]
impl TelemetrySink for RedisSink {
    async fn publish(&mut self, record: TelemetryRecord, forced: bool) -> Result<()> {
        if !self.guard.should_publish(&record, forced) {
            debug!("suppressing unchanged {} record", record.topic());
            return Ok(());
        }

        let channel = format!("{}:{}", self.channel_prefix, record.topic());
        let message = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "topic": record.topic(),
            "data": record.payload()?,
        })
        .to_string();

        let connection = self.connection().await?;
        let result: std::result::Result<i64, redis::RedisError> =
            connection.publish(&channel, &message).await;
        if let Err(e) = result {
            // Drop the connection so the next publish re-establishes it
            self.connection = None;
            return Err(CompSrvError::Sink(format!(
                "publish to {channel} failed: {e}"
            )));
        }
        debug!("published {} record to {}", record.topic(), channel);
        Ok(())
    }
}

/// In-memory sink for tests.
///
/// Clones share the same record store, so tests can keep a handle while
/// the supervisor owns the sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: std::sync::Arc<std::sync::Mutex<Vec<TelemetryRecord>>>,
    guard: std::sync::Arc<std::sync::Mutex<ChangeGuard>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Published records for one topic
    pub fn records_for(&self, topic: &str) -> Vec<TelemetryRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.topic() == topic)
            .collect()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn publish(&mut self, record: TelemetryRecord, forced: bool) -> Result<()> {
        let mut guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.should_publish(&record, forced) {
            return Ok(());
        }
        drop(guard);
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
        Ok(())
    }
}
