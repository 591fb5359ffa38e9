//! Supervision worker
//!
//! A single task owns the compressor session and serializes everything that
//! touches it: the 1 Hz poll cycle, remote commands, reconnection and the
//! grace-period policy. Commands arrive over a channel through
//! [`CommandHandle`] and are answered individually, so a rejected command
//! never disturbs the poll cycle.
//!
//! Recoverable failures (connection refused, transport faults) close the
//! session and retry with a fixed backoff until the grace period runs out;
//! device rejections and decode contract violations escalate to a
//! supervisory fault immediately.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::compressor::Compressor;
use crate::config::CompressorConfig;
use crate::error::{CompSrvError, Result};
use crate::health::{FailureAction, FailureTracker};
use crate::registers::block_name;
use crate::sink::{TelemetryRecord, TelemetrySink};
use crate::state::SupervisoryControl;

/// Poll ticks between timer block reads
const TIMER_READ_TICKS: u32 = 60;
/// Command channel depth; commands are rare and answered synchronously
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Remote commands accepted by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressorCommand {
    PowerOn,
    PowerOff,
    Reset,
}

struct CommandRequest {
    command: CompressorCommand,
    reply: oneshot::Sender<Result<()>>,
}

/// Cloneable handle for issuing commands to a running supervisor
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandHandle {
    pub async fn power_on(&self) -> Result<()> {
        self.send(CompressorCommand::PowerOn).await
    }

    pub async fn power_off(&self) -> Result<()> {
        self.send(CompressorCommand::PowerOff).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(CompressorCommand::Reset).await
    }

    async fn send(&self, command: CompressorCommand) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CommandRequest {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CompSrvError::Transport("supervisor is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CompSrvError::Transport("supervisor dropped the command".to_string()))?
    }
}

/// Operator-facing description of a failure. Device rejections of the two
/// functions in use name the operation and the register block they hit;
/// other codes fall back to the error's own rendering.
fn fault_message(error: &CompSrvError) -> String {
    match (error, error.protocol_operation()) {
        (CompSrvError::Protocol { address, exception_code, .. }, Some(operation)) => {
            format!(
                "device rejected {operation} on the {} block (register 0x{address:04X}, \
                 exception code {exception_code})",
                block_name(*address)
            )
        }
        _ => error.to_string(),
    }
}

/// What woke the worker up
enum Wake {
    Tick,
    Command(CommandRequest),
    Shutdown,
}

/// The supervision worker. Owns the compressor, the telemetry sink and the
/// control side of the supervisory state machine.
pub struct Supervisor<S: TelemetrySink> {
    compressor: Compressor,
    sink: S,
    supervisory: Box<dyn SupervisoryControl>,
    tracker: FailureTracker,
    poll_interval: Duration,
    reconnect_backoff: Duration,
    timer_countdown: u32,
    first_run: bool,
    commands: mpsc::Receiver<CommandRequest>,
    // Held so `commands.recv()` never yields None while the worker runs
    _command_tx: mpsc::Sender<CommandRequest>,
    handle: CommandHandle,
}

impl<S: TelemetrySink> Supervisor<S> {
    pub fn new(
        compressor: Compressor,
        sink: S,
        supervisory: Box<dyn SupervisoryControl>,
        config: &CompressorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        Self {
            compressor,
            sink,
            supervisory,
            tracker: FailureTracker::new(config.grace_period()),
            poll_interval: config.poll_interval(),
            reconnect_backoff: config.reconnect_backoff(),
            timer_countdown: 0,
            first_run: true,
            commands: rx,
            _command_tx: tx.clone(),
            handle: CommandHandle { tx },
        }
    }

    /// Handle for issuing commands while the supervisor runs
    pub fn command_handle(&self) -> CommandHandle {
        self.handle.clone()
    }

    /// Run until cancelled or until a fault escalates.
    ///
    /// The session is closed on every exit path.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        info!("supervisor started");
        let result = self.supervise(&token).await;
        self.compressor.close().await;
        match &result {
            Ok(()) => info!("supervisor stopped"),
            Err(e) => error!("supervisor failed: {e}"),
        }
        result
    }

    async fn supervise(&mut self, token: &CancellationToken) -> Result<()> {
        loop {
            if token.is_cancelled() {
                return Ok(());
            }

            if !self.compressor.is_connected() {
                match self.compressor.connect().await {
                    Ok(()) => {
                        self.tracker.observe_success();
                        self.first_run = true;
                        self.timer_countdown = 0;
                    }
                    Err(e) => {
                        self.handle_failure(e, token).await?;
                        continue;
                    }
                }
            }

            if let Err(e) = self.tick().await {
                self.handle_failure(e, token).await?;
                continue;
            }
            self.tracker.observe_success();

            match self.wake(token).await {
                Wake::Shutdown => return Ok(()),
                Wake::Tick => {}
                Wake::Command(request) => {
                    if let Err(e) = self.dispatch(request).await {
                        self.handle_failure(e, token).await?;
                    }
                }
            }
        }
    }

    /// One poll cycle: status first so reconciliation and the remote-start
    /// flag are fresh, then the remaining blocks, then publication.
    async fn tick(&mut self) -> Result<()> {
        let first_run = self.first_run;

        let status = self.compressor.read_status().await?;
        self.compressor
            .reconcile(&status, &mut *self.supervisory)
            .await?;
        let (errors, warnings) = self.compressor.read_errors().await?;
        let analog = self.compressor.read_analog().await?;

        let info = if first_run {
            Some(self.compressor.read_info().await?)
        } else {
            None
        };
        let timers = if self.timer_countdown == 0 {
            self.timer_countdown = TIMER_READ_TICKS;
            Some(self.compressor.read_timers().await?)
        } else {
            self.timer_countdown -= 1;
            None
        };

        self.publish(TelemetryRecord::Status(status), first_run).await;
        self.publish(TelemetryRecord::Errors(errors), first_run).await;
        self.publish(TelemetryRecord::Warnings(warnings), first_run)
            .await;
        self.publish(TelemetryRecord::AnalogData(analog), true).await;
        if let Some(info) = info {
            self.publish(TelemetryRecord::CompressorInfo(info), true).await;
        }
        if let Some(timers) = timers {
            self.publish(TelemetryRecord::TimerInfo(timers), first_run)
                .await;
        }

        self.first_run = false;
        Ok(())
    }

    /// Publish one record; sink trouble is logged and must not stop polling
    async fn publish(&mut self, record: TelemetryRecord, forced: bool) {
        let topic = record.topic();
        if let Err(e) = self.sink.publish(record, forced).await {
            warn!("dropping {} record: {}", topic, e);
        }
    }

    async fn wake(&mut self, token: &CancellationToken) -> Wake {
        tokio::select! {
            _ = token.cancelled() => Wake::Shutdown,
            _ = tokio::time::sleep(self.poll_interval) => Wake::Tick,
            request = self.commands.recv() => match request {
                Some(request) => Wake::Command(request),
                None => Wake::Shutdown,
            },
        }
    }

    /// Execute one command and answer its requester.
    ///
    /// Device-side rejections belong to the requester alone; a transport
    /// failure is also fed into the reconnection policy.
    async fn dispatch(&mut self, request: CommandRequest) -> Result<()> {
        info!("executing command {:?}", request.command);
        let result = match request.command {
            CompressorCommand::PowerOn => self.compressor.power_on().await,
            CompressorCommand::PowerOff => self.compressor.power_off().await,
            CompressorCommand::Reset => self.compressor.reset().await,
        };

        let escalation = match &result {
            Err(e) if e.is_recoverable() => Some(e.clone()),
            Err(e) => {
                warn!("command {:?} rejected: {}", request.command, fault_message(e));
                None
            }
            Ok(()) => None,
        };

        // The requester may have given up waiting; that is their business
        let _ = request.reply.send(result);

        match escalation {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Apply the failure policy for one error.
    ///
    /// Recoverable errors close the session and retry with backoff while
    /// the grace period lasts; everything else faults the supervisory state
    /// machine and stops the worker.
    async fn handle_failure(&mut self, error: CompSrvError, token: &CancellationToken) -> Result<()> {
        if !error.is_recoverable() {
            self.supervisory
                .fault(error.fault_code(), &fault_message(&error))
                .await;
            return Err(error);
        }

        self.compressor.close().await;
        let now = Instant::now();
        match self.tracker.observe_failure(now) {
            FailureAction::Retry => {
                let degraded_for = self
                    .tracker
                    .degraded_for(now)
                    .unwrap_or_default();
                warn!(
                    "{} (degraded for {:.0?}), retrying in {:.0?}",
                    error, degraded_for, self.reconnect_backoff
                );
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.reconnect_backoff) => {}
                }
                Ok(())
            }
            FailureAction::Escalate => {
                self.supervisory
                    .fault(error.fault_code(), &fault_message(&error))
                    .await;
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressorConfig;
    use crate::error::fault_code;
    use crate::session::testing::{ScriptedSession, WriteOp};
    use crate::sink::MemorySink;
    use crate::state::{LocalSupervisory, SupervisoryState};

    fn test_config() -> CompressorConfig {
        let mut config = CompressorConfig::default();
        config.poll_interval_ms = 5;
        config.reconnect_backoff_ms = 5;
        config.grace_period_secs = 600;
        config
    }

    fn supervisor(
        session: ScriptedSession,
        config: &CompressorConfig,
    ) -> (Supervisor<MemorySink>, MemorySink, LocalSupervisory) {
        let sink = MemorySink::new();
        let supervisory = LocalSupervisory::new(SupervisoryState::Disabled);
        let supervisor = Supervisor::new(
            Compressor::new(Box::new(session)),
            sink.clone(),
            Box::new(supervisory.clone()),
            config,
        );
        (supervisor, sink, supervisory)
    }

    #[tokio::test]
    async fn first_tick_publishes_every_topic_once() {
        let session = ScriptedSession::default();
        let config = test_config();
        let (supervisor, sink, _) = supervisor(session, &config);

        let token = CancellationToken::new();
        let worker = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        worker.await.expect("join").expect("clean stop");

        for topic in ["status", "errors", "warnings", "analogData"] {
            assert!(
                !sink.records_for(topic).is_empty(),
                "missing {topic} records"
            );
        }
        // Info is read once per connection, timers once per countdown window
        assert_eq!(sink.records_for("compressorInfo").len(), 1);
        assert_eq!(sink.records_for("timerInfo").len(), 1);
        // Unchanged status is suppressed after the forced first publish
        assert_eq!(sink.records_for("status").len(), 1);
        // Measurements flow every tick
        assert!(sink.records_for("analogData").len() > 1);
    }

    #[tokio::test]
    async fn running_compressor_enables_supervisory_state() {
        let session = ScriptedSession::default();
        // First tick reads status, errors, water level, analog, info, timers;
        // later ticks drop the info and timer reads
        session.queue_read(Ok(vec![0x0003, 0, 0x0001]));
        session.queue_read(Ok(vec![0; 16]));
        session.queue_read(Ok(vec![0]));
        session.queue_read(Ok(vec![0; 14]));
        session.queue_read(Ok(vec![0; 23]));
        session.queue_read(Ok(vec![0; 8]));
        for _ in 0..100 {
            session.queue_read(Ok(vec![0x0003, 0, 0x0001]));
            session.queue_read(Ok(vec![0; 16]));
            session.queue_read(Ok(vec![0]));
            session.queue_read(Ok(vec![0; 14]));
        }
        let config = test_config();
        let (supervisor, _, supervisory) = supervisor(session, &config);

        let token = CancellationToken::new();
        let worker = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
        worker.await.expect("join").expect("clean stop");

        assert_eq!(supervisory.state(), SupervisoryState::Enabled);
        assert_eq!(supervisory.transitions(), vec![SupervisoryState::Enabled]);
    }

    #[tokio::test]
    async fn exhausted_grace_period_faults_with_connect_code() {
        let session = ScriptedSession::default();
        session.queue_connect(Err(CompSrvError::ConnectFailed("refused".into())));
        session.queue_connect(Err(CompSrvError::ConnectFailed("refused".into())));
        let mut config = test_config();
        config.grace_period_secs = 0;
        let (supervisor, _, supervisory) = supervisor(session, &config);

        let err = supervisor
            .run(CancellationToken::new())
            .await
            .expect_err("must escalate");
        assert!(matches!(err, CompSrvError::ConnectFailed(_)));
        assert_eq!(supervisory.state(), SupervisoryState::Fault);
        let faults = supervisory.faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].0, fault_code::COULD_NOT_CONNECT);
    }

    #[tokio::test]
    async fn reconnects_after_transient_connect_failure() {
        let session = ScriptedSession::default();
        session.queue_connect(Err(CompSrvError::ConnectFailed("refused".into())));
        // Second attempt succeeds (empty queue defaults to Ok)
        let config = test_config();
        let (supervisor, sink, supervisory) = supervisor(session, &config);

        let token = CancellationToken::new();
        let worker = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        worker.await.expect("join").expect("clean stop");

        assert!(!sink.records_for("status").is_empty());
        assert_eq!(supervisory.state(), SupervisoryState::Disabled);
    }

    #[tokio::test]
    async fn decode_contract_violation_faults_immediately() {
        let session = ScriptedSession::default();
        // Short status block
        session.queue_read(Ok(vec![0, 0]));
        let config = test_config();
        let (supervisor, _, supervisory) = supervisor(session, &config);

        let err = supervisor
            .run(CancellationToken::new())
            .await
            .expect_err("must escalate");
        assert!(matches!(err, CompSrvError::DecodeContract { .. }));
        assert_eq!(supervisory.faults()[0].0, fault_code::MODBUS_ERROR);
    }

    #[tokio::test]
    async fn protocol_fault_message_names_operation_and_block() {
        let session = ScriptedSession::default();
        session.queue_read(Err(CompSrvError::Protocol {
            original_code: 4,
            exception_code: 2,
            address: crate::registers::register::STATUS,
        }));
        let config = test_config();
        let (supervisor, _, supervisory) = supervisor(session, &config);

        let err = supervisor
            .run(CancellationToken::new())
            .await
            .expect_err("must escalate");
        assert!(matches!(err, CompSrvError::Protocol { .. }));

        let faults = supervisory.faults();
        assert_eq!(faults[0].0, 4);
        assert!(faults[0].1.contains("read registers"), "{}", faults[0].1);
        assert!(faults[0].1.contains("status block"), "{}", faults[0].1);
        assert!(faults[0].1.contains("0x0030"), "{}", faults[0].1);
    }

    #[tokio::test]
    async fn commands_are_answered_and_rejections_do_not_stop_polling() {
        let session = ScriptedSession::default();
        let config = test_config();
        let (supervisor, _, _) = supervisor(session.clone(), &config);
        let handle = supervisor.command_handle();

        let token = CancellationToken::new();
        let worker = tokio::spawn(supervisor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Status reads return zeros, so remote starts are disabled
        let err = handle.power_on().await.expect_err("must be rejected");
        assert!(matches!(err, CompSrvError::Precondition(_)));

        handle.power_off().await.expect("power off");
        handle.reset().await.expect("reset");
        assert_eq!(
            session.writes(),
            vec![
                WriteOp {
                    address: crate::registers::register::REMOTE_CMD,
                    value: crate::registers::CMD_OFF
                },
                WriteOp {
                    address: crate::registers::register::RESET,
                    value: crate::registers::CMD_ON
                },
            ]
        );

        token.cancel();
        worker.await.expect("join").expect("clean stop");
    }
}
