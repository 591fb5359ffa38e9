//! Compressor device model
//!
//! One [`Compressor`] per physical unit, owning the device session. It
//! groups raw register reads into decoded snapshots, carries the remote
//! command surface (power on/off, error reset) with its preconditions, and
//! reconciles the observed operating state against the supervisory state
//! machine.
//!
//! The remote-start flag observed in the status block is cached so a
//! power-on issued while remote starts are disabled fails fast, before a
//! request the controller would reject anyway goes on the wire.

use tracing::{info, warn};

use crate::error::{CompSrvError, Result};
use crate::registers::{
    self, register, AnalogSnapshot, CompressorInfo, ErrorSnapshot, StatusSnapshot, TimerSnapshot,
    WarningSnapshot, ANALOG_LEN, ERRORS_LEN, INFO_LEN, STATUS_LEN, TIMERS_LEN,
};
use crate::session::DeviceSession;
use crate::state::{SupervisoryControl, SupervisoryState};

/// Bit set in the echoed function code when the controller rejects a remote
/// command because it is not in remote mode
const NOT_IN_REMOTE_MODE: u8 = 0x10;

pub struct Compressor {
    session: Box<dyn DeviceSession>,
    /// Last observed start-by-remote flag; commands check this before writing
    remote_start_enabled: bool,
    /// Guards against reconciliation re-entering itself through a transition
    reconciling: bool,
}

impl Compressor {
    pub fn new(session: Box<dyn DeviceSession>) -> Self {
        Self {
            session,
            remote_start_enabled: false,
            reconciling: false,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.session.connect().await
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn remote_start_enabled(&self) -> bool {
        self.remote_start_enabled
    }

    /// Read and decode the status block, refreshing the cached
    /// remote-start flag.
    pub async fn read_status(&mut self) -> Result<StatusSnapshot> {
        let words = self
            .session
            .read_registers(register::STATUS, STATUS_LEN as u16)
            .await?;
        let status = StatusSnapshot::decode(&words)?;
        self.remote_start_enabled = status.start_by_remote;
        Ok(status)
    }

    /// Read the error/warning block once and decode both views of it
    pub async fn read_errors(&mut self) -> Result<(ErrorSnapshot, WarningSnapshot)> {
        let words = self
            .session
            .read_registers(register::ERRORS, ERRORS_LEN as u16)
            .await?;
        Ok((
            ErrorSnapshot::decode(&words)?,
            WarningSnapshot::decode(&words)?,
        ))
    }

    /// Read the analog measurements: the water-level word and the main
    /// analog block are adjacent in address space but read separately.
    pub async fn read_analog(&mut self) -> Result<AnalogSnapshot> {
        let mut words = self
            .session
            .read_registers(register::WATER_LEVEL, 1)
            .await?;
        let analog = self
            .session
            .read_registers(register::ANALOG, ANALOG_LEN as u16)
            .await?;
        words.extend_from_slice(&analog);
        AnalogSnapshot::decode(&words)
    }

    pub async fn read_timers(&mut self) -> Result<TimerSnapshot> {
        let words = self
            .session
            .read_registers(register::TIMERS, TIMERS_LEN as u16)
            .await?;
        TimerSnapshot::decode(&words)
    }

    pub async fn read_info(&mut self) -> Result<CompressorInfo> {
        let words = self
            .session
            .read_registers(register::INFO, INFO_LEN as u16)
            .await?;
        CompressorInfo::decode(&words)
    }

    /// Start the compressor remotely.
    ///
    /// Fails fast when the last observed status had remote starts disabled.
    pub async fn power_on(&mut self) -> Result<()> {
        if !self.remote_start_enabled {
            return Err(CompSrvError::Precondition(
                "compressor not configured for remote starts".to_string(),
            ));
        }
        info!("issuing remote power on");
        self.command(register::REMOTE_CMD, registers::CMD_ON).await
    }

    /// Stop the compressor remotely
    pub async fn power_off(&mut self) -> Result<()> {
        info!("issuing remote power off");
        self.command(register::REMOTE_CMD, registers::CMD_OFF).await
    }

    /// Reset latched errors and warnings
    pub async fn reset(&mut self) -> Result<()> {
        info!("issuing error/warning reset");
        self.command(register::RESET, registers::CMD_ON).await
    }

    async fn command(&mut self, address: u16, value: u16) -> Result<()> {
        match self.session.write_register(address, value).await {
            Err(CompSrvError::Protocol { original_code, .. })
                if original_code & NOT_IN_REMOTE_MODE != 0 =>
            {
                Err(CompSrvError::Precondition(format!(
                    "controller rejected command at 0x{address:04X}: not in remote mode"
                )))
            }
            other => other,
        }
    }

    /// Align the supervisory state with the observed operating flag.
    ///
    /// Only the enabled/disabled pair is reconciled; standby and fault are
    /// left for the operator or the fault path to resolve.
    pub async fn reconcile(
        &mut self,
        status: &StatusSnapshot,
        supervisory: &mut dyn SupervisoryControl,
    ) -> Result<()> {
        if self.reconciling {
            return Ok(());
        }
        self.reconciling = true;
        let result = Self::reconcile_inner(status, supervisory).await;
        self.reconciling = false;
        result
    }

    async fn reconcile_inner(
        status: &StatusSnapshot,
        supervisory: &mut dyn SupervisoryControl,
    ) -> Result<()> {
        match (supervisory.state(), status.operating) {
            (SupervisoryState::Disabled, true) => {
                warn!("compressor is running while disabled, enabling");
                supervisory.enable().await
            }
            (SupervisoryState::Enabled, false) => {
                info!("compressor stopped, disabling");
                supervisory.disable().await
            }
            _ => Ok(()),
        }
    }
}
