//! Supervisory state machine boundary
//!
//! The core reconciles observed device state against an external
//! supervisory state machine and escalates fatal errors into it. Only the
//! boundary is defined here; [`LocalSupervisory`] is a self-contained
//! implementation that logs transitions and keeps a record of them, used
//! by the service binary and by tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::Result;

/// Supervisory states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisoryState {
    Standby,
    Disabled,
    Enabled,
    Fault,
}

/// Transition entry points of the supervisory state machine
#[async_trait]
pub trait SupervisoryControl: Send {
    /// Current supervisory state
    fn state(&self) -> SupervisoryState;

    /// Transition to active operation
    async fn enable(&mut self) -> Result<()>;

    /// Transition out of active operation
    async fn disable(&mut self) -> Result<()>;

    /// Escalate a fatal error; carries a machine-checkable code and a
    /// human-readable message
    async fn fault(&mut self, code: u16, message: &str);
}

#[derive(Debug, Default)]
struct Inner {
    state: SupervisoryState,
    transitions: Vec<SupervisoryState>,
    faults: Vec<(u16, String)>,
}

impl Default for SupervisoryState {
    fn default() -> Self {
        SupervisoryState::Standby
    }
}

/// In-process supervisory state machine.
///
/// Clones share the same underlying state, so a caller can keep a handle
/// for observation while the supervisor owns the control side.
#[derive(Debug, Clone, Default)]
pub struct LocalSupervisory {
    inner: Arc<Mutex<Inner>>,
}

impl LocalSupervisory {
    pub fn new(initial: SupervisoryState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: initial,
                transitions: Vec::new(),
                faults: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All transitions performed so far, in order
    pub fn transitions(&self) -> Vec<SupervisoryState> {
        self.lock().transitions.clone()
    }

    /// All faults reported so far, in order
    pub fn faults(&self) -> Vec<(u16, String)> {
        self.lock().faults.clone()
    }
}

#[async_trait]
impl SupervisoryControl for LocalSupervisory {
    fn state(&self) -> SupervisoryState {
        self.lock().state
    }

    async fn enable(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SupervisoryState::Enabled {
            info!("supervisory transition: {:?} -> Enabled", inner.state);
            inner.state = SupervisoryState::Enabled;
            inner.transitions.push(SupervisoryState::Enabled);
        }
        Ok(())
    }

    async fn disable(&mut self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != SupervisoryState::Disabled {
            info!("supervisory transition: {:?} -> Disabled", inner.state);
            inner.state = SupervisoryState::Disabled;
            inner.transitions.push(SupervisoryState::Disabled);
        }
        Ok(())
    }

    async fn fault(&mut self, code: u16, message: &str) {
        let mut inner = self.lock();
        error!("supervisory fault {}: {}", code, message);
        inner.state = SupervisoryState::Fault;
        inner.transitions.push(SupervisoryState::Fault);
        inner.faults.push((code, message.to_string()));
    }
}
