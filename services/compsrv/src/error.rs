//! Error handling for the compressor supervision service
//!
//! The error taxonomy separates failures that are worth retrying under the
//! grace-period policy (connection establishment and mid-session transport
//! faults) from failures that escalate to a supervisory fault immediately
//! (device-side rejections, violated command preconditions, internal decode
//! contract violations).

use thiserror::Error;

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, CompSrvError>;

/// Fault codes reported to the supervisory state machine.
///
/// Device-reported original function codes (e.g. 16, remote start not
/// allowed) are passed through as-is; these two cover everything the device
/// never had a chance to reject itself.
pub mod fault_code {
    /// The Modbus TCP endpoint could not be contacted
    pub const COULD_NOT_CONNECT: u16 = 98;
    /// Generic Modbus failure - no valid response was received
    pub const MODBUS_ERROR: u16 = 99;
}

/// Compressor supervision service error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompSrvError {
    /// The transport could not be established at all
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The connection was lost or corrupted mid-session
    #[error("Transport fault: {0}")]
    Transport(String),

    /// The device rejected a request on a valid connection
    #[error(
        "Protocol fault at register 0x{address:04X}: original code {original_code}, \
         exception code {exception_code}"
    )]
    Protocol {
        /// Function code echoed in the exception response, error bit stripped
        original_code: u8,
        /// Device exception code
        exception_code: u8,
        /// Register address the rejected request targeted
        address: u16,
    },

    /// A command was issued while the device was not in the required mode
    #[error("Precondition violation: {0}")]
    Precondition(String),

    /// Register count handed to a decoder did not match the block width
    #[error("Decode contract violation in {block} block: expected {expected} registers, got {actual}")]
    DecodeContract {
        block: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry sink error
    #[error("Sink error: {0}")]
    Sink(String),
}

impl CompSrvError {
    /// Whether the grace-period reconnection policy applies.
    ///
    /// Everything else indicates either a programming error or a device-side
    /// condition that waiting will not resolve, and escalates immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CompSrvError::ConnectFailed(_) | CompSrvError::Transport(_)
        )
    }

    /// Machine-checkable code reported with supervisory fault escalation.
    pub fn fault_code(&self) -> u16 {
        match self {
            CompSrvError::ConnectFailed(_) => fault_code::COULD_NOT_CONNECT,
            CompSrvError::Protocol { original_code, .. } => u16::from(*original_code),
            _ => fault_code::MODBUS_ERROR,
        }
    }

    /// Human-readable name of the operation a protocol fault rejected,
    /// derived from the echoed original function code.
    pub fn protocol_operation(&self) -> Option<&'static str> {
        match self {
            CompSrvError::Protocol { original_code: 4, .. } => Some("read registers"),
            CompSrvError::Protocol { original_code: 6, .. } => Some("write single register"),
            _ => None,
        }
    }
}
