//! Error types and command result codes
//!
//! `ControllerError` covers a single failed HTTP exchange with the mount
//! controller. `CommandResult` is the closed set of outcomes returned from
//! every daemon command; it crosses the RPC boundary as a numeric code and
//! is never raised as an error.

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors from a single HTTP exchange with the mount controller.
///
/// Transport failures, timeouts and non-2xx responses all fail the
/// enclosing command attempt; no retry is performed at this layer.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("controller returned HTTP {0}")]
    Status(u16),
}

/// Outcome of a daemon command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Succeeded,
    Failed,
    Blocked,
    InvalidControlIP,
    MountControlNotRunning,
    MountNotInitialized,
    MountNotHomed,
    MountNotDisabled,
    UnknownParkPosition,
    OutsideHALimits,
    OutsideDecLimits,
}

impl CommandResult {
    /// Numeric code reported over the RPC boundary.
    pub fn code(self) -> i32 {
        match self {
            CommandResult::Succeeded => 0,
            CommandResult::Failed => 1,
            CommandResult::Blocked => 2,
            CommandResult::InvalidControlIP => 5,
            CommandResult::MountControlNotRunning => 9,
            CommandResult::MountNotInitialized => 10,
            CommandResult::MountNotHomed => 11,
            CommandResult::MountNotDisabled => 14,
            CommandResult::UnknownParkPosition => 15,
            CommandResult::OutsideHALimits => 20,
            CommandResult::OutsideDecLimits => 21,
        }
    }

    /// Human readable description of a result code.
    pub fn message(self) -> &'static str {
        match self {
            CommandResult::Succeeded => "command succeeded",
            CommandResult::Failed => "error: command failed",
            CommandResult::Blocked => "error: another command is already running",
            CommandResult::InvalidControlIP => "error: command not accepted from this IP",
            CommandResult::MountControlNotRunning => "error: mount control software is not running",
            CommandResult::MountNotInitialized => "error: mount has not been initialized",
            CommandResult::MountNotHomed => "error: mount has not been homed",
            CommandResult::MountNotDisabled => "error: mount has already been initialized",
            CommandResult::UnknownParkPosition => "error: unknown park position",
            CommandResult::OutsideHALimits => "error: requested coordinates outside HA limits",
            CommandResult::OutsideDecLimits => "error: requested coordinates outside Dec limits",
        }
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl Serialize for CommandResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}
