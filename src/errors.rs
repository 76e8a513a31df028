// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture sessions
//!
//! Every request a caller issues resolves with either a reply or exactly one
//! [`CaptureError`]. Each error carries a short machine-checkable code
//! ([`CaptureError::code`]) and a human-readable message (`Display`).

use std::fmt;
use std::time::Duration;

use crate::backends::camera::pending::RequestKind;
use crate::backends::camera::types::{BackendError, SinkKind};

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Caller-facing capture error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// A request of the same kind is already outstanding
    DuplicateRequest(RequestKind),
    /// The session identifier does not match any live session
    SessionMismatch { camera_id: i64 },
    /// No device media type satisfies the requested preset
    NegotiationFailure(String),
    /// A sink could not be configured
    SinkConfigurationFailure { sink: SinkKind, message: String },
    /// The engine refused a command synchronously
    EngineCommandFailure { action: RequestKind, message: String },
    /// The engine reported failure asynchronously
    EngineReportedFailure { action: RequestKind, message: String },
    /// The session was torn down before the request resolved
    Disposed,
    /// No outcome arrived within the allowed time
    Timeout { action: RequestKind, after: Duration },
    /// The action is not permitted in the current session state
    InvalidState { action: RequestKind, reason: &'static str },
    /// A session already exists for this device
    DeviceInUse(String),
    /// No device with this identifier is known
    DeviceNotFound(String),
}

impl CaptureError {
    /// Stable code for programmatic matching
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DuplicateRequest(_) => "duplicate_request",
            CaptureError::SessionMismatch { .. } => "session_mismatch",
            CaptureError::NegotiationFailure(_) => "negotiation_failure",
            CaptureError::SinkConfigurationFailure { .. } => "sink_configuration_failure",
            CaptureError::EngineCommandFailure { .. } => "engine_command_failure",
            CaptureError::EngineReportedFailure { .. } => "engine_reported_failure",
            CaptureError::Disposed => "disposed",
            CaptureError::Timeout { .. } => "timeout",
            CaptureError::InvalidState { .. } => "invalid_state",
            CaptureError::DeviceInUse(_) => "device_in_use",
            CaptureError::DeviceNotFound(_) => "device_not_found",
        }
    }

    /// Map a synchronous engine refusal to the action that issued it
    pub fn command(action: RequestKind, error: BackendError) -> Self {
        CaptureError::EngineCommandFailure {
            action,
            message: error.to_string(),
        }
    }

    /// Map an asynchronous engine failure to the action it completes
    pub fn reported(action: RequestKind, error: BackendError) -> Self {
        CaptureError::EngineReportedFailure {
            action,
            message: error.to_string(),
        }
    }

    pub fn sink(sink: SinkKind, error: impl fmt::Display) -> Self {
        CaptureError::SinkConfigurationFailure {
            sink,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DuplicateRequest(kind) => {
                write!(f, "Duplicate request: {} already in progress", kind)
            }
            CaptureError::SessionMismatch { camera_id } => {
                write!(f, "Camera id {} does not match any session", camera_id)
            }
            CaptureError::NegotiationFailure(msg) => {
                write!(f, "Failed to negotiate media types: {}", msg)
            }
            CaptureError::SinkConfigurationFailure { sink, message } => {
                write!(f, "Failed to configure {} sink: {}", sink, message)
            }
            CaptureError::EngineCommandFailure { action, message } => {
                write!(f, "Failed to {}: {}", action, message)
            }
            CaptureError::EngineReportedFailure { action, message } => {
                write!(f, "Engine failed to {}: {}", action, message)
            }
            CaptureError::Disposed => {
                write!(f, "Session disposed before request was handled")
            }
            CaptureError::Timeout { action, after } => {
                write!(f, "Timed out after {:?} waiting to {}", after, action)
            }
            CaptureError::InvalidState { action, reason } => {
                write!(f, "Cannot {}: {}", action, reason)
            }
            CaptureError::DeviceInUse(device_id) => {
                write!(f, "Camera with device id {} already exists", device_id)
            }
            CaptureError::DeviceNotFound(device_id) => {
                write!(f, "No camera with device id {}", device_id)
            }
        }
    }
}

impl std::error::Error for CaptureError {}
