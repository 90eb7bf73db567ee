//! Error types for interface lifecycle operations.

use std::io;

use crate::lifecycle::LifecycleState;

/// Result type for netup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the link-layer device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine worker never signalled readiness.
    ///
    /// Nothing can proceed without the worker thread, so callers are
    /// expected to treat this as fatal.
    #[error("engine startup failed: {0}")]
    EngineStartup(String),

    /// The engine worker has exited and no longer accepts calls.
    #[error("engine is not running")]
    EngineStopped,

    /// Operation is not valid in the current lifecycle state.
    #[error("{operation} is not valid while {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the manager was in.
        state: LifecycleState,
    },

    /// No interface is attached to the stack.
    #[error("no interface attached")]
    NotAttached,

    /// An interface is already attached to the stack.
    #[error("interface already attached")]
    AlreadyAttached,

    /// The protocol stack rejected an operation.
    #[error("{operation}: {message}")]
    Stack {
        /// The stack operation that failed.
        operation: &'static str,
        /// Human-readable reason.
        message: String,
    },

    /// Device name too long (max 15 characters).
    #[error("device name too long: {name} ({len} > 15 characters)")]
    NameTooLong {
        /// The name that was too long.
        name: String,
        /// The length of the name.
        len: usize,
    },

    /// ioctl failed.
    #[error("ioctl {name} failed: {source}")]
    Ioctl {
        /// The ioctl name.
        name: &'static str,
        /// The underlying error.
        source: io::Error,
    },
}

impl Error {
    /// Create a stack error for the given operation.
    pub fn stack(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Stack {
            operation,
            message: message.into(),
        }
    }

    /// Create an ioctl error.
    pub fn ioctl(name: &'static str, source: io::Error) -> Self {
        Self::Ioctl { name, source }
    }

    /// Add operation context to this error.
    ///
    /// I/O and attachment errors become [`Error::Stack`] tagged with the
    /// operation. Other errors are returned unchanged.
    pub fn with_context(self, operation: &'static str) -> Self {
        match self {
            Self::Io(e) => Self::stack(operation, e.to_string()),
            e @ (Self::NotAttached | Self::AlreadyAttached) => Self::stack(operation, e.to_string()),
            other => other,
        }
    }

    /// Check if this error leaves the process unable to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EngineStartup(_))
    }

    /// Check if the engine worker is gone.
    pub fn is_engine_stopped(&self) -> bool {
        matches!(self, Self::EngineStopped)
    }

    /// Check if this is a permission error (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io(e) | Self::Ioctl { source: e, .. } => {
                e.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}
