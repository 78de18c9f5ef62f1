// ABOUTME: Error types for sandbox provisioning, execution, isolation, snapshots, and teardown
// ABOUTME: One typed enum per component so callers can tell retryable from fatal conditions

use thiserror::Error;

/// Failures reported by a container runtime implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime daemon could not be reached at all
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    /// The referenced container, exec, or image does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The runtime answered but the operation failed
    #[error("Runtime fault: {0}")]
    Fault(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Resource limit strings that failed validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LimitError {
    #[error("Invalid CPU limit '{0}': expected a percentage like \"80%\" or a fraction in (0, 1]")]
    InvalidCpu(String),

    #[error("Invalid memory limit '{0}': expected a positive size like \"512MB\" or \"16GB\"")]
    InvalidMemory(String),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Invalid resource limits: {0}")]
    LimitInvalid(#[from] LimitError),

    #[error("Image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("Runtime fault during provisioning: {0}")]
    RuntimeFault(String),
}

impl From<RuntimeError> for ProvisionError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => ProvisionError::RuntimeUnavailable(msg),
            other => ProvisionError::RuntimeFault(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Command timed out after {seconds:.1} seconds: {command}")]
    TimedOut { command: String, seconds: f64 },

    /// The command timed out and the runtime failed to kill it; it may still be running
    #[error("Command timed out after {seconds:.1} seconds and could not be stopped ({reason}): {command}")]
    NotStopped {
        command: String,
        seconds: f64,
        reason: String,
    },

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Runtime fault during execution: {0}")]
    RuntimeFault(String),
}

impl From<RuntimeError> for ExecutionError {
    fn from(err: RuntimeError) -> Self {
        ExecutionError::RuntimeFault(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum IsolationError {
    #[error("Isolation target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Runtime fault during isolation: {0}")]
    RuntimeFault(String),
}

impl From<RuntimeError> for IsolationError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(msg) | RuntimeError::Unavailable(msg) => {
                IsolationError::TargetUnavailable(msg)
            }
            RuntimeError::Fault(msg) => IsolationError::RuntimeFault(msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O failure: {0}")]
    IOFailure(String),

    #[error("Environment not ready: {0}")]
    EnvironmentNotReady(String),

    #[error("Snapshot corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::IOFailure(err.to_string())
    }
}

impl From<RuntimeError> for SnapshotError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(msg) => SnapshotError::EnvironmentNotReady(msg),
            other => SnapshotError::IOFailure(other.to_string()),
        }
    }
}

/// Failures signalling host processes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("Refusing to signal own process {0}")]
    OwnProcess(u32),

    #[error("Process signalling is not supported on this platform")]
    Unsupported,
}

#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("Runtime fault during teardown: {0}")]
    RuntimeFault(String),
}

impl From<RuntimeError> for TeardownError {
    fn from(err: RuntimeError) -> Self {
        TeardownError::RuntimeFault(err.to_string())
    }
}
