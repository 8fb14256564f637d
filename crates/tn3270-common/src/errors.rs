//! Error types for tn3270-connect.
//!
//! Two error domains exist: [`EmulatorError`] for everything that goes wrong
//! between us and an external emulator process, and [`WorkflowError`] for
//! configuration and workflow-level failures. Transient emulator errors are
//! absorbed by the retry layer; everything that escapes it is final.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for emulator driver operations.
pub type EmulatorResult<T> = std::result::Result<T, EmulatorError>;

/// Errors raised by the binary provisioner, the control channel, and the
/// emulator driver.
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// An embedded or on-disk executable asset could not be produced.
    #[error("Binary provisioning failed for '{name}': {reason}")]
    Provision { name: String, reason: String },

    /// Spawning the emulator process failed.
    #[error("Emulator spawn failed on control port {control_port}: {reason}")]
    Spawn { control_port: u16, reason: String },

    /// A control-client invocation failed in a non-retriable way.
    #[error("Command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// A retry budget was exhausted without a successful attempt.
    #[error("Maximum {operation} retries reached ({attempts} attempts)")]
    RetriesExhausted { operation: String, attempts: u32 },

    /// The keyboard was not unlocked when the wait completed.
    #[error("Keyboard not unlocked, state was: {state}")]
    KeyboardLocked { state: String },

    /// A key outside the Enter/Tab/PF1..PF24 vocabulary was requested.
    #[error("Invalid key {key}")]
    InvalidKey { key: String },

    /// An operation required a live connection and there was none.
    #[error("Not connected to host")]
    NotConnected,

    /// The emulator host was not configured.
    #[error("Host needs to be filled")]
    MissingHost,

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmulatorError {
    /// Creates a Provision error.
    pub fn provision(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provision {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Spawn error.
    pub fn spawn(control_port: u16, reason: impl Into<String>) -> Self {
        Self::Spawn {
            control_port,
            reason: reason.into(),
        }
    }

    /// Creates a CommandFailed error.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Creates a RetriesExhausted error.
    pub fn retries_exhausted(operation: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
        }
    }

    /// Creates an InvalidKey error.
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;

/// Errors raised while loading, validating, or executing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Invalid configuration, detected before any workflow runs.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A step type outside the fixed vocabulary.
    #[error("Unknown step type: {step_type}")]
    UnknownStep { step_type: String },

    /// The output sink could not be created or written.
    #[error("Output file error at {path}: {reason}")]
    Output { path: PathBuf, reason: String },

    /// No free TCP port could be found for a new emulator instance.
    #[error("No free control port found after {attempts} candidates above {base}")]
    PortsExhausted { base: u16, attempts: u32 },

    /// An emulator-level failure that terminated the workflow.
    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// Creates a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an UnknownStep error.
    pub fn unknown_step(step_type: impl Into<String>) -> Self {
        Self::UnknownStep {
            step_type: step_type.into(),
        }
    }

    /// Creates an Output error.
    pub fn output(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Output {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
