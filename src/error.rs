use std::{fmt, io, time::Duration};
use thiserror::Error;

/// Errors surfaced to callers of the supervisor.
///
/// None of these are retried internally; retry policy belongs to the caller.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Event channel '{name}' already exists (stale queue or duplicate supervision)")]
    ChannelCreation { name: String },

    #[error("Event channel failure")]
    Channel(#[source] ChannelError),

    #[error("Timed out after {0:?} waiting for dhcp lease")]
    LeaseTimeout(Duration),

    #[error("udhcpc exited {phase} with code {code}")]
    ProcessExit { code: i32, phase: ExitPhase },

    #[error("udhcpc did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Failed to spawn udhcpc")]
    Spawn(#[source] io::Error),

    #[error("Failed to open network namespace '{name}'")]
    Namespace {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to signal udhcpc")]
    Signal(#[from] nix::Error),

    #[error("Interface '{0}' not found or has no hardware address")]
    InterfaceInvalid(String),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("Supervisor reached a critical failure: {0}")]
    Critical(String),
}

impl From<ChannelError> for SupervisorError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::AlreadyExists { name } => SupervisorError::ChannelCreation { name },
            other => SupervisorError::Channel(other),
        }
    }
}

/// When the child was found to have exited with an unexpected code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPhase {
    /// Before `finish` asked it to stop.
    Early,
    /// While `finish` was waiting for it.
    Shutdown,
}

impl fmt::Display for ExitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitPhase::Early => f.write_str("early"),
            ExitPhase::Shutdown => f.write_str("during shutdown"),
        }
    }
}

/// Errors from the POSIX message queue layer.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Invalid message queue name '{0}'")]
    InvalidName(String),

    #[error("Message queue '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("Failed to open message queue '{name}'")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read message queue attributes")]
    Attributes(#[source] io::Error),

    #[error("Failed to register message queue with the reactor")]
    Register(#[source] io::Error),

    #[error("Failed to receive from message queue")]
    Receive(#[source] io::Error),

    #[error("Failed to send to message queue")]
    Send(#[source] io::Error),

    #[error("Failed to close message queue")]
    Close(#[source] io::Error),

    #[error("Failed to unlink message queue '{name}'")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Decoding failures for a single channel message. Logged and dropped by the
/// dispatch loop, never returned to callers.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed event payload")]
    Json(#[from] serde_json::Error),

    #[error("Event has no 'type' field")]
    MissingType,

    #[error("Unknown event type '{0}'")]
    UnknownType(String),

    #[error("Event is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Event field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
