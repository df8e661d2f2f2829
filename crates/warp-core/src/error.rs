//! Error types for warp.
//!
//! Every fatal condition in a session unwinds through [`Error`] so that the
//! orchestrator's scoped cleanup always runs. Two outcomes that look like
//! failures are deliberately *not* errors here:
//!
//! - a pod that already ran to completion (see [`crate::condition::Terminal`])
//! - a background sync failure (logged and absorbed by the sync loop)

use thiserror::Error;

/// Result alias used throughout warp-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for warp sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Configuration could not be turned into a session.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generating or encoding the session keypair failed.
    #[error("Failed to generate keypair: {0}")]
    KeyGeneration(String),

    /// Local IO failure (temp files, pipes, child processes).
    #[error("IO error: {0}")]
    Io(String),

    /// A kubectl invocation failed.
    #[error("{}", kubectl_message(operation, detail, *is_not_found))]
    Kubectl {
        operation: String,
        detail: String,
        is_not_found: bool,
    },

    /// The pod is missing or was deleted while we waited on it.
    #[error("pods \"{0}\" not found")]
    NotFound(String),

    /// The pod status never lists the container we wait for.
    #[error("no container found with name '{0}'")]
    NoSuchContainer(String),

    /// A container reported a state we do not understand.
    #[error("unknown container state for '{0}'")]
    UnknownContainerState(String),

    /// The watch stream ended before the milestone was decided.
    #[error("watch for pod '{0}' closed before the condition was met")]
    WatchClosed(String),

    /// An opt-in wait timeout elapsed.
    #[error("timed out after {seconds}s waiting for pod '{pod}' to reach {milestone}")]
    WaitTimeout {
        pod: String,
        milestone: String,
        seconds: u64,
    },

    /// No free local port could be reserved for the tunnel.
    #[error("Failed to find free port: {0}")]
    PortReservation(String),

    /// The tunnel to the pod failed or closed.
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// The file sync tool failed to launch or exited non-zero.
    #[error("sync failed: {message}")]
    Sync {
        exit_code: Option<i32>,
        message: String,
    },

    /// The operator interrupted the session.
    #[error("interrupted")]
    Interrupted,
}

fn kubectl_message(operation: &str, detail: &str, is_not_found: bool) -> String {
    if is_not_found {
        format!(
            "Failed to {operation}: kubectl is not installed or not in PATH.\n\n\
             Install kubectl: https://kubernetes.io/docs/tasks/tools/\n\n\
             Error: {detail}"
        )
    } else {
        format!("Failed to {operation}: {detail}")
    }
}

impl Error {
    /// Create a kubectl error for a failed operation.
    pub fn kubectl(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Kubectl {
            operation: operation.into(),
            detail: detail.into(),
            is_not_found: false,
        }
    }

    /// Create a sync error from a tool exit code.
    pub fn sync_failed(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self::Sync {
            exit_code,
            message: message.into(),
        }
    }

    /// Whether this error is the operator interrupt rather than a failure.
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("invalid JSON: {err}"))
    }
}
