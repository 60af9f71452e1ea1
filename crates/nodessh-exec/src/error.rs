//! Error types for nodessh-exec

use std::time::Duration;

use thiserror::Error;

use crate::hosts::HostError;
use crate::keys::KeyError;
use crate::result::ExecutionResult;

/// Errors that can occur during remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// No usable signer for the provider
    #[error("error getting signer: {0}")]
    Signer(#[from] KeyError),

    /// Node address resolution failed
    #[error(transparent)]
    Host(#[from] HostError),

    /// Node inventory could not be listed
    #[error("inventory error: {0}")]
    Inventory(String),

    /// Could not reach the host at the TCP level
    #[error("error dialing {user}@{host} after {attempts} attempt(s): {reason}")]
    Dial {
        /// Remote user
        user: String,
        /// `host:port` that was dialed
        host: String,
        /// Number of dial attempts made
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// The bastion could not open a stream to the target
    #[error("error dialing {target} from bastion {bastion}: {reason}")]
    Forward {
        /// Bastion `host:port`
        bastion: String,
        /// Target `host:port`
        target: String,
        /// Failure reported by the bastion
        reason: String,
    },

    /// SSH negotiation or authentication failed
    #[error("SSH handshake with {user}@{host} failed: {reason}")]
    Handshake {
        /// Remote user
        user: String,
        /// `host:port` of the peer
        host: String,
        /// Failure cause
        reason: String,
    },

    /// Session or I/O failure while running the command
    #[error("failed running `{command}` on {user}@{host}: {reason}")]
    Transport {
        /// Remote user
        user: String,
        /// `host:port` of the peer
        host: String,
        /// Command being run
        command: String,
        /// Failure cause
        reason: String,
    },

    /// Whole execution exceeded its deadline
    #[error("execution timed out after {timeout:?}")]
    Timeout {
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// Command did not succeed on the node
    #[error("failed running {command:?}: {reason} (exit code {code}, stderr {stderr})")]
    CommandFailed {
        /// Command being run
        command: String,
        /// Remote exit code, 0 when the transport failed
        code: i32,
        /// Captured stderr
        stderr: String,
        /// Transport error, or a note that the command exited nonzero
        reason: String,
    },
}

impl ExecError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Dial { .. } | ExecError::Timeout { .. } | ExecError::Transport { .. }
        )
    }
}

/// Execution failure together with everything that was known at the time
///
/// The result's `code` must not be trusted as a completed remote execution.
#[derive(Error, Debug, Clone)]
#[error("ssh {}@{}: {error}", .result.user, .result.host)]
pub struct ExecFailure {
    /// Partially populated result
    pub result: ExecutionResult,
    /// What went wrong
    #[source]
    pub error: ExecError,
}

impl ExecFailure {
    /// Attach an error to a partially populated result
    #[must_use]
    pub fn new(result: ExecutionResult, error: impl Into<ExecError>) -> Self {
        Self {
            result,
            error: error.into(),
        }
    }
}
