//! Result types for command execution

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of one remote command
///
/// Filled in as far as the execution got; on error the zero values of the
/// remaining fields stay in place so the result can still be logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Remote user
    pub user: String,
    /// Target `host:port`
    pub host: String,
    /// Command that was run
    pub command: String,
    /// Raw stdout bytes
    pub stdout: Vec<u8>,
    /// Raw stderr bytes
    pub stderr: Vec<u8>,
    /// Remote exit code, only meaningful without an accompanying error
    pub code: i32,
    /// Time spent on the execution
    pub duration: Duration,
}

impl ExecutionResult {
    /// Start a result for `command` on `host`
    pub fn new(host: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout decoded lossily as UTF-8
    #[must_use]
    pub fn stdout_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// stderr decoded lossily as UTF-8
    #[must_use]
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// `user@host` as used in log lines
    #[must_use]
    pub fn remote(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ssh {}: {:?} exited {} ({} bytes stdout, {} bytes stderr)",
            self.remote(),
            self.command,
            self.code,
            self.stdout.len(),
            self.stderr.len()
        )
    }
}

/// How a remote command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The command ran to completion with this exit code
    Completed(i32),
    /// The session broke before an exit status arrived
    TransportError(String),
}

/// Everything captured from one command session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    /// Bytes received on the data stream
    pub stdout: Vec<u8>,
    /// Bytes received on extended data type 1
    pub stderr: Vec<u8>,
    /// How the command ended
    pub outcome: ExitOutcome,
}

/// Classify the end of a session from the exit messages the server sent
///
/// A signal without an exit status maps to `128 + signal number`, or 128
/// for signals without a known number.
#[must_use]
pub fn classify_exit(exit_status: Option<u32>, exit_signal: Option<&str>) -> ExitOutcome {
    match (exit_status, exit_signal) {
        (Some(status), _) => ExitOutcome::Completed(status.cast_signed()),
        (None, Some(signal)) => ExitOutcome::Completed(128 + signal_number(signal).unwrap_or(0)),
        (None, None) => ExitOutcome::TransportError(
            "remote command exited without exit status or exit signal".to_string(),
        ),
    }
}

/// POSIX number of a signal as named in SSH exit-signal messages
#[must_use]
pub fn signal_number(name: &str) -> Option<i32> {
    let number = match name.trim_start_matches("SIG") {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "ILL" => 4,
        "ABRT" => 6,
        "FPE" => 8,
        "KILL" => 9,
        "USR1" => 10,
        "SEGV" => 11,
        "USR2" => 12,
        "PIPE" => 13,
        "ALRM" => 14,
        "TERM" => 15,
        _ => return None,
    };
    Some(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_is_completed() {
        assert_eq!(classify_exit(Some(0), None), ExitOutcome::Completed(0));
        assert_eq!(classify_exit(Some(7), None), ExitOutcome::Completed(7));
        assert_eq!(classify_exit(Some(1), Some("TERM")), ExitOutcome::Completed(1));
    }

    #[test]
    fn test_signal_maps_to_128_plus_number() {
        assert_eq!(classify_exit(None, Some("KILL")), ExitOutcome::Completed(137));
        assert_eq!(classify_exit(None, Some("TERM")), ExitOutcome::Completed(143));
        assert_eq!(classify_exit(None, Some("WINCH")), ExitOutcome::Completed(128));
    }

    #[test]
    fn test_missing_exit_is_transport_error() {
        assert!(matches!(
            classify_exit(None, None),
            ExitOutcome::TransportError(_)
        ));
    }

    #[test]
    fn test_lossy_views_and_display() {
        let mut result = ExecutionResult::new("10.0.0.1:22", "cat /bin/true");
        result.user = "core".to_string();
        result.stdout = vec![b'o', b'k', 0xff, b'\n'];
        result.code = 3;

        assert_eq!(result.stdout_lossy(), "ok\u{fffd}\n");
        assert!(result.stderr_lossy().is_empty());
        assert!(!result.success());
        assert_eq!(
            result.to_string(),
            "ssh core@10.0.0.1:22: \"cat /bin/true\" exited 3 (4 bytes stdout, 0 bytes stderr)"
        );
    }

    #[test]
    fn test_result_serializes_raw_bytes() {
        let mut result = ExecutionResult::new("h:22", "true");
        result.stdout = vec![0, 255];

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stdout"], serde_json::json!([0, 255]));
        assert_eq!(json["code"], 0);
    }
}
