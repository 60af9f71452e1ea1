//! Logging of execution results

use tracing::info;

use crate::result::ExecutionResult;

/// Log command, output and exit code of a result, one line each
///
/// Output is decoded lossily and debug-escaped, so any byte content is safe.
pub fn log_result(result: &ExecutionResult) {
    for line in result_lines(result) {
        info!("{line}");
    }
}

/// The lines [`log_result`] emits
#[must_use]
pub fn result_lines(result: &ExecutionResult) -> [String; 4] {
    let remote = result.remote();
    [
        format!("ssh {remote}: command:   {}", result.command),
        format!("ssh {remote}: stdout:    {:?}", result.stdout_lossy()),
        format!("ssh {remote}: stderr:    {:?}", result.stderr_lossy()),
        format!("ssh {remote}: exit code: {}", result.code),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_lines() {
        let result = ExecutionResult {
            user: "core".to_string(),
            host: "10.0.0.1:22".to_string(),
            command: "echo hi".to_string(),
            stdout: b"hi\n".to_vec(),
            stderr: Vec::new(),
            code: 0,
            ..ExecutionResult::default()
        };

        assert_eq!(
            result_lines(&result),
            [
                "ssh core@10.0.0.1:22: command:   echo hi".to_string(),
                "ssh core@10.0.0.1:22: stdout:    \"hi\\n\"".to_string(),
                "ssh core@10.0.0.1:22: stderr:    \"\"".to_string(),
                "ssh core@10.0.0.1:22: exit code: 0".to_string(),
            ]
        );
    }

    #[test]
    fn test_garbled_and_empty_fields() {
        let result = ExecutionResult {
            stdout: vec![0x00, 0xfe, 0xff, b'\r'],
            stderr: vec![0x1b, b'['],
            ..ExecutionResult::default()
        };

        let lines = result_lines(&result);
        assert!(lines[0].starts_with("ssh @: command:"));
        assert!(lines[1].contains("\\0"));
        assert!(lines[2].contains("\\u{1b}["));
        log_result(&result);
    }
}
