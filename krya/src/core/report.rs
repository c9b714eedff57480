//! Human-readable execution result text.
//!
//! The rendered text is what the classifier inspects, what the job exposes as
//! its last result, and what the next generation call receives as feedback.

use crate::core::types::ExecutionOutcome;

/// Exit code reported for runs that hit their timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Render an execution outcome.
///
/// `timestamp` is passed in so rendering stays deterministic.
pub fn format_execution_result(outcome: &ExecutionOutcome, timestamp: &str) -> String {
    let exit_code = reported_exit_code(outcome);

    let mut buf = String::from("=== EXECUTION RESULTS ===\n");
    buf.push_str(&format!("Exit Code: {exit_code}\n"));
    buf.push_str(&format!("Timestamp: {timestamp}\n\n"));

    if !outcome.stdout.is_empty() {
        buf.push_str(&format!("STDOUT:\n{}\n", outcome.stdout));
    }
    if !outcome.stderr.is_empty() {
        buf.push_str(&format!("STDERR:\n{}\n", outcome.stderr));
    }

    if outcome.cancelled {
        buf.push_str("\n❌ Execution stopped by request");
    } else if outcome.timed_out {
        buf.push_str(&format!(
            "\n❌ Execution timed out after {} seconds",
            outcome.timeout_secs
        ));
    } else if exit_code == 0 {
        buf.push_str("\n✅ Script executed successfully!");
    } else {
        buf.push_str(&format!("\n❌ Script failed with exit code {exit_code}"));
    }
    buf
}

/// Render a launch that never produced a process result.
pub fn format_launch_failure(message: &str) -> String {
    format!("❌ {message}")
}

/// Exit code shown in the result header.
///
/// Timeouts report [`TIMEOUT_EXIT_CODE`]; signal deaths report `-1`.
pub fn reported_exit_code(outcome: &ExecutionOutcome) -> i32 {
    if outcome.timed_out {
        return TIMEOUT_EXIT_CODE;
    }
    outcome.exit_code.unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify;
    use crate::core::types::Verdict;

    fn outcome(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            timed_out: false,
            cancelled: false,
            timeout_secs: 60,
        }
    }

    #[test]
    fn clean_zero_exit_renders_success_line() {
        let text = format_execution_result(&outcome(Some(0), "opened", ""), "2026-01-01 10:00:00");
        assert_eq!(
            text,
            "=== EXECUTION RESULTS ===\nExit Code: 0\nTimestamp: 2026-01-01 10:00:00\n\nSTDOUT:\nopened\n\n✅ Script executed successfully!"
        );
        assert_eq!(classify(Some(0), &text), Verdict::Success);
    }

    #[test]
    fn stderr_section_is_included_and_fails_classification() {
        let text = format_execution_result(&outcome(Some(0), "", "deprecated"), "ts");
        assert!(text.contains("STDERR:\ndeprecated\n"));
        assert!(!text.contains("STDOUT:"));
        assert_eq!(classify(Some(0), &text), Verdict::Failure);
    }

    #[test]
    fn nonzero_exit_renders_failure_line() {
        let text = format_execution_result(&outcome(Some(2), "", ""), "ts");
        assert!(text.contains("Exit Code: 2\n"));
        assert!(text.ends_with("❌ Script failed with exit code 2"));
    }

    #[test]
    fn timeout_reports_timeout_code_and_message() {
        let mut timed_out = outcome(None, "partial", "");
        timed_out.timed_out = true;
        let text = format_execution_result(&timed_out, "ts");
        assert!(text.contains("Exit Code: 124\n"));
        assert!(text.ends_with("❌ Execution timed out after 60 seconds"));
    }

    #[test]
    fn cancelled_run_renders_stop_message() {
        let mut cancelled = outcome(None, "", "");
        cancelled.cancelled = true;
        let text = format_execution_result(&cancelled, "ts");
        assert!(text.contains("Exit Code: -1\n"));
        assert!(text.ends_with("❌ Execution stopped by request"));
    }

    #[test]
    fn launch_failure_is_prefixed() {
        assert_eq!(
            format_launch_failure("Script not found at /tmp/x.py"),
            "❌ Script not found at /tmp/x.py"
        );
    }
}
