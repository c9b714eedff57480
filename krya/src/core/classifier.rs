//! Lexical success/failure classification of execution result text.
//!
//! This is pattern matching over the formatted output, not structural
//! parsing: a clean run whose output merely mentions `Error` is classified
//! as a failure.

use crate::core::types::Verdict;

/// Phrases of which at least one must appear for a run to count as successful.
pub const SUCCESS_MARKERS: [&str; 3] = [
    "✅ Script executed successfully!",
    "Exit Code: 0",
    "Script execution initiated via terminal",
];

/// Phrases whose presence downgrades any run to a failure.
pub const FAILURE_MARKERS: [&str; 5] = ["❌", "Exit Code: 1", "STDERR:", "TimeoutExpired", "Error"];

/// Classify a run from its exit code and formatted result text.
///
/// - A zero exit code is required.
/// - At least one of [`SUCCESS_MARKERS`] must be present.
/// - None of [`FAILURE_MARKERS`] may be present.
pub fn classify(exit_code: Option<i32>, text: &str) -> Verdict {
    if exit_code != Some(0) {
        return Verdict::Failure;
    }
    if has_success_marker(text) && !has_failure_marker(text) {
        Verdict::Success
    } else {
        Verdict::Failure
    }
}

fn has_success_marker(text: &str) -> bool {
    SUCCESS_MARKERS.iter().any(|marker| text.contains(marker))
}

fn has_failure_marker(text: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_marker_without_negatives_is_success() {
        let text = "=== EXECUTION RESULTS ===\nExit Code: 0\n\n✅ Script executed successfully!";
        assert_eq!(classify(Some(0), text), Verdict::Success);
    }

    #[test]
    fn any_negative_marker_wins_over_positive() {
        let text = "Exit Code: 0\nSTDERR:\nwarning\n✅ Script executed successfully!";
        assert_eq!(classify(Some(0), text), Verdict::Failure);

        let text = "Exit Code: 0\nValueError in helper\n✅ Script executed successfully!";
        assert_eq!(classify(Some(0), text), Verdict::Failure);
    }

    #[test]
    fn missing_positive_marker_is_failure() {
        assert_eq!(classify(Some(0), "done"), Verdict::Failure);
    }

    #[test]
    fn nonzero_exit_is_failure_even_with_clean_text() {
        let text = "✅ Script executed successfully!";
        assert_eq!(classify(Some(1), text), Verdict::Failure);
        assert_eq!(classify(None, text), Verdict::Failure);
    }

    #[test]
    fn terminal_launch_phrase_counts_as_positive() {
        let text = "Script execution initiated via terminal. Check terminal window for results.";
        assert_eq!(classify(Some(0), text), Verdict::Success);
    }
}
