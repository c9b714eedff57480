//! Post-processing of raw model responses into runnable script source.

use std::sync::LazyLock;

use regex::Regex;

const PYAUTOGUI_PRELUDE: &str = "import pyautogui\nimport time\n\n";

/// Strip Markdown code fences and inject the automation import if it is used
/// but missing.
pub fn clean_code_response(raw: &str) -> String {
    let mut code = raw.trim();
    if let Some(rest) = code.strip_prefix("```python") {
        code = rest.trim();
    } else if let Some(rest) = code.strip_prefix("```") {
        code = rest.trim();
    }
    if let Some(rest) = code.strip_suffix("```") {
        code = rest.trim();
    }

    if !code.contains("import pyautogui") && code.contains("pyautogui.") {
        format!("{PYAUTOGUI_PRELUDE}{code}")
    } else {
        code.to_string()
    }
}

/// True if the script drives the desktop or waits on a human.
pub fn uses_interactive_apis(code: &str) -> bool {
    static INTERACTIVE_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"input\s*\(",
            r"pyautogui\.",
            r"keyboard\.",
            r"mouse\.",
            r"cv2\.",
            r"webbrowser\.",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("interactive pattern should be valid"))
        .collect()
    });

    INTERACTIVE_RE.iter().any(|re| re.is_match(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_python_fence() {
        let raw = "```python\nimport os\nprint(os.getcwd())\n```";
        assert_eq!(clean_code_response(raw), "import os\nprint(os.getcwd())");
    }

    #[test]
    fn strips_bare_fence_with_surrounding_whitespace() {
        let raw = "\n```\nprint('hi')\n```\n";
        assert_eq!(clean_code_response(raw), "print('hi')");
    }

    #[test]
    fn leaves_unfenced_code_alone() {
        assert_eq!(clean_code_response("print(1)"), "print(1)");
    }

    #[test]
    fn injects_missing_pyautogui_import() {
        let cleaned = clean_code_response("```python\npyautogui.press('enter')\n```");
        assert_eq!(
            cleaned,
            "import pyautogui\nimport time\n\npyautogui.press('enter')"
        );
    }

    #[test]
    fn keeps_existing_pyautogui_import() {
        let raw = "import pyautogui\npyautogui.press('enter')";
        assert_eq!(clean_code_response(raw), raw);
    }

    #[test]
    fn detects_interactive_scripts() {
        assert!(uses_interactive_apis("pyautogui.hotkey('command', 'space')"));
        assert!(uses_interactive_apis("name = input ('name?')"));
        assert!(uses_interactive_apis("webbrowser.open('https://example.com')"));
        assert!(!uses_interactive_apis("print(sum(range(10)))"));
    }
}
