//! Prompt rendering for code generation requests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("feedback", FEEDBACK_TEMPLATE)
            .expect("feedback template should be valid");
        Self { env }
    }

    fn render_system(&self) -> Result<String> {
        let template = self.env.get_template("system")?;
        Ok(template.render(context! { platform => platform_name() })?)
    }

    fn render_feedback(&self, prompt: &str, feedback: &str) -> Result<String> {
        let template = self.env.get_template("feedback")?;
        Ok(template.render(context! {
            prompt => prompt.trim(),
            feedback => feedback.trim(),
            platform => platform_name(),
        })?)
    }
}

fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macOS",
        "windows" => "Windows",
        "linux" => "Linux",
        other => other,
    }
}

/// The two halves of a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Builds generation prompts, keeping feedback within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    instruction_path: Option<PathBuf>,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            instruction_path: None,
        }
    }

    /// Use the file at `path`, when it exists, as the system instruction.
    pub fn with_instruction_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instruction_path = Some(path.into());
        self
    }

    /// Render the prompt for one attempt.
    ///
    /// The first attempt sends the raw instruction; later attempts wrap it
    /// together with the previous execution result.
    pub fn build(&self, prompt: &str, feedback: Option<&str>) -> Result<RenderedPrompt> {
        let engine = PromptEngine::new();
        let system = match self.load_instruction_override()? {
            Some(text) => text,
            None => engine.render_system()?,
        };
        let user = match feedback.map(str::trim).filter(|f| !f.is_empty()) {
            Some(feedback) => {
                let bounded = truncate_to_budget(feedback, self.budget_bytes);
                engine.render_feedback(prompt, &bounded)?
            }
            None => prompt.trim().to_string(),
        };
        Ok(RenderedPrompt { system, user })
    }

    fn load_instruction_override(&self) -> Result<Option<String>> {
        let Some(path) = &self.instruction_path else {
            return Ok(None);
        };
        read_optional(path)
            .map(|text| text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()))
    }
}

/// Truncate `text` to at most `budget` bytes, marking the cut.
fn truncate_to_budget(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let keep = budget.saturating_sub(TRUNCATION_MARKER.len());
    let mut cut = keep.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    debug!(before_len = text.len(), after_len = cut, "truncated feedback for budget");
    let mut out = text[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read instruction {}", path.display()))?;
    Ok(Some(contents))
}
