//! Krya configuration stored under `.krya/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_KEY_MASK: &str = "••••••••";

/// Krya configuration (TOML).
///
/// Missing fields default to the values the hosted model was tuned with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KryaConfig {
    pub generation: GenerationConfig,
    pub execution: ExecutionConfig,
    pub jobs: JobsConfig,
}

/// Parameters for the code generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Credential for the model endpoint. Falls back to `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    pub base_url: String,
    pub model_name: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
    pub request_timeout_secs: u64,
    /// Feedback text beyond this many bytes is truncated before prompting.
    pub prompt_budget_bytes: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model_name: "gemini-2.5-flash".to_string(),
            temperature: 1.55,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
            response_mime_type: "text/plain".to_string(),
            request_timeout_secs: 120,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl GenerationConfig {
    /// The credential to use: explicit config value, else the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().map(str::trim)
            && !key.is_empty()
        {
            return Some(key.to_string());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// How generated scripts are launched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Interpreter used to run the generated script.
    pub interpreter: String,
    /// Per-attempt wall-clock limit for the child process.
    pub timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL when tearing a process group down.
    pub kill_grace_ms: u64,
    /// Hold the execution slot and lock marker while the script runs.
    pub guarded: bool,
    /// Age after which a lock marker is treated as abandoned.
    pub lock_stale_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 60,
            kill_grace_ms: 2000,
            guarded: true,
            lock_stale_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

/// Submission and bookkeeping policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobsConfig {
    pub default_max_attempts: u32,
    pub max_attempts_limit: u32,
    /// Identical prompts within this window are rejected.
    pub prompt_cooldown_secs: u64,
    /// A running job with the same prompt younger than this is reused.
    pub duplicate_window_secs: u64,
    /// Capacity of the rolling job log.
    pub log_window: usize,
    /// Log entries included in status responses.
    pub status_log_count: usize,
    /// Keep jobs in `.krya/jobs.json` across restarts.
    pub persist: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 3,
            max_attempts_limit: 10,
            prompt_cooldown_secs: 5,
            duplicate_window_secs: 60,
            log_window: 100,
            status_log_count: 20,
            persist: false,
        }
    }
}

impl KryaConfig {
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.model_name.trim().is_empty() {
            return Err(anyhow!("generation.model_name must be non-empty"));
        }
        if generation.base_url.trim().is_empty() {
            return Err(anyhow!("generation.base_url must be non-empty"));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(anyhow!("generation.temperature must be within 0..=2"));
        }
        if !(0.0..=1.0).contains(&generation.top_p) {
            return Err(anyhow!("generation.top_p must be within 0..=1"));
        }
        if generation.top_k == 0 {
            return Err(anyhow!("generation.top_k must be > 0"));
        }
        if generation.max_output_tokens == 0 {
            return Err(anyhow!("generation.max_output_tokens must be > 0"));
        }
        if generation.request_timeout_secs == 0 {
            return Err(anyhow!("generation.request_timeout_secs must be > 0"));
        }

        let execution = &self.execution;
        if execution.interpreter.trim().is_empty() {
            return Err(anyhow!("execution.interpreter must be non-empty"));
        }
        if execution.timeout_secs == 0 {
            return Err(anyhow!("execution.timeout_secs must be > 0"));
        }
        if execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if execution.lock_stale_secs == 0 {
            return Err(anyhow!("execution.lock_stale_secs must be > 0"));
        }

        let jobs = &self.jobs;
        if jobs.max_attempts_limit == 0 {
            return Err(anyhow!("jobs.max_attempts_limit must be > 0"));
        }
        if jobs.default_max_attempts == 0 || jobs.default_max_attempts > jobs.max_attempts_limit {
            return Err(anyhow!(
                "jobs.default_max_attempts must be within 1..={}",
                jobs.max_attempts_limit
            ));
        }
        if jobs.log_window == 0 {
            return Err(anyhow!("jobs.log_window must be > 0"));
        }
        Ok(())
    }

    /// Display form with the credential masked.
    pub fn summary(&self) -> ConfigSummary {
        let resolved = self.generation.resolve_api_key();
        ConfigSummary {
            api_key_set: resolved.is_some(),
            api_key: resolved.as_deref().map(mask_api_key).unwrap_or_default(),
            model_name: self.generation.model_name.clone(),
            temperature: self.generation.temperature,
            max_output_tokens: self.generation.max_output_tokens,
            top_p: self.generation.top_p,
            top_k: self.generation.top_k,
        }
    }
}

/// Masked, flat view of the user-editable settings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigSummary {
    pub api_key: String,
    pub api_key_set: bool,
    pub model_name: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub top_p: f64,
    pub top_k: u32,
}

/// Partial update of the user-editable settings; `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigUpdate {
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
}

impl ConfigUpdate {
    pub fn apply(&self, cfg: &mut KryaConfig) {
        let generation = &mut cfg.generation;
        if let Some(key) = &self.api_key {
            generation.api_key = Some(key.clone());
        }
        if let Some(model) = &self.model_name {
            generation.model_name = model.clone();
        }
        if let Some(temperature) = self.temperature {
            generation.temperature = temperature;
        }
        if let Some(tokens) = self.max_output_tokens {
            generation.max_output_tokens = tokens;
        }
        if let Some(top_p) = self.top_p {
            generation.top_p = top_p;
        }
        if let Some(top_k) = self.top_k {
            generation.top_k = top_k;
        }
    }
}

/// `••••••••` followed by the last four characters of longer keys.
pub fn mask_api_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{API_KEY_MASK}{tail}")
    } else {
        API_KEY_MASK.to_string()
    }
}

/// Shared, live-updatable configuration.
///
/// Readers take a snapshot per use, so an update applies to the next
/// generation call without restarting anything.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<KryaConfig>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    /// A handle that persists updates to `path`.
    pub fn persistent(cfg: KryaConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
            path: Some(path.into()),
        }
    }

    /// A handle that only lives in memory.
    pub fn in_memory(cfg: KryaConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
            path: None,
        }
    }

    pub fn snapshot(&self) -> KryaConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validate, persist (when backed by a file) and publish an update.
    pub fn update(&self, update: &ConfigUpdate) -> Result<KryaConfig> {
        let mut next = self.snapshot();
        update.apply(&mut next);
        next.validate()?;
        if let Some(path) = &self.path {
            write_config(path, &next)?;
        }
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        info!(model = %next.generation.model_name, "configuration updated");
        Ok(next)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `KryaConfig::default()`.
pub fn load_config(path: &Path) -> Result<KryaConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = KryaConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: KryaConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &KryaConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
