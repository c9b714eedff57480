//! Initialization helpers for `.krya/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{KryaConfig, write_config};

/// All canonical paths within `.krya/` for a project root.
#[derive(Debug, Clone)]
pub struct KryaPaths {
    pub root: PathBuf,
    pub krya_dir: PathBuf,
    pub config_path: PathBuf,
    pub instruction_path: PathBuf,
    pub generated_dir: PathBuf,
    pub script_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_dir: PathBuf,
    pub jobs_path: PathBuf,
    pub env_path: PathBuf,
}

impl KryaPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let krya_dir = root.join(".krya");
        let generated_dir = krya_dir.join("generated");
        Self {
            root: root.clone(),
            krya_dir: krya_dir.clone(),
            config_path: krya_dir.join("config.toml"),
            instruction_path: krya_dir.join("instruction.md"),
            generated_dir: generated_dir.clone(),
            script_path: generated_dir.join("generated_output.py"),
            lock_path: generated_dir.join(".execution_in_progress"),
            log_dir: krya_dir.join("logs"),
            jobs_path: krya_dir.join("jobs.json"),
            env_path: root.join(".env"),
        }
    }

    /// Create the working directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir(&self.krya_dir)?;
        create_dir(&self.generated_dir)?;
        create_dir(&self.log_dir)?;
        Ok(())
    }
}

/// Options for `init_krya`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing config with defaults.
    pub force: bool,
}

/// Create `.krya/` scaffolding in `root`.
///
/// Fails if a config already exists unless `options.force` is set.
pub fn init_krya(root: &Path, options: &InitOptions) -> Result<KryaPaths> {
    let paths = KryaPaths::new(root);
    if paths.krya_dir.exists() && !paths.krya_dir.is_dir() {
        return Err(anyhow!("krya init: .krya exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "krya init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    paths.ensure_dirs()?;
    write_config(&paths.config_path, &KryaConfig::default())?;
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}
