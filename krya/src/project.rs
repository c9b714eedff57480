//! Wiring a project directory into a ready coordinator.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::io::config::{ConfigHandle, load_config};
use crate::io::executor::InterpreterExecutor;
use crate::io::generator::GeminiGenerator;
use crate::io::init::KryaPaths;
use crate::io::job_store::{FileJobStore, InMemoryJobStore, JobStore};

/// A project root with its loaded configuration.
#[derive(Debug, Clone)]
pub struct Project {
    pub paths: KryaPaths,
    pub config: ConfigHandle,
}

impl Project {
    /// Load `<root>/.env` (if present) and `<root>/.krya/config.toml`.
    ///
    /// A missing config yields defaults; updates are written back to it.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = KryaPaths::new(root);
        if paths.env_path.is_file() {
            dotenvy::from_path(&paths.env_path)
                .with_context(|| format!("load {}", paths.env_path.display()))?;
            debug!(path = %paths.env_path.display(), "loaded environment file");
        }
        let cfg = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        let config = ConfigHandle::persistent(cfg, paths.config_path.clone());
        Ok(Self { paths, config })
    }

    /// Build the production coordinator: hosted model generator, interpreter
    /// executor, and the job store selected by `jobs.persist`.
    pub fn coordinator(&self) -> Result<Arc<Coordinator>> {
        self.paths.ensure_dirs()?;
        let cfg = self.config.snapshot();
        let store: Arc<dyn JobStore> = if cfg.jobs.persist {
            Arc::new(FileJobStore::open(&self.paths.jobs_path)?)
        } else {
            Arc::new(InMemoryJobStore::new())
        };
        let generator = GeminiGenerator::new(self.config.clone())
            .with_instruction_path(&self.paths.instruction_path);
        let executor = InterpreterExecutor::new(
            self.config.clone(),
            &self.paths.lock_path,
            &self.paths.log_dir,
        );
        let coordinator = Coordinator::new(
            self.config.clone(),
            self.paths.clone(),
            store,
            Arc::new(generator),
            Arc::new(executor),
        );
        coordinator.startup()?;
        info!(
            root = %self.paths.root.display(),
            model = %cfg.generation.model_name,
            persist = cfg.jobs.persist,
            "coordinator ready"
        );
        Ok(coordinator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn open_without_config_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = Project::open(temp.path()).expect("open");
        assert_eq!(project.config.snapshot().jobs.default_max_attempts, 3);
    }

    #[test]
    fn open_rejects_invalid_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join(".krya")).expect("mkdir");
        fs::write(
            temp.path().join(".krya").join("config.toml"),
            "[generation]\ntemperature = 5.0\n",
        )
        .expect("write");
        assert!(Project::open(temp.path()).is_err());
    }

    #[tokio::test]
    async fn coordinator_creates_working_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = Project::open(temp.path()).expect("open");
        let coordinator = project.coordinator().expect("coordinator");
        assert!(project.paths.generated_dir.is_dir());
        assert!(project.paths.log_dir.is_dir());
        assert!(coordinator.jobs().expect("jobs").is_empty());
    }
}
