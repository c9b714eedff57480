//! Scripted doubles for the generator and executor, plus a coordinator fixture.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::core::types::ExecutionOutcome;
use crate::io::config::{ConfigHandle, KryaConfig};
use crate::io::executor::{ExecError, ExecRequest, ExecutionReport, ScriptExecutor};
use crate::io::generator::{CodeGenerator, GenerateError, GenerationRequest};
use crate::io::init::KryaPaths;
use crate::io::job_store::{InMemoryJobStore, JobStore};

/// Code returned once a [`ScriptedGenerator`] runs out of scripted replies.
pub const DEFAULT_CODE: &str = "import pyautogui\nimport time\n\npyautogui.press('enter')\n";

/// Generator that replays canned replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
    /// Calls from this 1-indexed ordinal on never return.
    hang_from: Option<usize>,
}

impl ScriptedGenerator {
    /// `Err(message)` replies surface as an API error.
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    /// Like [`ScriptedGenerator::new`], but call `call` and later ones hang
    /// until the caller gives up on them.
    pub fn hanging_from(call: usize, replies: Vec<Result<String, String>>) -> Self {
        Self {
            hang_from: Some(call),
            ..Self::new(replies)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once `count` generation calls have begun.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if self.hang_from.is_some_and(|from| call >= from) {
            std::future::pending::<()>().await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(Ok(code)) => Ok(code),
            Some(Err(message)) => Err(GenerateError::Api {
                status: 500,
                message,
            }),
            None => Ok(DEFAULT_CODE.to_string()),
        }
    }
}

/// One scripted execution.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Report a timeout after the configured limit.
    Timeout,
    /// Hold the "process" until the job is cancelled.
    BlockUntilCancelled,
    /// Fail the launch the way a missing script does.
    ScriptMissing,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self::Exit {
            code: 0,
            stdout: "Calculator opened\n".to_string(),
            stderr: String::new(),
        }
    }

    pub fn failure() -> Self {
        Self::Exit {
            code: 1,
            stdout: String::new(),
            stderr: "Traceback (most recent call last):\nNameError: name 'pyautogui' is not defined\n"
                .to_string(),
        }
    }
}

/// Executor that replays scripted runs without spawning anything.
///
/// Once the script is exhausted every further run repeats `fallback`.
#[derive(Debug)]
pub struct ScriptedExecutor {
    runs: Mutex<VecDeque<ScriptedRun>>,
    fallback: ScriptedRun,
    requests: Mutex<Vec<ExecRequest>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(runs: Vec<ScriptedRun>, fallback: ScriptedRun) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(run: ScriptedRun) -> Self {
        Self::new(Vec::new(), run)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves once `count` executions have begun.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ScriptExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let run = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let mut outcome = ExecutionOutcome {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            cancelled: false,
            timeout_secs: 60,
        };
        match run {
            ScriptedRun::Exit {
                code,
                stdout,
                stderr,
            } => {
                outcome.exit_code = Some(code);
                outcome.stdout = stdout;
                outcome.stderr = stderr;
            }
            ScriptedRun::Timeout => outcome.timed_out = true,
            ScriptedRun::BlockUntilCancelled => {
                cancel.cancelled().await;
                outcome.cancelled = true;
            }
            ScriptedRun::ScriptMissing => {
                return Err(ExecError::ScriptNotFound {
                    path: request.script_path.clone(),
                });
            }
        }
        Ok(ExecutionReport {
            outcome,
            log_path: None,
        })
    }
}

/// Default config for tests: a credential is present so submissions pass.
pub fn test_config() -> KryaConfig {
    let mut cfg = KryaConfig::default();
    cfg.generation.api_key = Some("test-key-1234".to_string());
    cfg
}

/// A coordinator rooted in a temp directory with scripted collaborators.
pub struct CoordinatorFixture {
    pub temp: tempfile::TempDir,
    pub paths: KryaPaths,
    pub config: ConfigHandle,
    pub coordinator: Arc<Coordinator>,
    pub generator: Arc<ScriptedGenerator>,
    pub executor: Arc<ScriptedExecutor>,
}

impl CoordinatorFixture {
    pub fn new(generator: ScriptedGenerator, executor: ScriptedExecutor) -> Self {
        Self::with_config(test_config(), generator, executor)
    }

    pub fn with_config(
        cfg: KryaConfig,
        generator: ScriptedGenerator,
        executor: ScriptedExecutor,
    ) -> Self {
        Self::with_store(cfg, Arc::new(InMemoryJobStore::new()), generator, executor)
    }

    pub fn with_store(
        cfg: KryaConfig,
        store: Arc<dyn JobStore>,
        generator: ScriptedGenerator,
        executor: ScriptedExecutor,
    ) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = KryaPaths::new(temp.path());
        paths.ensure_dirs().expect("ensure dirs");
        let config = ConfigHandle::in_memory(cfg);
        let generator = Arc::new(generator);
        let executor = Arc::new(executor);
        let coordinator = Coordinator::new(
            config.clone(),
            paths.clone(),
            store,
            generator.clone(),
            executor.clone(),
        );
        Self {
            temp,
            paths,
            config,
            coordinator,
            generator,
            executor,
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.paths.script_path.clone()
    }
}
