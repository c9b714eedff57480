//! `krya` command line: scaffold a project, run one automation job in the
//! foreground, and inspect or change the generation settings.

use std::path::PathBuf;
use std::pin::pin;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use krya::core::types::{JobStatus, LogEntry};
use krya::exit_codes;
use krya::io::config::ConfigUpdate;
use krya::io::init::{InitOptions, init_krya};
use krya::logging;
use krya::project::Project;

#[derive(Parser)]
#[command(
    name = "krya",
    version,
    about = "Generate, run and retry desktop automation scripts"
)]
struct Cli {
    /// Project directory (contains .krya/).
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.krya/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one job in the foreground; Ctrl-C stops it.
    Run {
        /// What the script should do, in plain language.
        prompt: String,
        /// Attempt budget (defaults to `jobs.default_max_attempts`).
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Show or change generation settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the settings with the API key masked.
    Show,
    /// Change the given settings and save them.
    Set {
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model_name: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        max_output_tokens: Option<u32>,
        #[arg(long)]
        top_p: Option<f64>,
        #[arg(long)]
        top_k: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    logging::init("warn");
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => {
            let paths = init_krya(&cli.project_dir, &InitOptions { force })?;
            println!("initialized {}", paths.config_path.display());
            Ok(exit_codes::OK)
        }
        Command::Run {
            prompt,
            max_attempts,
        } => cmd_run(&cli.project_dir, &prompt, max_attempts).await,
        Command::Config { command } => cmd_config(&cli.project_dir, command),
    }
}

async fn cmd_run(root: &std::path::Path, prompt: &str, max_attempts: Option<u32>) -> Result<i32> {
    let project = Project::open(root)?;
    let coordinator = project.coordinator()?;
    let (_, mut entries) = coordinator.log().subscribe(0);

    let submission = coordinator.submit(prompt, max_attempts)?;
    let job_id = submission.job_id;

    let mut wait = pin!(coordinator.wait(&job_id));
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut stop_sent = false;
    let job = loop {
        tokio::select! {
            job = &mut wait => break job?,
            entry = entries.recv() => match entry {
                Ok(entry) if entry.job_id == job_id => print_entry(&entry),
                Ok(_) | Err(RecvError::Lagged(_) | RecvError::Closed) => {}
            },
            signal = &mut ctrl_c, if !stop_sent => {
                signal.context("listen for Ctrl-C")?;
                stop_sent = true;
                coordinator.stop(&job_id)?;
            }
        }
    };
    while let Ok(entry) = entries.try_recv() {
        if entry.job_id == job_id {
            print_entry(&entry);
        }
    }
    coordinator.shutdown().await?;

    let job = job.context("job disappeared from the store")?;
    if let Some(result) = &job.last_result {
        println!("\n{result}");
    }
    println!("\njob {} {}", job.id, job.status);
    Ok(match job.status {
        JobStatus::Completed => exit_codes::OK,
        JobStatus::Failed => exit_codes::FAILED,
        JobStatus::Stopped => exit_codes::STOPPED,
        JobStatus::Pending | JobStatus::Running => exit_codes::INVALID,
    })
}

fn print_entry(entry: &LogEntry) {
    println!(
        "[{}] {:<7} {}",
        entry.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
        entry.level.as_str(),
        entry.message
    );
}

fn cmd_config(root: &std::path::Path, command: ConfigCommand) -> Result<i32> {
    let project = Project::open(root)?;
    let cfg = match command {
        ConfigCommand::Show => project.config.snapshot(),
        ConfigCommand::Set {
            api_key,
            model_name,
            temperature,
            max_output_tokens,
            top_p,
            top_k,
        } => project.config.update(&ConfigUpdate {
            api_key,
            model_name,
            temperature,
            max_output_tokens,
            top_p,
            top_k,
        })?,
    };
    let rendered = serde_json::to_string_pretty(&cfg.summary()).context("serialize config")?;
    println!("{rendered}");
    Ok(exit_codes::OK)
}
