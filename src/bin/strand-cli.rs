//! Strand CLI - Run and check sentence-tree programs
//!
//! Provides subcommands for running a program with the built-in scripts and
//! for validating a program without running it.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strand::runtime::{Core, CoreConfig, Service, Thread, ThreadConfig, ThreadError};
use strand::{Sentence, scripts};

#[derive(Parser)]
#[command(name = "strand")]
#[command(about = "Run JSON sentence-tree programs as logical threads", long_about = None)]
struct Cli {
    /// Core configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it finishes
    Run {
        /// Program file (JSON sentence tree)
        program: PathBuf,

        /// Direct label to start at
        #[arg(long)]
        entry_label: Option<String>,

        /// Initial variable as NAME=JSON (bare text is taken as a string)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
    },

    /// Validate a program and list its labels
    Check {
        /// Program file (JSON sentence tree)
        program: PathBuf,
    },
}

fn parse_var(raw: &str) -> std::result::Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn load_program(path: &Path) -> Result<Sentence> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read program: {:?}", path))?;
    let value: Value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse program: {:?}", path))?;
    Ok(Sentence::from_value(&value)?)
}

/// Keeps the final variables and the failure, if any, of the threads it sees.
#[derive(Default)]
struct Outcome {
    vars: Mutex<Option<Map<String, Value>>>,
    failure: Mutex<Option<String>>,
}

impl Service for Outcome {
    fn on_thread_will_destroy(&self, thread: &Thread) -> Result<()> {
        *self.vars.lock() = Some(thread.get_all_vars());
        Ok(())
    }

    fn on_thread_error(&self, _thread: &Thread, error: &ThreadError) -> Result<()> {
        *self.failure.lock() = Some(error.to_string());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CoreConfig::load(path)?,
        None => CoreConfig::default(),
    };
    let core = Core::new(config);
    scripts::register_builtin(&core)?;

    match cli.command {
        Commands::Run {
            program,
            entry_label,
            vars,
        } => {
            let outcome = Arc::new(Outcome::default());
            core.register_service(outcome.clone())?;
            core.initialize()?;

            let mut overrides = ThreadConfig::program(load_program(&program)?);
            for (name, value) in vars {
                overrides = overrides.with_var(name, value);
            }
            if let Some(label) = entry_label {
                overrides = overrides.with_entry_label(label);
            }

            let thread = core.create_thread(Some(overrides))?;
            thread.finished().await;
            core.destroy();

            let vars = outcome.vars.lock().take().unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&vars)?);
            if let Some(failure) = outcome.failure.lock().take() {
                bail!("thread {} failed: {}", thread.id(), failure);
            }
        }

        Commands::Check { program } => {
            let report = core.validate(&load_program(&program)?)?;
            println!("Program is valid");
            println!("Labels:");
            for label in &report.labels {
                println!("  {}", label);
            }
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
        }
    }

    Ok(())
}
