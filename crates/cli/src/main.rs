//! Trace-driven memory scheduler CLI.
//!
//! This binary loads a JSON run document, builds the reference engine and
//! the quantum scheduler, runs the simulation to completion, and writes the
//! structured run log. The run document has two sections:
//!
//! ```json
//! {
//!     "run":    { "cores": 2, "trace_files": ["a.txt", "b.txt"], "schedule": [[0, 1]] },
//!     "engine": { "page_size": 1024, "total_pages": 4194304, "cache_pages": 1048576 }
//! }
//! ```
//!
//! `run` is the scheduler configuration (`RunConfig`); `engine` parameterizes
//! the built-in fixed-latency reference engine and may be omitted entirely.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::process;

use memsched_core::RunConfig;
use memsched_core::Scheduler;
use memsched_core::engine::{SimpleEngine, SimpleEngineConfig};

#[derive(Parser, Debug)]
#[command(
    name = "memsched",
    author,
    version,
    about = "Trace-driven multi-core memory-access scheduler",
    long_about = "Replay per-thread memory traces under a quantum-based core schedule against a\nhybrid memory engine, with scheduler-driven prefetching.\n\nExamples:\n  memsched run -c runs/two_thread.json\n  memsched run -c runs/trash.json --log out/trash.log"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulation from a JSON run document.
    Run {
        /// Run document (scheduler + engine configuration).
        #[arg(short, long)]
        config: String,

        /// Run-log path; stdout when omitted.
        #[arg(long)]
        log: Option<String>,
    },
}

/// The on-disk run document: scheduler section plus optional engine section.
#[derive(Debug, Deserialize)]
struct RunDocument {
    run: RunConfig,
    #[serde(default)]
    engine: SimpleEngineConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, log } => cmd_run(&config, log.as_deref()),
    }
}

/// Loads the run document, builds engine + scheduler, and runs to completion.
fn cmd_run(config_path: &str, log_path: Option<&str>) {
    let doc = match load_document(config_path) {
        Ok(doc) => doc,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };

    tracing::info!(
        cores = doc.run.cores,
        threads = doc.run.trace_files.len(),
        quantum_cycles = doc.run.quantum_cycles,
        prefetching = doc.run.prefetching,
        "configuration loaded"
    );

    let log: Box<dyn Write> = match log_path {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => {
                eprintln!("error: cannot create log file {path}: {err}");
                process::exit(1);
            }
        },
        None => Box::new(io::stdout()),
    };

    let engine = Box::new(SimpleEngine::new(doc.engine));
    let mut scheduler = match Scheduler::new(doc.run, engine, log) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };

    match scheduler.run() {
        Ok(summary) => {
            tracing::info!(
                cycles = summary.cycles,
                quanta = summary.quanta,
                completed = summary.completed,
                "run finished"
            );
            if let Some(path) = log_path {
                println!("run log written to {path}");
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

fn load_document(path: &str) -> Result<RunDocument, String> {
    let body = fs::read_to_string(path)
        .map_err(|err| format!("cannot read run document {path}: {err}"))?;
    serde_json::from_str(&body).map_err(|err| format!("malformed run document {path}: {err}"))
}
