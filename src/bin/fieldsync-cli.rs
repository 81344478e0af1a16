//! FieldSync CLI - Local automation tool
//!
//! Provides command-line access to:
//! - Sync and ingestion triggers
//! - Outbox/media queue status
//! - Backup and integrity checks
//!
//! Usage:
//!   fieldsync-cli status
//!   fieldsync-cli sync
//!   fieldsync-cli ingest --context <id>
//!   fieldsync-cli backup [--output <path>]
//!   fieldsync-cli integrity

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use fieldsync::config::EngineConfig;
use fieldsync::sync::SyncOutcome;
use fieldsync::SyncEngine;

/// CLI command structure
#[derive(Debug)]
enum Command {
    Status,
    Sync,
    Ingest { context_id: i64 },
    Backup { output: Option<PathBuf> },
    Integrity,
    Help,
    Version,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    match parse_args(&args) {
        Ok(cmd) => match run_command(cmd) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => Ok(Command::Help),
        "version" | "--version" | "-V" => Ok(Command::Version),

        "status" => Ok(Command::Status),
        "sync" => Ok(Command::Sync),

        "ingest" => {
            let context_id = args
                .get(2)
                .filter(|a| *a == "--context" || *a == "-c")
                .and_then(|_| args.get(3))
                .ok_or("ingest requires --context <id>")?
                .parse::<i64>()
                .map_err(|_| "context id must be an integer".to_string())?;
            Ok(Command::Ingest { context_id })
        }

        "backup" => {
            let output = args
                .get(2)
                .filter(|a| *a == "--output" || *a == "-o")
                .and_then(|_| args.get(3))
                .map(PathBuf::from);
            Ok(Command::Backup { output })
        }

        "integrity" => Ok(Command::Integrity),

        other => Err(format!("unknown command: {}", other)),
    }
}

fn run_command(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            println!("fieldsync-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        cmd => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_engine_command(cmd))
        }
    }
}

async fn run_engine_command(cmd: Command) -> anyhow::Result<()> {
    let engine = SyncEngine::initialize(EngineConfig::load_or_default()).await?;

    match cmd {
        Command::Status => {
            let (logs, media) = engine.pending_counts().await?;
            println!("data dir:        {}", engine.config().data_dir.display());
            println!("queue depth:     {}", engine.local().queue_depth());
            println!("pending outbox:  {}", logs);
            println!("pending media:   {}", media);
        }

        Command::Sync => match engine.dispatcher().sync_to_server().await? {
            SyncOutcome::Completed(report) => {
                println!(
                    "replayed {} ({} failed), uploaded {} media ({} failed)",
                    report.replayed,
                    report.replay_failures,
                    report.media_uploaded,
                    report.media_failures
                );
            }
            SyncOutcome::AlreadyRunning => {
                println!("a sync pass is already running");
            }
        },

        Command::Ingest { context_id } => {
            let report = engine.ingest_then_sync(context_id).await?;
            println!(
                "ingested {} rows across {} entities in {} batches",
                report.rows, report.entities, report.batches
            );
        }

        Command::Backup { output } => {
            let path = engine.local().backup(output).await?;
            println!("backup written to {}", path.display());
        }

        Command::Integrity => {
            engine.local().check_integrity().await?;
            println!("integrity check: ok");
        }

        Command::Help | Command::Version => unreachable!("handled before engine startup"),
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"fieldsync-cli - FieldSync local automation tool

USAGE:
    fieldsync-cli <command> [options]

COMMANDS:
    status                   Show queue depth and pending outbox/media counts
    sync                     Replay the outbox and upload pending media
    ingest --context <id>    Refresh local data from the remote source, then sync
    backup [--output <path>] Checkpoint the WAL and copy the database aside
    integrity                Run a database integrity check
    help                     Show this help
    version                  Show version

ENVIRONMENT:
    FIELDSYNC_CONFIG         Path to a JSON config file
    RUST_LOG                 Log filter (e.g. fieldsync=debug)"#
    );
}
