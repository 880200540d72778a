use anyhow::Context;
use clap::{error::ErrorKind, Parser};
use mini_supervisor::alert::AlertDispatcher;
use mini_supervisor::logger::logs_tracing;
use mini_supervisor::parse::{parser, Cli, FileConfig, ProgramConfig};
use mini_supervisor::runtime::{CommandSpawner, ExitRecord, Supervisor, SupervisorState};
use mini_supervisor::signals;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    let _guard = match logs_tracing(&cli.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("[mini-supervisor] {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let to_file = cli.logging.log_dir.is_some();

    match run(cli).await {
        Ok(record) => {
            info!(exit_code = record.exit_code, retry = record.retry, "supervisor stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            if to_file {
                eprintln!("[mini-supervisor] {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitRecord> {
    let file = match &cli.config {
        Some(path) => parser(path)?,
        None => FileConfig::default(),
    };
    let config = ProgramConfig::resolve(cli.program, file)?;
    info!(
        program = %config.process_name,
        cmd = %config.cmd,
        autorestart = ?config.restart.autorestart,
        "starting supervisor"
    );

    let state = SupervisorState::shared();
    let _signals = signals::listen(state.clone()).context("failed to install signal handlers")?;

    let alerts = AlertDispatcher::from_config(&config)?;
    let mut supervisor = Supervisor::new(config, Arc::new(CommandSpawner), state);
    if let Some(alerts) = alerts {
        supervisor = supervisor.with_alerts(alerts);
    }
    Ok(supervisor.run().await?)
}
