//! stasis agent binary
//!
//! Connects to the configured controller, then reads console commands from
//! stdin until `/quit` or Ctrl-C.

use std::fs;

use clap::Parser;
use stasis_agent::{
    Agent, Args, CliError, ConsoleCommand, LogFormat, ShellRunner, SystemEnv, WsTransport,
    commands,
};
use stasis_core::SessionConfig;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    // Pin the TLS provider for wss:// addresses
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = args.agent_config()?;
    let file_contents = match &args.packages_file {
        Some(path) => Some(
            fs::read_to_string(path)
                .map_err(|source| CliError::PackageList { path: path.clone(), source })?,
        ),
        None => None,
    };
    let session = SessionConfig::from_package_list(
        &args.server_url,
        &args.key,
        &args.package_list(file_contents.as_deref()),
    )?;
    tracing::info!(url = session.url(), packages = session.targets().len(), "starting agent");

    let (agent, task) = Agent::spawn(SystemEnv, WsTransport::new(), ShellRunner, config);
    let mut status = agent.subscribe();
    agent.connect_with(session.clone()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            },
            update = status.recv() => match update {
                Ok(update) => tracing::info!("{update}"),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "status updates dropped");
                },
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if console_open => {
                match line.map_err(CliError::Console)? {
                    Some(line) => {
                        if !handle_line(&agent, &session, &args.key, &line).await {
                            break;
                        }
                    },
                    None => {
                        tracing::debug!("console input closed");
                        console_open = false;
                    },
                }
            },
        }
    }

    agent.destroy().await;
    drop(agent);
    if let Err(err) = task.await {
        tracing::error!(error = %err, "agent task failed");
    }
    Ok(())
}

/// Run one console command. Returns `false` when the console should exit.
async fn handle_line(agent: &Agent, session: &SessionConfig, key: &str, line: &str) -> bool {
    match commands::parse(line) {
        ConsoleCommand::Action { action, key: presented } => {
            agent.execute_action(action, presented.as_deref().unwrap_or(key)).await;
        },
        ConsoleCommand::Connect => {
            if let Err(err) = agent.connect_with(session.clone()).await {
                tracing::warn!(error = %err, "connect failed");
            }
        },
        ConsoleCommand::Disconnect => agent.disconnect().await,
        ConsoleCommand::Status => {
            tracing::info!(state = ?agent.state(), connected = agent.is_connected(), "status");
        },
        ConsoleCommand::Quit => return false,
        ConsoleCommand::Empty => {},
        ConsoleCommand::Unknown { input } => tracing::warn!(input, "unknown command"),
        ConsoleCommand::InvalidArgs { error, .. } => tracing::warn!("{error}"),
    }
    true
}

fn init_logging(format: LogFormat) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| CliError::Logging(err.to_string()))
}
