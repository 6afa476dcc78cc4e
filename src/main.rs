use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod report;
mod sql;

use config::RunConfig;
use engine::{EventSink, TracingEventSink, Workflow};

/// Command-line load generator for SQL relational databases.
#[derive(Parser, Debug)]
#[command(author, version, about = "SQL load generator")]
struct Cli {
    /// Path to the workflow configuration file (TOML).
    #[arg(long = "run", value_name = "PATH")]
    run: PathBuf,

    /// Enable verbose logging (repeat for more detail).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "loadhound exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    tracing::info!("LoadHound started");

    let config = RunConfig::load(&cli.run).with_context(|| format!("loading config from {:?}", cli.run))?;
    let output = config.output.clone();

    let event_sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let root_cancel = CancellationToken::new();
    let signal_cancel = root_cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::warn!("shutdown signal received, cancelling in-flight scenarios");
        signal_cancel.cancel();
    });

    let workflow = Workflow::build(config, Arc::clone(&event_sink))
        .await
        .context("building workflow from configuration")?;

    let outcome = workflow.run(root_cancel).await;

    render_report(&outcome.report, &output)?;

    match outcome.error {
        Some(err) => {
            tracing::error!(error = %err, "workflow finished with an error");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}

fn render_report(report: &report::Report, output: &config::OutputSection) -> Result<()> {
    let to_console = output.report.as_ref().and_then(|r| r.to_console).unwrap_or(true);
    if to_console {
        println!("{}", report.to_console_table());
    }
    if let Some(path) = output.report.as_ref().and_then(|r| r.to_file.as_ref()) {
        report.write_to_file(path).context("writing report to file")?;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
    let mut sigquit = signal(SignalKind::quit()).expect("install SIGQUIT handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
        _ = sighup.recv() => {}
        _ = sigquit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
