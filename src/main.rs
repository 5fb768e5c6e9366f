//! procusage - version 0.1.0
//!
//! Thin CLI over the sampling engine: wires targets, interval and sink
//! from the command line, then waits for the engine to stop (Ctrl-C,
//! SIGTERM, fatal tick failure, or exit of a spawned child command).

mod cli;

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::process::Stdio;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, Level};

use cli::{parse_target, Args, LogLevel};
use procusage::{Engine, EngineConfig, EngineEvent};

/// Initializes tracing logging with the configured level, on stderr so
/// records on stdout stay clean.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    if args.targets.is_empty() && args.execute.is_none() {
        anyhow::bail!("nothing to watch: pass at least one PID or process name, or use --execute");
    }

    let config = EngineConfig {
        poll_interval_ms: args.interval,
        isolate_failures: args.isolate,
        ..Default::default()
    };
    let engine = Engine::new(config);

    if args.outfile == "-" {
        engine.set_sink(Box::new(std::io::stdout()));
    } else {
        let file = File::create(&args.outfile)
            .with_context(|| format!("could not create outfile {}", args.outfile))?;
        engine.set_sink(Box::new(file));
    }

    let mut events = engine.subscribe();

    if let Some(cmdline) = &args.execute {
        let mut parts = cmdline.split_whitespace();
        let program = parts.next().context("--execute needs a non-empty command")?;
        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("could not spawn {}", program))?;
        let pid = child.id().context("spawned child has no pid")?;
        info!(pid, command = %cmdline, "monitoring spawned command");
        engine.watch(pid)?;

        let engine = engine.clone();
        tokio::spawn(async move {
            let _ = child.wait().await;
            info!("monitored command exited, stopping");
            engine.stop();
        });
    }

    for raw in &args.targets {
        engine.watch(parse_target(raw))?;
    }

    // Stop on Ctrl-C or SIGTERM.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("Failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, stopping"),
                _ = terminate => info!("received SIGTERM, stopping"),
            }
            engine.stop();
        });
    }

    // Records flow to the sink inside the engine; the event stream is
    // only drained here to learn when and why the loop ended.
    loop {
        match events.recv().await {
            Ok(EngineEvent::Entry { .. }) => {}
            Ok(EngineEvent::Stopped { error: None }) => break,
            Ok(EngineEvent::Stopped { error: Some(e) }) => {
                anyhow::bail!("monitoring stopped: {}", e)
            }
            Err(RecvError::Lagged(skipped)) => {
                info!(skipped, "event subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    Ok(())
}
