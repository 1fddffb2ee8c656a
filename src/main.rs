//! stashd - Main entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use stashd::{logger, scheduler::ControlEvent, Config, Model, Scheduler};
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/stashd/stashd.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the backup pipeline once. With no -m, every model is performed.
    Perform {
        /// Model name(s) to perform
        #[arg(short, long)]
        model: Vec<String>,
    },
    /// Run the scheduler in the foreground
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)?;

    logger::init(&config.log, args.log_level.as_deref())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting stashd"
    );

    match args.command {
        Command::Perform { model } => perform(&config, &model).await,
        Command::Run => run(args.config, config).await,
    }
}

/// One-shot execution of the named models (or all of them).
async fn perform(config: &Config, names: &[String]) -> Result<()> {
    let selected: Vec<&str> = if names.is_empty() {
        config.models.keys().map(String::as_str).collect()
    } else {
        for name in names {
            if !config.models.contains_key(name) {
                anyhow::bail!("model {name} is not configured");
            }
        }
        names.iter().map(String::as_str).collect()
    };

    let mut failed = 0;
    for name in selected {
        let model = Model::new(
            name,
            config.models[name].clone(),
            &config.temp_dir,
            &config.state_dir,
        );
        if let Err(e) = model.perform().await {
            tracing::error!(model = %name, error = %e, "Backup failed");
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} model(s) failed");
    }
    Ok(())
}

/// Foreground daemon: scheduler plus a signal-fed control loop.
async fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let mut scheduler = Scheduler::new(config_path, config);
    scheduler.start().await?;

    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(watch_signals(tx));

    scheduler.run_control_loop(rx).await;
    tracing::info!("Exiting");
    Ok(())
}

/// Translate process signals into scheduler control events:
/// SIGHUP reloads, SIGINT/SIGTERM shut down.
async fn watch_signals(tx: mpsc::Sender<ControlEvent>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
                ControlEvent::Shutdown
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                ControlEvent::Shutdown
            }
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading");
                ControlEvent::Reload
            }
        };

        let stop = event == ControlEvent::Shutdown;
        if tx.send(event).await.is_err() || stop {
            break;
        }
    }
}
