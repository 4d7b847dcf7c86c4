// bottle relay binary

use anyhow::{Context, Result};
use bottle::relay::{execute_command, BottleCli, BottleCommand};
use clap::Parser;
use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = BottleCli::parse();

    if let Err(e) = init_logging(&cli.command) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    // Execute command
    if let Err(e) = execute_command(cli.command).await {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Console output in the foreground, a log file in the background
///
/// The server also writes the log file in the foreground when asked to.
/// Client commands only log warnings to stderr.
fn init_logging(command: &BottleCommand) -> Result<()> {
    let BottleCommand::Serve(args) = command else {
        tracing_subscriber::registry()
            .with(env_filter("bottle=warn"))
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(());
    };

    let foreground = std::io::stdout().is_terminal();
    let log_path = args.log_path();

    let console_layer = foreground.then(|| fmt::layer().with_writer(std::io::stderr));
    let file_layer = if !foreground || args.log_to_file {
        let file = open_log_file(&log_path)?;
        Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter("bottle=info,warn"))
        .with(console_layer)
        .with(file_layer)
        .init();

    if !foreground || args.log_to_file {
        tracing::info!("Outputting to logfile {:?}", log_path);
    }

    Ok(())
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}
