use anyhow::{Context, Result};
use clap::Parser;
use servant::cli::Cli;
use servant::config::Settings;
use servant::server::{InteractiveSink, LogSink, OutputSink};
use servant::{updates, BuildInfo, Servant};
use std::fs::File;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "servant.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let config = cli.configuration(&settings)?;

    // the terminal belongs to the interactive view, so logs go to a file
    let interactive = config.interactive && std::io::stdout().is_terminal();
    let log_file = init_tracing(cli.log_level(), interactive)?;

    let build = BuildInfo::current();
    info!(
        version = build.version(),
        commit = build.short_commit(),
        "servant {} ({})",
        build.version(),
        build.short_commit()
    );
    if let Some(path) = log_file {
        info!(path = %path.display(), "Writing logs to file");
    }
    if cli.check_updates(&settings) {
        updates::spawn_check(build.clone());
    }

    let quit = Arc::new(Notify::new());
    let sink: Arc<dyn OutputSink> = if interactive {
        Arc::new(InteractiveSink::new(build, Arc::clone(&quit)))
    } else {
        Arc::new(LogSink::new())
    };

    let result = async {
        Servant::new(config, sink, quit).init().await?.serve().await
    }
    .await;
    match &result {
        Err(e) if e.is_configuration() => {
            error!(error = %e, "Invalid configuration, nothing was served")
        }
        Err(e) => error!(error = %e, "servant stopped with an error"),
        Ok(()) => {}
    }
    Ok(result?)
}

fn init_tracing(default_level: &str, to_file: bool) -> Result<Option<PathBuf>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if to_file {
        let path = std::env::temp_dir().join(LOG_FILE_NAME);
        let file = File::create(&path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
        Ok(Some(path))
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        Ok(None)
    }
}
