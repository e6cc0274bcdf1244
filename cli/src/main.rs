use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod prompts;

use commands::runner::INTERRUPTED_EXIT_CODE;
use commands::{Commands, Exit};
use config::{AppConfig, Overrides};

#[derive(Parser, PartialEq, Debug)]
#[command(name = "gitsage", version)]
#[command(about = "LLM agents for commit messages, PR descriptions, reports and debugging", long_about = None)]
struct Cli {
    /// Path to a config file (YAML or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Language of the generated text
    #[arg(long, global = true)]
    language: Option<String>,

    /// Maximum number of agent iterations
    #[arg(long, global = true)]
    max_iterations: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

fn default_filter(debug: bool) -> String {
    if debug {
        format!("error,{}=debug", env!("CARGO_CRATE_NAME"))
    } else {
        "warn".to_string()
    }
}

/// Logs go to stderr, or to a daily rolling file when `logging.file` is set.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config.debug)));

    match &config.logging.file {
        Some(file) => {
            let directory = file.parent().unwrap_or_else(|| Path::new("."));
            let file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "gitsage.log".to_string());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let overrides = Overrides {
        debug: cli.debug,
        language: cli.language,
        max_iterations: cli.max_iterations,
    };
    let config = match AppConfig::load(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let guard = init_tracing(&config);
    tracing::debug!(
        model = %config.provider.model,
        base_url = %config.provider.base_url,
        sessions = %config.sessions_dir().display(),
        "configuration loaded"
    );

    match cli.command.run(config).await {
        Ok(Exit::Success) => {}
        Ok(Exit::Interrupted) => {
            drop(guard);
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        Err(e) => {
            tracing::error!("command failed: {e:#}");
            eprintln!("Error: {e:#}");
            drop(guard);
            std::process::exit(1);
        }
    }
}
