mod cli;
mod family_value;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;
use cli::{Cli, Commands, LogArgs};
use featsmith_builtin::{
    fetch_builtin_source, run_builtin_family, run_builtin_pipeline, run_builtin_selection,
};
use featsmith_rs::PipelineConfig;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_subscriber::{EnvFilter, prelude::*};

const LOG_FILE_NAME: &str = "featsmith.log";

fn init_tracing(log_file: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| anyhow!("failed to create log directory {parent:?}: {err}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| anyhow!("failed to open log file {path:?}: {err}"))?;
        let (non_blocking_writer, guard) = non_blocking(file);
        // Leak the guard so the non-blocking writer stays alive for the
        // duration of the process.
        let _guard = Box::leak(Box::new(guard));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(non_blocking_writer);
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing: {err}"))
    }
}

/// Explicit `--log-file` wins; otherwise `run` logs next to its outputs.
/// A config that fails to load is reported by the command itself.
fn resolve_log_file(log: &LogArgs, config: Option<&Path>) -> Option<PathBuf> {
    if log.no_file_log {
        return None;
    }
    if let Some(path) = &log.log_file {
        return Some(path.clone());
    }
    let config = PipelineConfig::load(config?).ok()?;
    Some(config.output_dir().join(LOG_FILE_NAME))
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    info!("==================== new featsmith run ====================");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "featsmith invoked"
    );
    info!("command_line={}", argv.join(" "));
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Run(args) => resolve_log_file(&args.log, Some(&args.config)),
        Commands::Family(args) => resolve_log_file(&args.log, None),
        Commands::Select(args) => resolve_log_file(&args.log, None),
        Commands::Fetch(args) => resolve_log_file(&args.log, None),
    };

    init_tracing(log_file.clone())?;
    log_invocation(log_file.as_ref());

    match cli.command {
        Commands::Run(args) => {
            let report = run_builtin_pipeline(&args.config)?;
            info!(
                full = %report.full_path.display(),
                selected = ?report.selected_path,
                metadata = ?report.metadata_path,
                rows = report.rows,
                columns = report.columns.len(),
                "Run finished"
            );
            if let Some(selection) = &report.selection {
                info!(
                    model = %selection.best_model,
                    metric = %selection.best_metric,
                    score = selection.best_score,
                    top_features = ?selection.top_features,
                    "Selection summary"
                );
            }
            Ok(())
        }
        Commands::Family(args) => {
            let path = run_builtin_family(&args.config, args.name.to_family())?;
            info!(path = %path.display(), "Family output written");
            Ok(())
        }
        Commands::Select(args) => {
            let (selected, metadata, result) =
                run_builtin_selection(&args.input, &args.config, args.output_dir.as_deref())?;
            info!(
                selected = %selected.display(),
                metadata = %metadata.display(),
                model = %result.best_model,
                metric = %result.best_metric,
                score = result.best_score,
                "Selection finished"
            );
            Ok(())
        }
        Commands::Fetch(args) => {
            let path = fetch_builtin_source(&args.config)?;
            info!(path = %path.display(), "Fetch finished");
            Ok(())
        }
    }
}
