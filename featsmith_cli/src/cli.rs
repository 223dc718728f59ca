use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::family_value::FamilyValue;

#[derive(Parser, Debug)]
#[command(
    name = "featsmith",
    version,
    about = "Candle feature generation, merge and model-driven feature selection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate enabled feature families, merge them, derive the target and
    /// run selection
    Run(RunArgs),

    /// Generate a single feature family into the work directory
    Family(FamilyArgs),

    /// Run feature selection over an existing unified table
    Select(SelectArgs),

    /// Populate the source candle cache from the configured provider
    Fetch(FetchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Append logs to this file in addition to stdout
    #[arg(long = "log-file", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Disable file logging
    #[arg(long = "no-file-log", default_value_t = false, conflicts_with = "log_file")]
    pub no_file_log: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline configuration (YAML)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    // File logging defaults to <output_dir>/featsmith.log.
    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Args, Debug)]
pub struct FamilyArgs {
    /// Feature family to generate
    #[arg(long, value_enum)]
    pub name: FamilyValue,

    /// Pipeline configuration (YAML)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Args, Debug)]
pub struct SelectArgs {
    /// Unified feature table with a `target` column
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// Configuration whose `selection` section drives the search
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Where to write X_selected.csv and metadata.json; defaults to the
    /// configured output directory
    #[arg(long = "output-dir", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Pipeline configuration (YAML)
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    #[command(flatten)]
    pub log: LogArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn family_subcommand_parses_its_name() {
        let cli = Cli::try_parse_from([
            "featsmith", "family", "--name", "relational", "--config", "cfg.yaml",
        ])
        .unwrap();
        match cli.command {
            Commands::Family(args) => {
                assert_eq!(args.name.to_family(), featsmith_rs::FeatureFamily::Relational);
                assert_eq!(args.config, PathBuf::from("cfg.yaml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn log_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "featsmith", "run", "--config", "c.yaml", "--log-file", "x.log", "--no-file-log",
        ]);
        assert!(parsed.is_err());
    }
}
