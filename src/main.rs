use std::fs;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info, warn, LevelFilter};

mod cli;
use crate::cli::Cli;
use crate::cli::Config;

mod commands;
use crate::commands::{load_docs, CliError, Mode, Runner};

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config: Config = match &cli.config {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    config.apply(cli);
    Ok(config)
}

fn main() -> ExitCode {
    // Parse the cli
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let docs = match &config.docs {
        Some(path) => match load_docs(path) {
            Ok(docs) => Some(docs),
            Err(e) => {
                error!("Cannot load documentation {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    if cli.command.needs_docs() && docs.is_none() {
        error!("{}", CliError::MissingDocs);
        return ExitCode::FAILURE;
    }

    let files = cli.command.files();
    if cli.output.is_some() && files.len() > 1 {
        warn!("Several input files given, only the first one is written to the output file");
    }

    let runner = Runner {
        settings: &config.settings,
        docs: docs.as_ref(),
        even_broken: cli.even_broken,
    };
    let mode = Mode::from(&cli.command);

    let mut failed = 0;
    for (i, file) in files.iter().enumerate() {
        let output = if i == 0 { cli.output.as_deref() } else { None };

        if let Err(e) = runner.run(mode, file, output) {
            error!("{}: {}", file.display(), e);
            failed += 1;
        }
    }

    if failed > 0 {
        error!("{} of {} files failed", failed, files.len());
        return ExitCode::FAILURE;
    }

    info!("Done");
    ExitCode::SUCCESS
}
