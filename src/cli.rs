use std::path::PathBuf;
use serde::Deserialize;

use clap::{Parser, Subcommand};

use bundle::Settings;

#[derive(Parser)]
#[command(name = "bundlerec")]
#[command(about = "Decode, disassemble and rebuild tagged chunk bundles")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Chunk documentation, overrides the one from the config file
    #[arg(short, long, value_name = "FILE")]
    pub docs: Option<PathBuf>,

    /// Output file name, only used for the first input file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Pointer fields are 64 bits wide
    #[arg(long)]
    pub wide_pointer: bool,

    /// Leaves with a payload at least this big are stored deflated
    #[arg(long, value_name = "BYTES")]
    pub compress_threshold: Option<usize>,

    /// Keep padding fields in disassembled records
    #[arg(long)]
    pub export_paddings: bool,

    /// Keep a truncated trailing chunk as a broken leaf
    #[arg(long)]
    pub even_broken: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Binary bundles to raw chunk JSON
    Decode {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Raw chunk JSON back to binary bundles
    Encode {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Raw chunk JSON to structured JSON, needs documentation
    Disassemble {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Structured JSON back to raw chunk JSON, needs documentation
    Assemble {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Commands {
    pub fn files(&self) -> &[PathBuf] {
        match self {
            Commands::Decode { files }
            | Commands::Encode { files }
            | Commands::Disassemble { files }
            | Commands::Assemble { files } => files,
        }
    }

    pub fn needs_docs(&self) -> bool {
        matches!(self, Commands::Disassemble { .. } | Commands::Assemble { .. })
    }
}

// Configuration
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub docs: Option<PathBuf>,

    pub settings: Settings,
}

impl Config {
    /// Command line flags win over the config file
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(docs) = &cli.docs {
            self.docs = Some(docs.clone());
        }
        if cli.wide_pointer {
            self.settings.pointers_are_64_bits = true;
        }
        if let Some(threshold) = cli.compress_threshold {
            self.settings.compress_threshold = threshold;
        }
        if cli.export_paddings {
            self.settings.export_paddings = true;
        }
    }
}

#[cfg(test)]
mod test_cli {
    use super::*;

    #[test]
    fn config_file() {
        let config: Config = toml::from_str(
            r#"
            docs = "docs.json"

            [settings]
                pointers_are_64_bits = true
                compress_threshold = 64
        "#,
        )
        .unwrap();

        assert_eq!(config.docs, Some(PathBuf::from("docs.json")));
        assert!(config.settings.pointers_are_64_bits);
        assert_eq!(config.settings.compress_threshold, 64);
        assert!(!config.settings.export_paddings);
    }

    #[test]
    fn empty_config() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.docs, None);
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn overrides() {
        let cli = Cli::parse_from([
            "bundlerec",
            "--docs",
            "other.json",
            "--wide-pointer",
            "--compress-threshold",
            "10",
            "disassemble",
            "a.json",
            "b.json",
        ]);

        let mut config: Config = toml::from_str("docs = \"docs.json\"").unwrap();
        config.apply(&cli);

        assert_eq!(config.docs, Some(PathBuf::from("other.json")));
        assert!(config.settings.pointers_are_64_bits);
        assert_eq!(config.settings.compress_threshold, 10);
        assert!(cli.command.needs_docs());
        assert_eq!(cli.command.files().len(), 2);
    }

    #[test]
    fn files_are_required() {
        assert!(Cli::try_parse_from(["bundlerec", "decode"]).is_err());
    }
}
