use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Serialize;
use thiserror::Error;

use bcore::buf::hex_id;
use bundle::assemble::{AssembleError, Assembler};
use bundle::chunk::builder::ChunkWriter;
use bundle::chunk::raw::{decode_one, ChunkError};
use bundle::chunk::reader::ChunkReader;
use bundle::chunk::HEADER_SIZE;
use bundle::docs::{Docs, DocsError};
use bundle::{DisassembledChunk, RawChunk, Settings};

use crate::cli::Commands;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed config: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Docs(#[from] DocsError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error("This command needs chunk documentation, use --docs or the config file")]
    MissingDocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Decode,
    Encode,
    Disassemble,
    Assemble,
}

impl From<&Commands> for Mode {
    fn from(command: &Commands) -> Self {
        match command {
            Commands::Decode { .. } => Mode::Decode,
            Commands::Encode { .. } => Mode::Encode,
            Commands::Disassemble { .. } => Mode::Disassemble,
            Commands::Assemble { .. } => Mode::Assemble,
        }
    }
}

fn strip_suffix_nocase<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(split) {
        return None;
    }

    let (head, tail) = name.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

/// Name of the file a mode writes when no output was given
pub fn default_output(mode: Mode, input: &Path) -> PathBuf {
    let name = input.to_string_lossy();

    let out = match mode {
        Mode::Decode => format!("{}.json", name),
        Mode::Encode => match strip_suffix_nocase(&name, ".json") {
            Some(stem) => stem.to_string(),
            None => format!("{}.bin", name),
        },
        Mode::Disassemble => {
            format!("{}.disassm.json", strip_suffix_nocase(&name, ".json").unwrap_or(&name))
        }
        Mode::Assemble => {
            format!("{}.json", strip_suffix_nocase(&name, ".disassm.json").unwrap_or(&name))
        }
    };

    PathBuf::from(out)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), CliError> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.flush()?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

pub struct Runner<'a> {
    pub settings: &'a Settings,
    pub docs: Option<&'a Docs>,
    pub even_broken: bool,
}

impl<'a> Runner<'a> {
    /// Processes one file, returns the path that was written
    pub fn run(&self, mode: Mode, input: &Path, output: Option<&Path>) -> Result<PathBuf, CliError> {
        info!("Opening file: {}", input.display());

        let target = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(mode, input));

        match mode {
            Mode::Decode => self.decode(input, &target)?,
            Mode::Encode => self.encode(input, &target)?,
            Mode::Disassemble => self.disassemble(input, &target)?,
            Mode::Assemble => self.assemble(input, &target)?,
        }

        info!("Wrote {}", target.display());
        Ok(target)
    }

    fn decode(&self, input: &Path, target: &Path) -> Result<(), CliError> {
        let reader = ChunkReader::new(BufReader::new(File::open(input)?), self.settings.compress_threshold);
        let mut chunks: Vec<RawChunk> = Vec::new();

        for chunk in reader {
            match chunk {
                Ok(chunk) => chunks.push(chunk),
                Err(ChunkError::Truncated { leftover }) => {
                    if self.even_broken && leftover.len() >= HEADER_SIZE {
                        chunks.push(decode_one(&leftover, self.settings.compress_threshold)?);
                    } else {
                        error!("Unknown data left (Size: {})", leftover.len());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(docs) = self.docs {
            for chunk in chunks.iter().filter(|c| docs.lookup(c.id).is_none()) {
                warn!("Unknown chunk {}", hex_id(chunk.id));
            }
        }

        write_json(target, &chunks)
    }

    fn encode(&self, input: &Path, target: &Path) -> Result<(), CliError> {
        let chunks: Vec<RawChunk> = read_json(input)?;

        let mut writer = ChunkWriter::new(BufWriter::new(File::create(target)?));
        writer.write_chunks(&chunks)?;
        writer.flush()?;
        Ok(())
    }

    fn disassemble(&self, input: &Path, target: &Path) -> Result<(), CliError> {
        let docs = self.docs.ok_or(CliError::MissingDocs)?;
        let chunks: Vec<RawChunk> = read_json(input)?;

        let disassembled = Assembler::new(docs, self.settings).disassemble(&chunks)?;
        write_json(target, &disassembled)
    }

    fn assemble(&self, input: &Path, target: &Path) -> Result<(), CliError> {
        let docs = self.docs.ok_or(CliError::MissingDocs)?;
        let chunks: Vec<DisassembledChunk> = read_json(input)?;

        let raw = Assembler::new(docs, self.settings).assemble(&chunks)?;
        write_json(target, &raw)
    }
}

pub fn load_docs(path: &Path) -> Result<Docs, CliError> {
    let docs = Docs::from_reader(BufReader::new(File::open(path)?))?;
    info!("Loaded {} chunk descriptions from {}", docs.len(), path.display());
    Ok(docs)
}

#[cfg(test)]
mod test_output_names {
    use super::*;

    fn name(mode: Mode, input: &str) -> PathBuf {
        default_output(mode, Path::new(input))
    }

    #[test]
    fn decode() {
        assert_eq!(name(Mode::Decode, "dir/level.bin"), PathBuf::from("dir/level.bin.json"));
    }

    #[test]
    fn encode() {
        assert_eq!(name(Mode::Encode, "level.bin.json"), PathBuf::from("level.bin"));
        assert_eq!(name(Mode::Encode, "level.bin.JSON"), PathBuf::from("level.bin"));
        assert_eq!(name(Mode::Encode, "level"), PathBuf::from("level.bin"));
    }

    #[test]
    fn disassemble() {
        assert_eq!(name(Mode::Disassemble, "level.json"), PathBuf::from("level.disassm.json"));
        assert_eq!(name(Mode::Disassemble, "level"), PathBuf::from("level.disassm.json"));
    }

    #[test]
    fn assemble() {
        assert_eq!(name(Mode::Assemble, "level.disassm.json"), PathBuf::from("level.json"));
        assert_eq!(name(Mode::Assemble, "level.other"), PathBuf::from("level.other.json"));
    }
}
