//! Command line front-end: compile schema files, then list, encode or decode.
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::ast::Definition;
use crate::options::CompileOptions;
use crate::schema::{Schema, TypeCodec};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// compile binary codec schemas and encode/decode JSON values with them
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    /// TOML file with compiler options
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// list every compiled type with its maximum encoded size
    Types(SchemaSettings),
    /// encode JSON values, one hex line per value
    Encode(EncodeOut),
    /// decode hex strings, one JSON line per input
    Decode(DecodeOut),
}

#[derive(Args, Debug, Clone)]
struct SchemaSettings {
    /// One or more schema files. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    schema: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct EncodeOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// type to encode, e.g. `Point` or `Data2<u8, 3>`
    #[arg(long = "type", short)]
    ty: String,

    /// JSON input file ('-' or omitted for stdin)
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// inline JSON value instead of an input file
    #[arg(long, conflicts_with_all = ["input", "ndjson"])]
    value: Option<String>,
}

#[derive(clap::Parser, Debug)]
struct DecodeOut {
    #[command(flatten)]
    schema_settings: SchemaSettings,

    /// type to decode, e.g. `Point` or `Data2<u8, 3>`
    #[arg(long = "type", short)]
    ty: String,

    /// hex encoded payloads
    #[arg(required = true)]
    hex: Vec<String>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl SchemaSettings {
    fn compile(&self, options: CompileOptions) -> anyhow::Result<Schema> {
        let source_paths = resolve_file_path_patterns(&self.schema)?;
        let mut defs = Vec::<(String, Definition)>::new();
        for source_path in source_paths {
            let source = std::fs::read(&source_path)
                .with_context(|| format!("failed to read schema file {}", source_path.display()))?;
            let loaded = crate::path_de::definitions_from_slice(&source)
                .with_context(|| format!("failed to load schema file {}", source_path.display()))?;
            debug!(path = %source_path.display(), definitions = loaded.len(), "loaded schema file");
            defs.extend(loaded);
        }
        let schema = crate::compile_with(defs, options)?;
        Ok(schema)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let options = match self.config.as_ref() {
            Some(path) => CompileOptions::load(path)?,
            None => CompileOptions::default(),
        };
        match &self.cmd {
            Command::Types(target) => {
                let schema = target.compile(options)?;
                for (name, codec) in schema.types() {
                    println!("{name}\t{}\t{}", codec.ident(), codec.max_size());
                }
            }
            Command::Encode(target) => {
                let mut schema = target.schema_settings.compile(options)?;
                let id = schema.resolve(&target.ty)?.id();
                let codec = schema.codec(id).context("resolved type has no codec")?;
                let values = target.values()?;
                info!(count = values.len(), ty = %target.ty, "encoding");
                let lines = values
                    .par_iter()
                    .enumerate()
                    .map(|(index, value)| encode_line(codec, index, value))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                for line in lines {
                    println!("{line}");
                }
            }
            Command::Decode(target) => {
                let mut schema = target.schema_settings.compile(options)?;
                let codec = schema.resolve(&target.ty)?;
                for hex_src in &target.hex {
                    let bytes = hex::decode(hex_src.trim())
                        .with_context(|| format!("invalid hex input {hex_src:?}"))?;
                    let value = codec.decode(&bytes).with_context(|| {
                        format!("failed to decode {hex_src} as {}", codec.ident())
                    })?;
                    println!("{}", serde_json::to_string(&value)?);
                }
            }
        }
        Ok(())
    }
}

impl EncodeOut {
    fn values(&self) -> anyhow::Result<Vec<Value>> {
        if let Some(value) = self.value.as_ref() {
            let value = serde_json::from_str(value).context("failed to parse --value")?;
            return Ok(vec![value]);
        }
        let source = match self.input.as_ref() {
            Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read input file {}", path.display()))?,
            _ => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            }
        };
        if !self.ndjson {
            let value = serde_json::from_str(&source).context("failed to parse JSON input")?;
            return Ok(vec![value]);
        }
        source
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(ix, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("failed to parse NDJSON line {}", ix + 1))
            })
            .collect()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn encode_line(codec: TypeCodec<'_>, index: usize, value: &Value) -> anyhow::Result<String> {
    let bytes = codec
        .encode(value)
        .with_context(|| format!("failed to encode value #{index} as {}", codec.ident()))?;
    Ok(hex::encode(bytes))
}

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
