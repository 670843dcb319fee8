//! Runs every `fixtures/*.json` scenario against the compiler.
//!
//! A fixture holds a schema document (see `schema_codec::path_de`), optional
//! compiler options and a list of cases. Each case names a type and gives a
//! value and/or hex bytes:
//! - value + hex: encoding the value must give the bytes, and decoding the
//!   bytes must give `decoded` (or the value itself when absent);
//! - `"error": "encode"` / `"error": "decode"`: that step must fail;
//! - `"error": "compile"` on the fixture: compilation itself must fail.
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;

use schema_codec::{CompileOptions, Schema};

// ————————————————————————————————————————————————————————————————————————————
// FIXTURE FORMAT
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    options: CompileOptions,
    schema: Value,
    #[serde(default)]
    error: Option<Phase>,
    #[serde(default)]
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    hex: Option<String>,
    #[serde(default)]
    decoded: Option<Value>,
    #[serde(default)]
    error: Option<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Phase {
    Compile,
    Resolve,
    Encode,
    Decode,
}

// ————————————————————————————————————————————————————————————————————————————
// RUNNER
// ————————————————————————————————————————————————————————————————————————————

fn main() {
    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures"));
    let pattern = root.join("*.json");
    let paths = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.filter_map(Result::ok).collect::<Vec<_>>(),
        Err(error) => {
            eprintln!("{} {error}", "invalid fixture pattern:".red());
            std::process::exit(2);
        }
    };

    let mut passed = 0usize;
    let mut failed = 0usize;
    for path in paths {
        let file_name =
            path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        match run_fixture(&path) {
            Ok(results) => {
                for (case, outcome) in results {
                    match outcome {
                        Ok(()) => {
                            passed += 1;
                            println!("{} {file_name} :: {case}", "ok".green());
                        }
                        Err(error) => {
                            failed += 1;
                            println!("{} {file_name} :: {case}: {error:#}", "FAIL".red().bold());
                        }
                    }
                }
            }
            Err(error) => {
                failed += 1;
                println!("{} {file_name}: {error:#}", "FAIL".red().bold());
            }
        }
    }

    println!("\n{passed} passed, {failed} failed");
    if failed > 0 {
        std::process::exit(1);
    }
}

fn run_fixture(path: &Path) -> anyhow::Result<Vec<(String, anyhow::Result<()>)>> {
    let source = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let fixture: Fixture = schema_codec::path_de::from_slice_with_path(&source)?;
    let defs = schema_codec::path_de::definitions_from_str(&fixture.schema.to_string())?;
    let compiled = schema_codec::compile_with(defs, fixture.options);
    let mut schema = match (compiled, fixture.error) {
        (Err(_), Some(Phase::Compile)) => return Ok(vec![("compile".into(), Ok(()))]),
        (Ok(_), Some(Phase::Compile)) => {
            return Ok(vec![("compile".into(), Err(anyhow!("compiled without error")))]);
        }
        (Err(error), _) => return Err(error.into()),
        (Ok(schema), _) => schema,
    };
    Ok(fixture
        .cases
        .iter()
        .map(|case| (case.name.clone(), run_case(&mut schema, case)))
        .collect())
}

fn run_case(schema: &mut Schema, case: &Case) -> anyhow::Result<()> {
    let codec = match schema.resolve(&case.ty) {
        Ok(codec) => codec,
        Err(_) if case.error == Some(Phase::Resolve) => return Ok(()),
        Err(error) => return Err(error.into()),
    };
    if case.error == Some(Phase::Resolve) {
        bail!("{} resolved without error", case.ty);
    }

    if let Some(value) = case.value.as_ref() {
        let encoded = codec.encode(value);
        match (encoded, case.error) {
            (Err(_), Some(Phase::Encode)) => return Ok(()),
            (Ok(bytes), Some(Phase::Encode)) => {
                bail!("encoded to {} instead of failing", hex::encode(bytes))
            }
            (Err(error), _) => return Err(error.into()),
            (Ok(bytes), _) => {
                if let Some(max) = codec.max_size().bytes()
                    && bytes.len() > max
                {
                    bail!("{} bytes exceed the maximum size {max}", bytes.len());
                }
                if let Some(expected) = case.hex.as_ref()
                    && hex::encode(&bytes) != *expected
                {
                    bail!("encoded {}, expected {expected}", hex::encode(&bytes));
                }
            }
        }
    }

    if let Some(hex_src) = case.hex.as_ref() {
        let bytes = hex::decode(hex_src).with_context(|| format!("bad hex in fixture: {hex_src}"))?;
        match (codec.decode(&bytes), case.error) {
            (Err(_), Some(Phase::Decode)) => {}
            (Ok(value), Some(Phase::Decode)) => bail!("decoded to {value} instead of failing"),
            (Err(error), _) => return Err(error.into()),
            (Ok(value), _) => {
                let expected = case.decoded.as_ref().or(case.value.as_ref());
                if let Some(expected) = expected
                    && value != *expected
                {
                    bail!("decoded {value}, expected {expected}");
                }
            }
        }
    }
    Ok(())
}
