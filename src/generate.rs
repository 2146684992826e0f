// src/generate.rs

//! Request-level entry point: config -> seed -> loop -> MIDI file.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::GenerationConfig;
use crate::engine::{GenerationLoop, GenerationStats, NextTokenModel};
use crate::error::{GenerationError, Result};
use crate::sampling::TokenRng;
use crate::tokenizer::TokenCodec;

/// Successful request summary.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub path: PathBuf,
    pub tokens: Vec<u32>,
    pub stats: GenerationStats,
}

/// User-visible outcome; `success == false` carries the failure message.
///
/// `tokens_generated` counts tokens appended after the seed, on success and
/// on a decode failure alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub midi_file_path: String,
    pub success: bool,
    pub message: Option<String>,
    pub tokens_generated: usize,
}

impl From<&Result<GenerationReport>> for GenerateResponse {
    fn from(result: &Result<GenerationReport>) -> Self {
        match result {
            Ok(report) => Self {
                midi_file_path: report.path.display().to_string(),
                success: true,
                message: Some("Music generated successfully.".to_string()),
                tokens_generated: report.stats.steps,
            },
            Err(e) => Self {
                midi_file_path: String::new(),
                success: false,
                message: Some(e.to_string()),
                tokens_generated: match e {
                    GenerationError::Decode { tokens, .. } => *tokens,
                    _ => 0,
                },
            },
        }
    }
}

/// `<output_dir>/<output_id>`, with `.mid` appended unless the id already
/// ends in `.mid` or `.midi`.
pub fn output_path(output_dir: &Path, output_id: &str) -> PathBuf {
    let lower = output_id.to_ascii_lowercase();
    if lower.ends_with(".mid") || lower.ends_with(".midi") {
        output_dir.join(output_id)
    } else {
        output_dir.join(format!("{output_id}.mid"))
    }
}

fn tokens_dump_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tokens.json");
    PathBuf::from(name)
}

/// Seed tokens from the configured source. Recoverable encoding failures
/// fall back to a random start.
fn load_seed<C: TokenCodec>(codec: &C, config: &GenerationConfig) -> Result<Option<Vec<u32>>> {
    let Some(path) = config.seed_source.as_ref() else {
        return Ok(None);
    };
    if !path.exists() {
        warn!("Seed MIDI {:?} not found, starting from a random token", path);
        return Ok(None);
    }
    match codec.encode_seed(path) {
        Ok(tokens) => Ok(Some(tokens)),
        Err(e) if e.is_recoverable() => {
            warn!("Error encoding seed MIDI: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Runs one generation request and writes the MIDI artifact.
pub fn generate_music<M, C, R>(
    model: &M,
    codec: &C,
    config: &GenerationConfig,
    output_id: &str,
    rng: R,
) -> Result<GenerationReport>
where
    M: NextTokenModel,
    C: TokenCodec,
    R: TokenRng,
{
    let start = Instant::now();
    if model.vocab_size() > codec.vocab_size() {
        return Err(GenerationError::Configuration(format!(
            "model vocabulary ({}) is larger than the codec vocabulary ({})",
            model.vocab_size(),
            codec.vocab_size()
        )));
    }

    let mut gen_loop = GenerationLoop::new(model, config, rng)?;
    let seed = load_seed(codec, config)?;
    gen_loop.seed(seed.as_deref())?;
    gen_loop.run()?;

    let path = output_path(&config.output_dir, output_id);
    match gen_loop.finish(codec, &path) {
        Ok(path) => {
            info!(
                "Music generated and saved: {:?} ({:.2}s)",
                path,
                start.elapsed().as_secs_f64()
            );
            let stats = gen_loop.stats();
            Ok(GenerationReport {
                path,
                tokens: gen_loop.into_sequence(),
                stats,
            })
        }
        Err(e) => {
            error!("Error saving MIDI: {e}");
            if config.keep_tokens_on_failure {
                let dump = tokens_dump_path(&path);
                match dump_tokens(&dump, gen_loop.sequence()) {
                    Ok(()) => info!("Token sequence kept at {:?}", dump),
                    Err(dump_err) => warn!("Could not keep token sequence: {dump_err}"),
                }
            }
            Err(e)
        }
    }
}

fn dump_tokens(path: &Path, tokens: &[u32]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(tokens)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)?;
    Ok(())
}
