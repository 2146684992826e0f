// src/config.rs

//! Model hyperparameters and per-request generation options.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{GenerationError, Result};
use crate::sampling::SamplingParams;

// ═════════════════════════════════════════════════════════════════════════════
// Forward mode
// ═════════════════════════════════════════════════════════════════════════════

/// Passed explicitly to every `forward`; dropout only runs in `Training`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ForwardMode {
    #[default]
    Inference,
    Training,
}

impl ForwardMode {
    pub fn is_training(self) -> bool {
        matches!(self, ForwardMode::Training)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Decoder hyperparameters
// ═════════════════════════════════════════════════════════════════════════════

/// Self-describing architecture of a [`crate::model::MusicTransformer`].
///
/// Persisted as `config.json` next to the weights so a checkpoint can be
/// rebuilt without outside knowledge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MusicTransformerConfig {
    pub vocab_size: usize,
    pub max_seq_len: usize,
    pub embed_dim: usize,
    pub num_heads: usize,
    pub ff_dim: usize,
    pub num_layers: usize,
    pub dropout: f64,
}

impl Default for MusicTransformerConfig {
    fn default() -> Self {
        Self {
            vocab_size: crate::tokenizer::VOCAB_SIZE,
            max_seq_len: 512,
            embed_dim: 256,
            num_heads: 8,
            ff_dim: 1024,
            num_layers: 6,
            dropout: 0.1,
        }
    }
}

impl MusicTransformerConfig {
    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("vocab_size", self.vocab_size),
            ("max_seq_len", self.max_seq_len),
            ("embed_dim", self.embed_dim),
            ("num_heads", self.num_heads),
            ("ff_dim", self.ff_dim),
            ("num_layers", self.num_layers),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(GenerationError::Configuration(format!(
                    "{name} must be > 0"
                )));
            }
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(GenerationError::Configuration(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            )));
        }
        if self.ff_dim <= self.embed_dim {
            return Err(GenerationError::Configuration(format!(
                "ff_dim ({}) must exceed embed_dim ({})",
                self.ff_dim, self.embed_dim
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(GenerationError::Configuration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        // Random starts are drawn from [1, vocab_size - 1).
        if self.vocab_size < 3 {
            return Err(GenerationError::Configuration(format!(
                "vocab_size must be >= 3, got {}",
                self.vocab_size
            )));
        }
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Self = read_json(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Generation options
// ═════════════════════════════════════════════════════════════════════════════

pub const DEFAULT_TOKENS_PER_SECOND: f64 = 15.0;
pub const DEFAULT_MAX_DURATION_SECS: f64 = 30.0;

/// Number of loop steps for one request.
///
/// `Duration` is a coarse conversion from musical time to a step count at an
/// assumed generation rate; nothing checks that the emitted tokens actually
/// span that much time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepBudget {
    Tokens(usize),
    Duration {
        seconds: f64,
        tokens_per_second: f64,
    },
}

impl StepBudget {
    pub fn steps(&self) -> usize {
        match *self {
            StepBudget::Tokens(n) => n,
            StepBudget::Duration {
                seconds,
                tokens_per_second,
            } => (seconds * tokens_per_second).floor() as usize,
        }
    }
}

/// Options for one generation request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Explicit token budget; overrides the duration-derived one.
    pub length: Option<usize>,
    pub max_duration_secs: f64,
    pub tokens_per_second: f64,
    pub temperature: f64,
    pub top_k: Option<usize>,
    pub top_p: Option<f64>,
    /// MIDI file used as the prompt.
    pub seed_source: Option<PathBuf>,
    /// Seed for the sampling RNG; drawn from the clock when absent.
    pub rng_seed: Option<u64>,
    pub output_dir: PathBuf,
    /// Dump the token sequence as JSON when decoding fails.
    pub keep_tokens_on_failure: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            length: None,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            tokens_per_second: DEFAULT_TOKENS_PER_SECOND,
            temperature: 1.0,
            top_k: Some(50),
            top_p: Some(0.9),
            seed_source: None,
            rng_seed: None,
            output_dir: PathBuf::from("generated_midis"),
            keep_tokens_on_failure: false,
        }
    }
}

impl GenerationConfig {
    pub fn budget(&self) -> StepBudget {
        match self.length {
            Some(n) => StepBudget::Tokens(n),
            None => StepBudget::Duration {
                seconds: self.max_duration_secs,
                tokens_per_second: self.tokens_per_second,
            },
        }
    }

    /// Sampler knobs of this request; invalid values are `Configuration` errors.
    pub fn sampling_params(&self) -> Result<SamplingParams> {
        SamplingParams::new(self.temperature, self.top_k, self.top_p)
            .map_err(|e| GenerationError::Configuration(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.sampling_params()?;
        if self.length.is_none() {
            let ok = |x: f64| x.is_finite() && x >= 0.0;
            if !ok(self.max_duration_secs) || !ok(self.tokens_per_second) {
                return Err(GenerationError::Configuration(format!(
                    "duration budget must be finite and non-negative (duration={}s, rate={}/s)",
                    self.max_duration_secs, self.tokens_per_second
                )));
            }
        }
        debug!(
            "Generation config ok: budget={} steps, T={}, top_k={:?}, top_p={:?}",
            self.budget().steps(),
            self.temperature,
            self.top_k,
            self.top_p
        );
        Ok(())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: Self = read_json(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        GenerationError::Configuration(format!("cannot open config {}: {e}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        GenerationError::Configuration(format!("cannot parse config {}: {e}", path.display()))
    })
}
