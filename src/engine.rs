//! Autoregressive generation loop.
//!
//! One loop instance per request. Each step feeds the trailing
//! `max_seq_len` tokens to the model, samples from the last-position logits
//! and appends the result; steps are strictly sequential.

use burn::tensor::backend::Backend;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::config::{GenerationConfig, MusicTransformerConfig};
use crate::error::{GenerationError, Result};
use crate::model::MusicTransformer;
use crate::sampling::{SamplingParams, TokenRng};
use crate::tokenizer::TokenCodec;

// ─────────────────────────────────────────────────────────────────────────────
// Model interface
// ─────────────────────────────────────────────────────────────────────────────

/// Next-token logits for a context window.
pub trait NextTokenModel {
    fn vocab_size(&self) -> usize;

    fn max_seq_len(&self) -> usize;

    /// Logits of the last window position; `window.len() <= max_seq_len()`.
    fn predict(&self, window: &[u32]) -> Result<Vec<f32>>;
}

/// A trained decoder bound to its device, read-only during generation.
#[derive(Debug)]
pub struct InferenceModel<B: Backend> {
    pub model: MusicTransformer<B>,
    pub config: MusicTransformerConfig,
    device: B::Device,
}

impl<B: Backend> InferenceModel<B> {
    pub fn new(model: MusicTransformer<B>, config: MusicTransformerConfig, device: B::Device) -> Self {
        info!("InferenceModel: {} layers", model.num_layers());
        Self {
            model,
            config,
            device,
        }
    }

    /// Restores a checkpoint; any failure is a `ModelLoad` error.
    pub fn load(checkpoint_dir: impl AsRef<Path>, device: B::Device) -> Result<Self> {
        let dir = checkpoint_dir.as_ref();
        let (model, config) = crate::checkpoint::load_checkpoint::<B>(dir, &device)
            .map_err(|e| GenerationError::ModelLoad(format!("{}: {e:#}", dir.display())))?;
        Ok(Self::new(model, config, device))
    }
}

impl<B: Backend> NextTokenModel for InferenceModel<B> {
    fn vocab_size(&self) -> usize {
        self.model.vocab_size()
    }

    fn max_seq_len(&self) -> usize {
        self.model.max_seq_len()
    }

    fn predict(&self, window: &[u32]) -> Result<Vec<f32>> {
        self.model.last_logits(window, &self.device)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationState {
    Initializing,
    Seeding,
    Stepping { step: usize, budget: usize },
    Decoding,
    Done(PathBuf),
    Failed(String),
}

impl GenerationState {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationState::Initializing => "Initializing",
            GenerationState::Seeding => "Seeding",
            GenerationState::Stepping { .. } => "Stepping",
            GenerationState::Decoding => "Decoding",
            GenerationState::Done(_) => "Done",
            GenerationState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationState::Done(_) | GenerationState::Failed(_))
    }
}

/// Counters reported alongside the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub seed_len: usize,
    pub random_start: bool,
    pub steps: usize,
    /// Samples outside the vocabulary replaced by a random token.
    pub resampled: usize,
}

/// Trailing window of at most `max_seq_len` tokens.
pub fn context_window(sequence: &[u32], max_seq_len: usize) -> &[u32] {
    &sequence[sequence.len().saturating_sub(max_seq_len)..]
}

/// Uniform token in [1, vocab_size - 1); 0 is PAD and never drawn.
pub fn random_start_token(vocab_size: usize, rng: &mut impl TokenRng) -> u32 {
    rng.next_in_range(1, vocab_size - 1) as u32
}

// ─────────────────────────────────────────────────────────────────────────────
// Generation loop
// ─────────────────────────────────────────────────────────────────────────────

pub struct GenerationLoop<'m, M: NextTokenModel, R: TokenRng> {
    model: &'m M,
    sampling: SamplingParams,
    budget: usize,
    rng: R,
    sequence: Vec<u32>,
    state: GenerationState,
    stats: GenerationStats,
}

impl<'m, M: NextTokenModel, R: TokenRng> GenerationLoop<'m, M, R> {
    /// Validates the request against the model; nothing runs on error.
    pub fn new(model: &'m M, config: &GenerationConfig, rng: R) -> Result<Self> {
        config.validate()?;
        let sampling = config.sampling_params()?;
        Self::with_params(model, sampling, config.budget().steps(), rng)
    }

    pub fn with_params(model: &'m M, sampling: SamplingParams, budget: usize, rng: R) -> Result<Self> {
        let vocab_size = model.vocab_size();
        if vocab_size < 3 {
            return Err(GenerationError::Configuration(format!(
                "vocab_size must be >= 3, got {vocab_size}"
            )));
        }
        if model.max_seq_len() == 0 {
            return Err(GenerationError::Configuration(
                "max_seq_len must be > 0".to_string(),
            ));
        }
        debug!(
            "GenerationLoop: vocab={}, max_seq_len={}, budget={}, {:?}",
            vocab_size,
            model.max_seq_len(),
            budget,
            sampling
        );
        Ok(Self {
            model,
            sampling,
            budget,
            rng,
            sequence: Vec::new(),
            state: GenerationState::Initializing,
            stats: GenerationStats::default(),
        })
    }

    fn expect_state(&self, expected: &'static str) -> Result<()> {
        if self.state.name() == expected {
            Ok(())
        } else {
            Err(GenerationError::InvalidState {
                state: self.state.name(),
                expected,
            })
        }
    }

    /// Starts the sequence from the trailing `max_seq_len` seed tokens, or
    /// from one random token when the seed is absent, empty or invalid.
    pub fn seed(&mut self, seed: Option<&[u32]>) -> Result<()> {
        self.expect_state("Initializing")?;
        self.state = GenerationState::Seeding;

        let vocab_size = self.model.vocab_size();
        let usable = seed.filter(|s| !s.is_empty()).filter(|s| {
            let in_vocab = s.iter().all(|&id| (id as usize) < vocab_size);
            if !in_vocab {
                warn!("Seed contains tokens outside vocabulary of {}", vocab_size);
            }
            in_vocab
        });

        match usable {
            Some(tokens) => {
                let kept = context_window(tokens, self.model.max_seq_len());
                self.sequence = kept.to_vec();
                info!(
                    "Using {} seed tokens ({} supplied)",
                    self.sequence.len(),
                    tokens.len()
                );
            }
            None => {
                let start = random_start_token(vocab_size, &mut self.rng);
                self.sequence = vec![start];
                self.stats.random_start = true;
                info!("No usable seed, starting with random token {}", start);
            }
        }

        self.stats.seed_len = self.sequence.len();
        self.state = GenerationState::Stepping {
            step: 0,
            budget: self.budget,
        };
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        match self.state {
            GenerationState::Stepping { step, budget } => budget - step,
            _ => 0,
        }
    }

    /// One predict + sample + append. Returns the appended token.
    pub fn step(&mut self) -> Result<u32> {
        let GenerationState::Stepping { step, budget } = self.state else {
            return Err(GenerationError::InvalidState {
                state: self.state.name(),
                expected: "Stepping",
            });
        };
        if step >= budget {
            return Err(GenerationError::InvalidState {
                state: "Stepping (budget exhausted)",
                expected: "Stepping",
            });
        }

        match self.predict_and_sample() {
            Ok(next) => {
                self.sequence.push(next);
                self.stats.steps += 1;
                self.state = GenerationState::Stepping {
                    step: step + 1,
                    budget,
                };
                if step % 50 == 0 {
                    debug!("Generation step {}: seq_len={}", step, self.sequence.len());
                }
                Ok(next)
            }
            Err(e) => {
                self.state = GenerationState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn predict_and_sample(&mut self) -> Result<u32> {
        let vocab_size = self.model.vocab_size();
        let window = context_window(&self.sequence, self.model.max_seq_len());
        let logits = self.model.predict(window)?;
        let sampled = self.sampling.sample(&logits, &mut self.rng)?;

        if sampled >= vocab_size {
            let replacement = random_start_token(vocab_size, &mut self.rng);
            warn!(
                "Sampled token {} outside vocabulary of {}, replaced with {}",
                sampled, vocab_size, replacement
            );
            self.stats.resampled += 1;
            return Ok(replacement);
        }
        Ok(sampled as u32)
    }

    /// Steps until the budget is exhausted.
    pub fn run(&mut self) -> Result<&[u32]> {
        info!("Generating {} tokens", self.remaining());
        while self.remaining() > 0 {
            self.step()?;
        }
        self.expect_state("Stepping")?;
        info!("Generation complete: final_len={}", self.sequence.len());
        Ok(&self.sequence)
    }

    /// Hands the sequence to the codec and writes the artifact to `path`.
    pub fn finish<C: TokenCodec>(&mut self, codec: &C, path: &Path) -> Result<PathBuf> {
        self.expect_state("Stepping")?;
        if self.remaining() > 0 {
            return Err(GenerationError::InvalidState {
                state: "Stepping (budget not exhausted)",
                expected: "Stepping",
            });
        }
        self.state = GenerationState::Decoding;
        info!("Decoding {} tokens to MIDI", self.sequence.len());

        let steps = self.stats.steps;
        let written = codec
            .decode(&self.sequence)
            // Report newly generated tokens, not the full sequence length.
            .map_err(|e| match e {
                GenerationError::Decode { message, .. } => GenerationError::Decode {
                    tokens: steps,
                    message,
                },
                other => other,
            })
            .and_then(|bytes| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, bytes)?;
                Ok(path.to_path_buf())
            });

        match written {
            Ok(p) => {
                self.state = GenerationState::Done(p.clone());
                Ok(p)
            }
            Err(e) => {
                self.state = GenerationState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn sequence(&self) -> &[u32] {
        &self.sequence
    }

    pub fn into_sequence(self) -> Vec<u32> {
        self.sequence
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn stats(&self) -> GenerationStats {
        self.stats
    }
}
