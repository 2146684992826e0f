//! Midiformer - autoregressive symbolic-music generation in Rust using Burn
//!
//! This library provides a causal Transformer decoder over MIDI event
//! tokens, a temperature / top-k / top-p sampler and a windowed generation
//! loop that turns a seed prompt into a new MIDI file.
// Copyright [2025] tuned.org.uk, Mec-iS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod backend;
pub mod causalattention;
pub mod checkpoint;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generate;
pub mod model;
pub mod sampling;
pub mod tokenizer;
pub use checkpoint::{load_checkpoint, save_checkpoint};

#[cfg(test)]
mod tests;

pub use backend::{AutoBackend, get_device, print_backend_info};
pub use config::{GenerationConfig, MusicTransformerConfig};
pub use error::GenerationError;

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        // Read RUST_LOG env variable, default to "debug" if not set
        let env = env_logger::Env::default().default_filter_or("debug");

        // don't panic if called multiple times across binaries
        let _ = env_logger::Builder::from_env(env)
            .is_test(true) // nicer formatting for tests
            .try_init();
    });
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        backend::{AutoBackend, get_device},
        config::{ForwardMode, GenerationConfig, MusicTransformerConfig},
        engine::{GenerationLoop, InferenceModel, NextTokenModel},
        generate::{GenerateResponse, generate_music},
        model::MusicTransformer,
        sampling::{SamplingParams, TokenRng, XorShift64, sample_next_token},
        tokenizer::{MidiEventCodec, TokenCodec},
    };
}
