// src/embedding.rs

//! Token lookup plus a fixed sinusoidal position signal.

use burn::{
    module::Module,
    nn::{Embedding, EmbeddingConfig},
    tensor::{Int, Tensor, TensorData, backend::Backend},
};
use log::debug;

use crate::config::MusicTransformerConfig;

/// Row-major `[max_len, dim]` table.
///
/// For position `p` and dimension `i` the angle is
/// `p / 10000^(2*(i/2)/dim)`; even dimensions take `sin`, odd ones `cos`.
pub fn sinusoidal_table(max_len: usize, dim: usize) -> Vec<f32> {
    let mut table = Vec::with_capacity(max_len * dim);
    for p in 0..max_len {
        for i in 0..dim {
            let exponent = (2 * (i / 2)) as f64 / dim as f64;
            let angle = p as f64 / 10000f64.powf(exponent);
            let v = if i % 2 == 0 { angle.sin() } else { angle.cos() };
            table.push(v as f32);
        }
    }
    table
}

#[derive(Module, Debug)]
pub struct TokenEmbedding<B: Backend> {
    token: Embedding<B>,
    positional: Tensor<B, 2>,
    max_seq_len: usize,
    embed_dim: usize,
}

impl<B: Backend> TokenEmbedding<B> {
    pub fn new(cfg: &MusicTransformerConfig, device: &B::Device) -> Self {
        debug!(
            "Embedding init: vocab={}, embed_dim={}, max_seq_len={}",
            cfg.vocab_size, cfg.embed_dim, cfg.max_seq_len
        );
        let table = sinusoidal_table(cfg.max_seq_len, cfg.embed_dim);
        let positional = Tensor::<B, 2>::from_data(
            TensorData::new(table, [cfg.max_seq_len, cfg.embed_dim]),
            device,
        );

        Self {
            token: EmbeddingConfig::new(cfg.vocab_size, cfg.embed_dim).init(device),
            positional,
            max_seq_len: cfg.max_seq_len,
            embed_dim: cfg.embed_dim,
        }
    }

    /// `[B, T]` ids -> `[B, T, C]`. `T` must not exceed `max_seq_len`;
    /// callers window the sequence first.
    pub fn forward(&self, idx: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [b, t] = idx.dims();
        assert!(
            t <= self.max_seq_len,
            "sequence length {} exceeds max_seq_len {}",
            t,
            self.max_seq_len
        );

        let x = self.token.forward(idx);
        let pe = self
            .positional
            .clone()
            .slice([0..t, 0..self.embed_dim])
            .unsqueeze::<3>()
            .expand([b, t, self.embed_dim]);
        x + pe
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }
}
