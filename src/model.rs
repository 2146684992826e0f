//! Decoder stack: embedding, N decoder blocks, vocabulary projection.

use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{Int, Tensor, TensorData, backend::Backend},
};
use log::{debug, info};
use std::path::Path;

use crate::causalattention::{DecoderBlock, kaiming};
use crate::config::{ForwardMode, MusicTransformerConfig};
use crate::embedding::TokenEmbedding;
use crate::error::{GenerationError, Result};

#[derive(Module, Debug)]
pub struct MusicTransformer<B: Backend> {
    embedding: TokenEmbedding<B>,
    blocks: Vec<DecoderBlock<B>>,
    lm_head: Linear<B>,
    vocab_size: usize,
    max_seq_len: usize,
}

impl<B: Backend> MusicTransformer<B> {
    /// Builds a freshly initialised model. Panics on an invalid config;
    /// use [`MusicTransformer::try_new`] for untrusted input.
    pub fn new(cfg: &MusicTransformerConfig, device: &B::Device) -> Self {
        info!("═══════════════════════════════════════");
        info!("Initializing MusicTransformer");
        info!("  vocab_size: {}", cfg.vocab_size);
        info!("  max_seq_len: {}", cfg.max_seq_len);
        info!("  embed_dim: {}", cfg.embed_dim);
        info!("  num_heads: {}", cfg.num_heads);
        info!("  ff_dim: {}", cfg.ff_dim);
        info!("  num_layers: {}", cfg.num_layers);
        info!("  dropout: {}", cfg.dropout);
        info!("═══════════════════════════════════════");

        let embedding = TokenEmbedding::new(cfg, device);
        let blocks = (0..cfg.num_layers)
            .map(|i| DecoderBlock::new(cfg, i, device))
            .collect();
        let lm_head = LinearConfig::new(cfg.embed_dim, cfg.vocab_size)
            .with_initializer(kaiming())
            .init(device);

        Self {
            embedding,
            blocks,
            lm_head,
            vocab_size: cfg.vocab_size,
            max_seq_len: cfg.max_seq_len,
        }
    }

    pub fn try_new(cfg: &MusicTransformerConfig, device: &B::Device) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::new(cfg, device))
    }

    /// `[B, T]` ids -> `[B, T, vocab_size]` logits.
    pub fn forward(&self, idx: Tensor<B, 2, Int>, mode: ForwardMode) -> Tensor<B, 3> {
        let [b, t] = idx.dims();
        assert!(t > 0, "Sequence length must be > 0");
        debug!("MusicTransformer.forward: input [B={}, T={}], {:?}", b, t, mode);

        let mut x = self.embedding.forward(idx);
        for block in self.blocks.iter() {
            x = block.forward(x, mode);
        }
        self.lm_head.forward(x)
    }

    /// Logits at the last position of a single window, in inference mode.
    pub fn last_logits(&self, window: &[u32], device: &B::Device) -> Result<Vec<f32>> {
        if window.is_empty() {
            return Err(GenerationError::Prediction("empty context window".into()));
        }
        if window.len() > self.max_seq_len {
            return Err(GenerationError::Prediction(format!(
                "window of {} tokens exceeds max_seq_len {}",
                window.len(),
                self.max_seq_len
            )));
        }
        if let Some(&bad) = window.iter().find(|&&id| id as usize >= self.vocab_size) {
            return Err(GenerationError::Prediction(format!(
                "token {bad} outside vocabulary of {}",
                self.vocab_size
            )));
        }

        let t = window.len();
        let ids: Vec<i64> = window.iter().map(|&id| id as i64).collect();
        let idx = Tensor::<B, 2, Int>::from_data(TensorData::new(ids, [1, t]), device);

        let logits = self.forward(idx, ForwardMode::Inference);
        let v = self.vocab_size;
        logits
            .slice([0..1, (t - 1)..t, 0..v])
            .reshape([v])
            .to_data()
            .to_vec::<f32>()
            .map_err(|e| GenerationError::Prediction(format!("cannot read logits: {e:?}")))
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Save this model and its config to a checkpoint directory
    pub fn save_checkpoint(
        &self,
        config: &MusicTransformerConfig,
        checkpoint_dir: impl AsRef<Path>,
    ) -> anyhow::Result<()> {
        crate::checkpoint::save_checkpoint(self, config, checkpoint_dir)
    }

    /// Load a model from checkpoint directory
    pub fn load_checkpoint(
        checkpoint_dir: impl AsRef<Path>,
        device: &B::Device,
    ) -> anyhow::Result<(Self, MusicTransformerConfig)> {
        crate::checkpoint::load_checkpoint(checkpoint_dir, device)
    }
}
