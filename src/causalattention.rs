//! Causal self-attention, feed-forward and the post-norm decoder block.
//!
//! Key points:
//! - Single fused QKV projection split into heads of `embed_dim / num_heads`
//! - Lower-triangular mask (diagonal included) filled with a large negative
//!   before a max-subtracted softmax
//! - Dropout only under `ForwardMode::Training`

use burn::{
    module::Module,
    nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig},
    tensor::{Bool, Tensor, activation, backend::Backend},
};
use log::{debug, info, trace};

use crate::config::{ForwardMode, MusicTransformerConfig};

/// Fill value for blocked attention scores.
pub const MASK_FILL: f32 = -1.0e9;

/// `[1, 1, T, T]` broadcastable mask; `true` marks a future (blocked) key.
pub fn causal_mask<B: Backend>(t: usize, device: &B::Device) -> Tensor<B, 4, Bool> {
    // tril_mask is FALSE on and below the diagonal, TRUE above it.
    Tensor::<B, 2, Bool>::tril_mask([t, t], 0, device).unsqueeze::<4>()
}

pub(crate) fn kaiming() -> burn::nn::Initializer {
    burn::nn::Initializer::KaimingUniform {
        gain: 0.5,
        fan_out_only: false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Attention
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    layer_idx: usize,
    num_heads: usize,
    head_dim: usize,
    qkv: Linear<B>,
    out_proj: Linear<B>,
    attn_dropout: Dropout,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn new(cfg: &MusicTransformerConfig, layer_idx: usize, device: &B::Device) -> Self {
        let embed_dim = cfg.embed_dim;
        let num_heads = cfg.num_heads;
        assert_eq!(
            embed_dim % num_heads,
            0,
            "embed_dim must be divisible by num_heads"
        );
        let head_dim = cfg.head_dim();

        debug!(
            "Layer {}: Attn num_heads={}, head_dim={}",
            layer_idx, num_heads, head_dim
        );

        Self {
            layer_idx,
            num_heads,
            head_dim,
            qkv: LinearConfig::new(embed_dim, 3 * embed_dim)
                .with_initializer(kaiming())
                .init(device),
            out_proj: LinearConfig::new(embed_dim, embed_dim)
                .with_initializer(kaiming())
                .init(device),
            attn_dropout: DropoutConfig::new(cfg.dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, mode: ForwardMode) -> Tensor<B, 3> {
        let [b, t, c] = x.dims();
        trace!(
            "Layer {} attn forward: input [B={}, T={}, C={}]",
            self.layer_idx, b, t, c
        );

        let qkv = self.qkv.forward(x); // [B, T, 3C]
        let heads = |from: usize| {
            qkv.clone()
                .slice([0..b, 0..t, from..from + c])
                .reshape([b, t, self.num_heads, self.head_dim])
                .swap_dims(1, 2) // [B, H, T, D]
        };
        let q = heads(0);
        let k = heads(c);
        let v = heads(2 * c);

        let y = self.scaled_dot_product_attention(q, k, v, mode);

        // Merge heads: [B, H, T, D] -> [B, T, C]
        let y = y.swap_dims(1, 2).reshape([b, t, c]);
        self.out_proj.forward(y)
    }

    fn scaled_dot_product_attention(
        &self,
        q: Tensor<B, 4>, // [B, H, T, D]
        k: Tensor<B, 4>,
        v: Tensor<B, 4>,
        mode: ForwardMode,
    ) -> Tensor<B, 4> {
        let [b, h, t, d] = q.dims();

        let scale = (d as f32).sqrt();
        let att = q.matmul(k.swap_dims(2, 3)) / scale; // [B, H, T, T]

        let mask = causal_mask::<B>(t, &att.device()).expand([b, h, t, t]);
        let att = att.mask_fill(mask, MASK_FILL);
        trace!("Attn(L{}): causal mask applied", self.layer_idx);

        // softmax subtracts the row max internally
        let mut att = activation::softmax(att, 3);
        if mode.is_training() {
            att = self.attn_dropout.forward(att);
        }

        att.matmul(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Feed-forward (ReLU)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    fc_in: Linear<B>,
    fc_out: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(cfg: &MusicTransformerConfig, device: &B::Device) -> Self {
        debug!(
            "FeedForward init: embed_dim={}, ff_dim={}",
            cfg.embed_dim, cfg.ff_dim
        );
        Self {
            fc_in: LinearConfig::new(cfg.embed_dim, cfg.ff_dim)
                .with_initializer(kaiming())
                .init(device),
            fc_out: LinearConfig::new(cfg.ff_dim, cfg.embed_dim)
                .with_initializer(kaiming())
                .init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = activation::relu(self.fc_in.forward(x));
        self.fc_out.forward(x)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoder block (post-norm)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    layer_idx: usize,
    attn: CausalSelfAttention<B>,
    norm1: LayerNorm<B>,
    ffn: FeedForward<B>,
    norm2: LayerNorm<B>,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn new(cfg: &MusicTransformerConfig, layer_idx: usize, device: &B::Device) -> Self {
        info!("Initializing DecoderBlock {}", layer_idx);
        Self {
            layer_idx,
            attn: CausalSelfAttention::new(cfg, layer_idx, device),
            norm1: LayerNormConfig::new(cfg.embed_dim)
                .with_epsilon(1e-6)
                .init(device),
            ffn: FeedForward::new(cfg, device),
            norm2: LayerNormConfig::new(cfg.embed_dim)
                .with_epsilon(1e-6)
                .init(device),
            dropout1: DropoutConfig::new(cfg.dropout).init(),
            dropout2: DropoutConfig::new(cfg.dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>, mode: ForwardMode) -> Tensor<B, 3> {
        let mut attn_out = self.attn.forward(x.clone(), mode);
        if mode.is_training() {
            attn_out = self.dropout1.forward(attn_out);
        }
        let x = self.norm1.forward(x + attn_out);

        let mut ffn_out = self.ffn.forward(x.clone());
        if mode.is_training() {
            ffn_out = self.dropout2.forward(ffn_out);
        }
        let out = self.norm2.forward(x + ffn_out);
        trace!("Block {} output {:?}", self.layer_idx, out.dims());
        out
    }
}
