//! Tests for the decoder stack.
//!
//! Tests cover:
//! - Forward pass shape correctness
//! - Determinism in inference mode
//! - Causality at every position
//! - Last-position logits and their error cases

use approx::assert_abs_diff_eq;
use burn::tensor::{Int, Tensor};
use log::debug;

use crate::{
    backend::AutoBackend,
    config::{ForwardMode, MusicTransformerConfig},
    error::GenerationError,
    model::MusicTransformer,
};

type TestBackend = AutoBackend;

fn test_config() -> MusicTransformerConfig {
    MusicTransformerConfig {
        vocab_size: 40,
        max_seq_len: 12,
        embed_dim: 16,
        num_heads: 4,
        ff_dim: 32,
        num_layers: 2,
        dropout: 0.1,
    }
}

fn ids_tensor(ids: &[i64], device: &<TestBackend as burn::prelude::Backend>::Device) -> Tensor<TestBackend, 2, Int> {
    Tensor::<TestBackend, 1, Int>::from_ints(ids, device).reshape([1, ids.len()])
}

#[test]
fn test_forward_shape() {
    crate::init();
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);

    let idx = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 3, 4, 5, 6, 7, 8], &device)
        .reshape([2, 4]);
    let logits = model.forward(idx, ForwardMode::Inference);
    assert_eq!(logits.dims(), [2, 4, cfg.vocab_size]);
    assert_eq!(model.num_layers(), cfg.num_layers);
    assert_eq!(model.vocab_size(), cfg.vocab_size);
    assert_eq!(model.max_seq_len(), cfg.max_seq_len);
}

#[test]
fn test_inference_is_bit_identical() {
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);

    let ids = [3i64, 9, 27, 1, 0, 39];
    let a: Vec<f32> = model
        .forward(ids_tensor(&ids, &device), ForwardMode::Inference)
        .to_data()
        .to_vec()
        .unwrap();
    let b: Vec<f32> = model
        .forward(ids_tensor(&ids, &device), ForwardMode::Inference)
        .to_data()
        .to_vec()
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_logits_are_causal_at_every_position() {
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);
    let v = cfg.vocab_size;

    let base = [5i64, 11, 2, 30, 17, 8, 21];
    let full: Vec<f32> = model
        .forward(ids_tensor(&base, &device), ForwardMode::Inference)
        .to_data()
        .to_vec()
        .unwrap();

    for cut in 1..base.len() {
        let mut changed = base;
        for id in changed.iter_mut().skip(cut) {
            *id = (*id + 13) % v as i64;
        }
        let other: Vec<f32> = model
            .forward(ids_tensor(&changed, &device), ForwardMode::Inference)
            .to_data()
            .to_vec()
            .unwrap();
        for i in 0..cut * v {
            assert_abs_diff_eq!(full[i], other[i], epsilon = 1e-4);
        }
        debug!("positions < {cut} unchanged");
    }
}

#[test]
fn test_last_logits_matches_forward() {
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);
    let v = cfg.vocab_size;

    let window = [4u32, 8, 15, 16, 23];
    let ids: Vec<i64> = window.iter().map(|&x| x as i64).collect();
    let full: Vec<f32> = model
        .forward(ids_tensor(&ids, &device), ForwardMode::Inference)
        .to_data()
        .to_vec()
        .unwrap();
    let last = model.last_logits(&window, &device).unwrap();

    assert_eq!(last.len(), v);
    let offset = (window.len() - 1) * v;
    for i in 0..v {
        assert_abs_diff_eq!(last[i], full[offset + i], epsilon = 1e-6);
    }
}

#[test]
fn test_last_logits_rejects_bad_windows() {
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);

    let too_long = vec![1u32; cfg.max_seq_len + 1];
    let oov = [1u32, cfg.vocab_size as u32];
    for window in [&[][..], &too_long[..], &oov[..]] {
        assert!(matches!(
            model.last_logits(window, &device),
            Err(GenerationError::Prediction(_))
        ));
    }
}

#[test]
fn test_full_context_window_is_accepted() {
    let cfg = test_config();
    let device = Default::default();
    let model = MusicTransformer::<TestBackend>::new(&cfg, &device);

    let window: Vec<u32> = (0..cfg.max_seq_len as u32).collect();
    let logits = model.last_logits(&window, &device).unwrap();
    assert!(logits.iter().all(|l| l.is_finite()));
}

#[test]
fn test_try_new_rejects_invalid_config() {
    let cfg = MusicTransformerConfig {
        embed_dim: 18,
        ..test_config()
    };
    let device = Default::default();
    assert!(matches!(
        MusicTransformer::<TestBackend>::try_new(&cfg, &device),
        Err(GenerationError::Configuration(_))
    ));
}
