use rstest::rstest;
use std::io::Write;
use tempfile::NamedTempFile;

use crate::config::*;
use crate::error::GenerationError;
use crate::tokenizer::VOCAB_SIZE;

fn small() -> MusicTransformerConfig {
    MusicTransformerConfig {
        vocab_size: 50,
        max_seq_len: 16,
        embed_dim: 16,
        num_heads: 4,
        ff_dim: 32,
        num_layers: 2,
        dropout: 0.0,
    }
}

#[test]
fn test_default_model_config() {
    let cfg = MusicTransformerConfig::default();
    assert_eq!(cfg.vocab_size, VOCAB_SIZE);
    assert_eq!(cfg.max_seq_len, 512);
    assert_eq!(cfg.head_dim(), 32);
    cfg.validate().unwrap();
}

#[rstest]
#[case::zero_layers(MusicTransformerConfig { num_layers: 0, ..small() })]
#[case::zero_len(MusicTransformerConfig { max_seq_len: 0, ..small() })]
#[case::heads_not_dividing(MusicTransformerConfig { num_heads: 3, ..small() })]
#[case::narrow_ff(MusicTransformerConfig { ff_dim: 16, ..small() })]
#[case::dropout_one(MusicTransformerConfig { dropout: 1.0, ..small() })]
#[case::tiny_vocab(MusicTransformerConfig { vocab_size: 2, ..small() })]
fn test_invalid_model_config(#[case] cfg: MusicTransformerConfig) {
    assert!(matches!(
        cfg.validate(),
        Err(GenerationError::Configuration(_))
    ));
}

#[test]
fn test_model_config_json_roundtrip() {
    let cfg = small();
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", serde_json::to_string(&cfg).unwrap()).unwrap();
    let loaded = MusicTransformerConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded, cfg);
}

#[test]
fn test_model_config_from_bad_json() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ \"vocab_size\": ").unwrap();
    let err = MusicTransformerConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, GenerationError::Configuration(_)));
}

#[test]
fn test_generation_defaults() {
    let cfg = GenerationConfig::default();
    assert_eq!(cfg.temperature, 1.0);
    assert_eq!(cfg.top_k, Some(50));
    assert_eq!(cfg.top_p, Some(0.9));
    assert_eq!(cfg.budget().steps(), 450);
    cfg.validate().unwrap();
}

#[test]
fn test_explicit_length_overrides_duration() {
    let cfg = GenerationConfig {
        length: Some(7),
        max_duration_secs: f64::NAN,
        ..Default::default()
    };
    assert_eq!(cfg.budget(), StepBudget::Tokens(7));
    cfg.validate().unwrap();
}

#[rstest]
#[case(1.0, 15.0, 15)]
#[case(2.5, 15.0, 37)]
#[case(0.0, 15.0, 0)]
#[case(10.0, 0.0, 0)]
fn test_duration_budget_floors(#[case] secs: f64, #[case] rate: f64, #[case] steps: usize) {
    let budget = StepBudget::Duration {
        seconds: secs,
        tokens_per_second: rate,
    };
    assert_eq!(budget.steps(), steps);
}

#[rstest]
#[case::zero_temperature(GenerationConfig { temperature: 0.0, ..Default::default() })]
#[case::negative_temperature(GenerationConfig { temperature: -0.5, ..Default::default() })]
#[case::infinite_temperature(GenerationConfig { temperature: f64::INFINITY, ..Default::default() })]
#[case::zero_top_p(GenerationConfig { top_p: Some(0.0), ..Default::default() })]
#[case::large_top_p(GenerationConfig { top_p: Some(1.01), ..Default::default() })]
#[case::negative_duration(GenerationConfig { max_duration_secs: -1.0, ..Default::default() })]
#[case::infinite_rate(GenerationConfig { tokens_per_second: f64::INFINITY, ..Default::default() })]
fn test_invalid_generation_config(#[case] cfg: GenerationConfig) {
    assert!(matches!(
        cfg.validate(),
        Err(GenerationError::Configuration(_))
    ));
}

#[test]
fn test_partial_generation_json_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "temperature": 0.8, "length": 32 }}"#).unwrap();
    let cfg = GenerationConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.temperature, 0.8);
    assert_eq!(cfg.length, Some(32));
    assert_eq!(cfg.top_k, Some(50));
    assert_eq!(cfg.output_dir, GenerationConfig::default().output_dir);
}

#[test]
fn test_forward_mode_default_is_inference() {
    assert_eq!(ForwardMode::default(), ForwardMode::Inference);
    assert!(!ForwardMode::Inference.is_training());
    assert!(ForwardMode::Training.is_training());
}
