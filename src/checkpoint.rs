// src/checkpoint.rs

//! Checkpoint directory for a trained decoder.
//!
//! `config.json` describes the architecture and `model.mpk` holds the named
//! weight record, so a checkpoint restores without outside knowledge.

use anyhow::{Context, Result, bail, ensure};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::config::MusicTransformerConfig;
use crate::model::MusicTransformer;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.mpk";

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

fn paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(CONFIG_FILE), dir.join(WEIGHTS_FILE))
}

/// Writes `config` and the weights of `model`. The config must be valid and
/// describe the model being saved.
pub fn save_checkpoint<B: Backend>(
    model: &MusicTransformer<B>,
    config: &MusicTransformerConfig,
    checkpoint_dir: impl AsRef<Path>,
) -> Result<()> {
    config
        .validate()
        .context("Refusing to save an invalid architecture")?;
    ensure!(
        model.vocab_size() == config.vocab_size
            && model.max_seq_len() == config.max_seq_len
            && model.num_layers() == config.num_layers,
        "Model (vocab={}, max_seq_len={}, layers={}) does not match its config",
        model.vocab_size(),
        model.max_seq_len(),
        model.num_layers()
    );

    let dir = checkpoint_dir.as_ref();
    std::fs::create_dir_all(dir).context("Failed to create checkpoint directory")?;
    let (config_path, weights_path) = paths(dir);

    let config_file = File::create(&config_path)
        .with_context(|| format!("Failed to create config file: {:?}", config_path))?;
    serde_json::to_writer_pretty(BufWriter::new(config_file), config)
        .context("Failed to serialize config")?;

    model
        .clone()
        .save_file(weights_path, &Recorder::new())
        .context("Failed to save model record")?;

    info!("Checkpoint saved to {:?}", dir);
    Ok(())
}

/// Reads and validates the config, builds the decoder it describes, then
/// loads the weights into it.
pub fn load_checkpoint<B: Backend>(
    checkpoint_dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(MusicTransformer<B>, MusicTransformerConfig)> {
    let dir = checkpoint_dir.as_ref();
    if !dir.is_dir() {
        bail!("Checkpoint directory {:?} does not exist", dir);
    }
    let (config_path, weights_path) = paths(dir);

    let config_file = File::open(&config_path)
        .with_context(|| format!("Failed to open config file: {:?}", config_path))?;
    let config: MusicTransformerConfig = serde_json::from_reader(BufReader::new(config_file))
        .context("Failed to deserialize config")?;
    config
        .validate()
        .context("Checkpoint config is not a valid architecture")?;
    debug!("Checkpoint config: {:?}", config);

    ensure!(
        weights_path.is_file(),
        "Checkpoint {:?} has a config but no {}",
        dir,
        WEIGHTS_FILE
    );

    let model = MusicTransformer::<B>::new(&config, device)
        .load_file(weights_path, &Recorder::new(), device)
        .context("Failed to load model record")?;

    info!("Checkpoint loaded from {:?}", dir);
    Ok((model, config))
}
