use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use midiformer::{
    backend::{AutoBackend, get_device, print_backend_info},
    config::{GenerationConfig, MusicTransformerConfig},
    engine::InferenceModel,
    generate::{GenerateResponse, generate_music},
    model::MusicTransformer,
    sampling::XorShift64,
    tokenizer::{MidiEventCodec, TokenCodec},
};

#[derive(Parser, Debug)]
#[command(name = "midiformer", version, about = "Symbolic music generation with a causal Transformer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a MIDI file from a trained checkpoint
    Generate {
        /// Checkpoint directory (config.json + model.mpk)
        #[arg(long)]
        checkpoint: PathBuf,
        /// Generation options as JSON; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output file name inside the output directory
        #[arg(long, default_value = "generated")]
        output: String,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// MIDI prompt
        #[arg(long)]
        seed_midi: Option<PathBuf>,
        /// Token budget (overrides the duration-derived budget)
        #[arg(long)]
        length: Option<usize>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        top_p: Option<f64>,
        #[arg(long)]
        rng_seed: Option<u64>,
    },
    /// Write a randomly initialised checkpoint
    Init {
        #[arg(long)]
        dir: PathBuf,
        /// Architecture as JSON; defaults otherwise
        #[arg(long)]
        model_config: Option<PathBuf>,
    },
    /// Print the token sequence of a MIDI file
    Encode { path: PathBuf },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Generate {
            checkpoint,
            config,
            output,
            output_dir,
            seed_midi,
            length,
            temperature,
            top_k,
            top_p,
            rng_seed,
        } => {
            let mut gen_cfg = match config {
                Some(path) => GenerationConfig::from_file(&path)?,
                None => GenerationConfig::default(),
            };
            if let Some(dir) = output_dir {
                gen_cfg.output_dir = dir;
            }
            if seed_midi.is_some() {
                gen_cfg.seed_source = seed_midi;
            }
            if length.is_some() {
                gen_cfg.length = length;
            }
            if let Some(t) = temperature {
                gen_cfg.temperature = t;
            }
            if top_k.is_some() {
                gen_cfg.top_k = top_k;
            }
            if top_p.is_some() {
                gen_cfg.top_p = top_p;
            }
            if rng_seed.is_some() {
                gen_cfg.rng_seed = rng_seed;
            }

            print_backend_info();
            let result = InferenceModel::<AutoBackend>::load(&checkpoint, get_device())
                .and_then(|model| {
                    let rng = gen_cfg
                        .rng_seed
                        .map(XorShift64::new)
                        .unwrap_or_else(XorShift64::from_entropy);
                    generate_music(&model, &MidiEventCodec::new(), &gen_cfg, &output, rng)
                });

            let response = GenerateResponse::from(&result);
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
        Command::Init { dir, model_config } => {
            let cfg = match model_config {
                Some(path) => MusicTransformerConfig::from_file(&path)?,
                None => MusicTransformerConfig::default(),
            };
            cfg.validate()?;
            let model = MusicTransformer::<AutoBackend>::new(&cfg, &get_device());
            model
                .save_checkpoint(&cfg, &dir)
                .with_context(|| format!("Failed to write checkpoint to {:?}", dir))?;
            println!("Initialised checkpoint at {}", dir.display());
        }
        Command::Encode { path } => {
            let tokens = MidiEventCodec::new().encode_seed(&path)?;
            println!("{}", serde_json::to_string(&tokens)?);
        }
    }

    Ok(())
}
