//! Generate tokens from a Qwen2 checkpoint with the native engine.
//!
//! Run with:
//! ```bash
//! LLAISYS_PATH=/opt/llaisys cargo run -p llaisys --features native --example generate -- \
//!     /path/to/qwen2 [--gpu N] [--max-new-tokens N] 151644 872 198
//! ```
//!
//! Trailing arguments are prompt token ids.

use anyhow::{bail, Context};
use llaisys::prelude::*;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let model_dir = args.next().context("usage: generate <model_dir> [options] <token ids...>")?;

    let mut device = Device::cpu();
    let mut max_new_tokens = 32;
    let mut prompt = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--gpu" => {
                let ordinal = args.next().context("--gpu needs an ordinal")?;
                device = Device::nvidia(ordinal.parse().context("invalid GPU ordinal")?);
            }
            "--max-new-tokens" => {
                let n = args.next().context("--max-new-tokens needs a value")?;
                max_new_tokens = n.parse().context("invalid --max-new-tokens")?;
            }
            id => prompt.push(id.parse::<i64>().with_context(|| format!("invalid token id {id}"))?),
        }
    }
    if prompt.is_empty() {
        bail!("no prompt token ids given");
    }

    let start = Instant::now();
    let model = Model::<NativeModel>::construct(&model_dir, device)?;
    let report = model.load_report();
    println!(
        "Loaded {} slots from {} files in {:.2?} ({} tensors ignored, {} converted)",
        report.slots_written,
        report.files,
        start.elapsed(),
        report.ignored,
        report.converted
    );

    let start = Instant::now();
    let config = GenerationConfig::new(max_new_tokens);
    let output = model.generate_with(&prompt, &config, None)?;
    let elapsed = start.elapsed();

    println!("Prompt:    {:?}", &output.tokens[..output.prompt_len]);
    println!("Generated: {:?}", output.new_tokens());
    println!(
        "{} tokens in {:.2?} ({:.1} tok/s), stopped by {:?}",
        output.generated,
        elapsed,
        output.generated as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        output.stop_reason
    );
    Ok(())
}
