//! Measure the inference speed of a model.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use canopy::dataset::csv::FormatRegistry;
use canopy::dataset::path::TypedPath;
use canopy::model::load_model;
use canopy::ForestModel;

#[derive(Parser)]
#[command(about = "Measure the inference speed of a model.")]
struct Args {
    /// Model directory.
    #[arg(long)]
    model: PathBuf,
    /// Typed path to the benchmark dataset.
    #[arg(long)]
    dataset: String,
    /// Timed passes over the dataset.
    #[arg(long, default_value_t = 20)]
    num_runs: usize,
    /// Untimed passes before the measurement.
    #[arg(long, default_value_t = 2)]
    warmup_runs: usize,
}

fn run(args: Args) -> canopy::Result<()> {
    let model = load_model(&args.model)?;
    let spec = model.data_spec().clone();
    let required: Vec<String> = model
        .header()
        .input_features
        .iter()
        .filter_map(|&f| spec.columns.get(f as usize))
        .map(|c| c.name.clone())
        .collect();
    let typed = TypedPath::parse(&args.dataset)?;
    let dataset = FormatRegistry::builtin().read(&typed, &spec, &required)?;

    for _ in 0..args.warmup_runs {
        let _ = model.predict(&dataset)?;
    }
    let started = Instant::now();
    for _ in 0..args.num_runs {
        let _ = model.predict(&dataset)?;
    }
    let elapsed = started.elapsed();

    let total_rows = dataset.num_rows() * args.num_runs as u64;
    let per_example = elapsed.as_secs_f64() / total_rows as f64;
    println!("engine: generic");
    println!("num runs: {}", args.num_runs);
    println!("total time: {:.3}s", elapsed.as_secs_f64());
    println!("time per example: {:.3}us", per_example * 1e6);
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
