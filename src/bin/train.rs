//! Train a model and export it to disk.

use std::path::PathBuf;

use clap::Parser;

use canopy::dataset::csv::FormatRegistry;
use canopy::dataset::path::TypedPath;
use canopy::learner::logger::Verbosity;
use canopy::learner::{create_learner, Learner};
use canopy::model::save_model;
use canopy::{DataSpec, DeploymentConfig, TrainingConfig};

#[derive(Parser)]
#[command(about = "Train a model and export it to disk.")]
struct Args {
    /// Typed path to the training dataset, e.g. csv:/data/train.csv.
    #[arg(long)]
    dataset: String,
    /// Dataspec file, usually written by infer_dataspec.
    #[arg(long)]
    dataspec: PathBuf,
    /// Training configuration file.
    #[arg(long)]
    config: PathBuf,
    /// Output model directory.
    #[arg(long)]
    output: PathBuf,
    /// Optional deployment configuration file.
    #[arg(long)]
    deployment: Option<PathBuf>,
}

fn run(args: Args) -> canopy::Result<()> {
    let spec = DataSpec::load(&args.dataspec)?;
    let config = TrainingConfig::from_path(&args.config)?;
    let deployment = match &args.deployment {
        Some(path) => DeploymentConfig::from_path(path)?,
        None => DeploymentConfig::default(),
    };

    let typed = TypedPath::parse(&args.dataset)?;
    let mut required = vec![config.label.clone()];
    required.extend(config.ranking_group.iter().cloned());
    required.extend(config.weights.iter().cloned());
    required.extend(config.features.iter().cloned());
    let dataset = FormatRegistry::builtin().read(&typed, &spec, &required)?;

    let mut learner = create_learner(config, deployment)?;
    learner.set_verbosity(Verbosity::Info);
    eprintln!("training \"{}\" on {} examples", learner.name(), dataset.num_rows());
    let model = learner.train(&dataset)?;
    save_model(&args.output, model.as_ref())?;
    eprintln!("model saved to \"{}\"", args.output.display());
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
