//! Infer a dataspec from a dataset and write it to disk.

use std::path::PathBuf;

use clap::Parser;

use canopy::dataset::infer::{infer_data_spec, DataSpecGuide};
use canopy::dataset::path::TypedPath;

#[derive(Parser)]
#[command(about = "Infer the dataspec of a dataset.")]
struct Args {
    /// Typed path to the dataset, e.g. csv:/data/train.csv.
    #[arg(long)]
    dataset: String,
    /// Where to write the inferred dataspec.
    #[arg(long)]
    output: PathBuf,
    /// Optional dataspec guide file.
    #[arg(long)]
    guide: Option<PathBuf>,
}

fn run(args: Args) -> canopy::Result<()> {
    let typed = TypedPath::parse(&args.dataset)?;
    let guide = match &args.guide {
        Some(path) => DataSpecGuide::from_path(path)?,
        None => DataSpecGuide::default(),
    };
    let spec = infer_data_spec(&typed, &guide)?;
    spec.save(&args.output)?;
    println!("{}", spec.describe());
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
