//! Display a trained model.

use std::path::PathBuf;

use clap::Parser;

use canopy::model::load_model;
use canopy::ForestModel;

#[derive(Parser)]
#[command(about = "Display a trained model.")]
struct Args {
    /// Model directory.
    #[arg(long)]
    model: PathBuf,
    /// List the inference engines able to run the model.
    #[arg(long)]
    engines: bool,
    /// Print every tree of the forest.
    #[arg(long)]
    full_definition: bool,
}

fn run(args: Args) -> canopy::Result<()> {
    let model = load_model(&args.model)?;
    print!("{}", model.describe(args.full_definition));
    if args.engines {
        // The generic tree-walking engine is the only one in this binary.
        println!("Engines: generic");
    }
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
