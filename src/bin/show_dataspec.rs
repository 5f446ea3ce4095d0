//! Print a dataspec in a human-readable form.

use std::path::PathBuf;

use clap::Parser;

use canopy::DataSpec;

#[derive(Parser)]
#[command(about = "Display a dataspec.")]
struct Args {
    /// Dataspec file written by infer_dataspec.
    #[arg(long)]
    dataspec: PathBuf,
}

fn run(args: Args) -> canopy::Result<()> {
    let spec = DataSpec::load(&args.dataspec)?;
    print!("{}", spec.describe());
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
