//! Re-encode a dataset through a dataspec.

use std::path::PathBuf;

use clap::Parser;

use canopy::dataset::csv::FormatRegistry;
use canopy::dataset::path::TypedPath;
use canopy::DataSpec;

#[derive(Parser)]
#[command(about = "Re-encode a dataset through a dataspec.")]
struct Args {
    /// Typed path of the input dataset.
    #[arg(long)]
    input: String,
    /// Typed path of the output dataset.
    #[arg(long)]
    output: String,
    /// Dataspec describing the columns.
    #[arg(long)]
    dataspec: PathBuf,
}

fn run(args: Args) -> canopy::Result<()> {
    let spec = DataSpec::load(&args.dataspec)?;
    let registry = FormatRegistry::builtin();
    let input = TypedPath::parse(&args.input)?;
    let dataset = registry.read(&input, &spec, &[])?;
    let output = TypedPath::parse_for_output(&args.output)?;
    registry.write(&dataset, &output)?;
    eprintln!("wrote {} examples", dataset.num_rows());
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
