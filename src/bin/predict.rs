//! Apply a model to a dataset and write the predictions.

use std::path::PathBuf;

use clap::Parser;

use canopy::dataset::csv::FormatRegistry;
use canopy::dataset::path::TypedPath;
use canopy::error::Error;
use canopy::model::load_model;
use canopy::{ForestModel, Task};

#[derive(Parser)]
#[command(about = "Apply a model to a dataset and write the predictions.")]
struct Args {
    /// Model directory.
    #[arg(long)]
    model: PathBuf,
    /// Typed path to the dataset to predict on.
    #[arg(long)]
    dataset: String,
    /// Typed path of the prediction output, e.g. csv:/tmp/predictions.csv.
    #[arg(long)]
    output: String,
}

fn run(args: Args) -> canopy::Result<()> {
    let model = load_model(&args.model)?;
    let spec = model.data_spec().clone();

    // Only the input features are required; the label may be absent.
    let required: Vec<String> = model
        .header()
        .input_features
        .iter()
        .filter_map(|&f| spec.columns.get(f as usize))
        .map(|c| c.name.clone())
        .collect();
    let typed = TypedPath::parse(&args.dataset)?;
    let dataset = FormatRegistry::builtin().read(&typed, &spec, &required)?;
    let predictions = model.predict(&dataset)?;

    // Column headers: one per class for classification (dict tokens, OOV
    // included), a single "prediction" column otherwise.
    let header: Vec<String> = match model.header().task {
        Task::Classification => {
            let dict = spec.column(model.header().label_col as usize)?.dict()?;
            (0..predictions.ncols()).map(|class| dict.token_of(class as i32).to_string()).collect()
        }
        _ => vec!["prediction".to_string()],
    };

    let output = TypedPath::parse_for_output(&args.output)?;
    if output.format != "csv" {
        return Err(Error::not_found(format!(
            "unknown prediction output format \"{}\"",
            output.format
        )));
    }
    let path = &output.paths[0];
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .map_err(|err| Error::invalid_argument(format!("cannot create \"{}\": {err}", path.display())))?;
    writer.write_record(&header)?;
    for row in predictions.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
