//! Evaluate a model on a labeled dataset.

use std::path::PathBuf;

use clap::Parser;

use canopy::dataset::csv::FormatRegistry;
use canopy::dataset::path::TypedPath;
use canopy::dataset::ranking::RankingGroups;
use canopy::error::Error;
use canopy::metric::rmse;
use canopy::model::load_model;
use canopy::{ForestModel, Prediction, Task};

#[derive(Parser)]
#[command(about = "Evaluate a model on a labeled dataset.")]
struct Args {
    /// Model directory.
    #[arg(long)]
    model: PathBuf,
    /// Typed path to the evaluation dataset.
    #[arg(long)]
    dataset: String,
    /// Optional evaluation options file (key: value lines).
    #[arg(long)]
    options: Option<PathBuf>,
}

struct EvalOptions {
    ndcg_truncation: usize,
}

impl EvalOptions {
    fn from_path(path: &PathBuf) -> canopy::Result<Self> {
        let mut options = Self { ndcg_truncation: 5 };
        for line in std::fs::read_to_string(path)?.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::invalid_argument(format!("option line \"{line}\" is not key: value"))
            })?;
            match key.trim() {
                "ndcg_truncation" => {
                    options.ndcg_truncation = value.trim().parse().map_err(|_| {
                        Error::invalid_argument(format!("invalid ndcg_truncation \"{value}\""))
                    })?
                }
                other => {
                    return Err(Error::invalid_argument(format!(
                        "unknown evaluation option \"{other}\""
                    )))
                }
            }
        }
        Ok(options)
    }
}

fn run(args: Args) -> canopy::Result<()> {
    let model = load_model(&args.model)?;
    let options = match &args.options {
        Some(path) => EvalOptions::from_path(path)?,
        None => EvalOptions { ndcg_truncation: 5 },
    };
    let spec = model.data_spec().clone();
    let header = model.header();
    let label_name = spec.column(header.label_col as usize)?.name.clone();

    let mut required: Vec<String> = model
        .header()
        .input_features
        .iter()
        .filter_map(|&f| spec.columns.get(f as usize))
        .map(|c| c.name.clone())
        .collect();
    required.push(label_name);
    if let Some(group_col) = header.ranking_group_col {
        required.push(spec.column(group_col as usize)?.name.clone());
    }

    let typed = TypedPath::parse(&args.dataset)?;
    let dataset = FormatRegistry::builtin().read(&typed, &spec, &required)?;
    let weights = dataset.weights(header.weights_col.map(|c| c as usize))?;
    let n = dataset.num_rows() as usize;
    let label_col = header.label_col as usize;

    match header.task {
        Task::Classification => {
            let labels = dataset.categorical(label_col)?;
            let mut correct = 0.0f64;
            let mut sum_weights = 0.0f64;
            let mut log_loss = 0.0f64;
            for row in 0..n {
                let weight = weights[row] as f64;
                sum_weights += weight;
                match model.predict_row(&dataset, row)? {
                    Prediction::Classification { distribution, class } => {
                        if class == labels[row] {
                            correct += weight;
                        }
                        let p = distribution
                            .get(labels[row].max(0) as usize)
                            .copied()
                            .unwrap_or(0.0)
                            .max(1e-7) as f64;
                        log_loss -= weight * p.ln();
                    }
                    other => {
                        return Err(Error::internal(format!(
                            "unexpected prediction {other:?} for a classification task"
                        )))
                    }
                }
            }
            println!("accuracy: {:.6}", correct / sum_weights);
            println!("log-loss: {:.6}", log_loss / sum_weights);
        }
        Task::Regression => {
            let labels = dataset.numerical(label_col)?;
            let mut predictions = vec![0.0f32; n];
            for (row, prediction) in predictions.iter_mut().enumerate() {
                match model.predict_row(&dataset, row)? {
                    Prediction::Regression { value } => *prediction = value,
                    other => {
                        return Err(Error::internal(format!(
                            "unexpected prediction {other:?} for a regression task"
                        )))
                    }
                }
            }
            println!("rmse: {:.6}", rmse(labels, &predictions, &weights));
        }
        Task::Ranking => {
            let group_col = header.ranking_group_col.ok_or_else(|| {
                Error::failed_precondition("ranking model without a group column")
            })? as usize;
            let groups = RankingGroups::build(&dataset, label_col, group_col)?;
            let mut predictions = vec![0.0f32; n];
            for (row, prediction) in predictions.iter_mut().enumerate() {
                match model.predict_row(&dataset, row)? {
                    Prediction::Ranking { relevance } => *prediction = relevance,
                    other => {
                        return Err(Error::internal(format!(
                            "unexpected prediction {other:?} for a ranking task"
                        )))
                    }
                }
            }
            println!(
                "NDCG@{}: {:.6}",
                options.ndcg_truncation,
                groups.ndcg(&predictions, &weights, options.ndcg_truncation)
            );
        }
    }
    Ok(())
}

fn main() {
    if let Err(error) = run(Args::parse()) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
