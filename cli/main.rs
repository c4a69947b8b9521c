#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use env_logger::{Builder, Env};
use std::path::PathBuf;
use std::process;

use cardiorisk::config::AnalysisConfig;
use cardiorisk::data::{LoadOptions, load_dataset};
use cardiorisk::model::FittedModel;
use cardiorisk::pipeline::run_analysis;
use cardiorisk::predict::{DEFAULT_THRESHOLD, predict_records};
use cardiorisk::report::{AssociationTable, write_predictions_tsv};
use cardiorisk::types::FeatureRecord;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Path to the cohort table with age, sex, thalach and target columns
    #[arg(value_name = "DATA_PATH")]
    pub data: PathBuf,

    /// TOML file overriding the default analysis settings
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Field separator of the data file (e.g. ',' or '\t')
    #[arg(long)]
    pub separator: Option<char>,

    /// Probability at or above which a case is predicted as disease
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Where to save the fitted model
    #[arg(long, value_name = "PATH", default_value = "model.toml")]
    pub model_out: PathBuf,

    /// Where to save per-record predictions
    #[arg(long, value_name = "PATH", default_value = "predictions.tsv")]
    pub predictions_out: PathBuf,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Path to a fitted model file (.toml)
    #[arg(long, value_name = "PATH")]
    pub model: PathBuf,

    /// A feature assignment such as age=45 or sex=Female; repeat for each predictor
    #[arg(long = "feature", value_name = "NAME=VALUE", required = true)]
    pub features: Vec<String>,

    /// Probability at or above which the case is labelled as disease
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,
}

#[derive(Parser)]
#[command(
    name = "cardiorisk",
    about = "Heart-disease risk factor analysis",
    long_about = "Tests candidate risk factors against a binary heart-disease outcome, fits a \
                 logistic regression, reports odds ratios with 95% confidence intervals and \
                 evaluates the model's classification performance."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis on a cohort table
    #[command(about = "Run the full analysis (outputs: model.toml, predictions.tsv)")]
    Analyze(AnalyzeArgs),

    /// Score a single case with a saved model
    #[command(about = "Predict the disease probability of one case")]
    Predict(PredictArgs),
}

pub fn analyze(args: AnalyzeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(separator) = args.separator {
        config.data.separator = separator;
    }
    if let Some(threshold) = args.threshold {
        config.prediction.threshold = threshold;
    }
    config.validate()?;

    println!("Loading data from: {}", args.data.display());
    let options: LoadOptions = config.load_options()?;
    let dataset = load_dataset(&args.data, &options)?;
    println!(
        "Loaded {} records with columns: {}",
        dataset.len(),
        dataset.column_names().join(", ")
    );

    let report = match run_analysis(&dataset, &config) {
        Ok(report) => report,
        Err(failure) => {
            if let Some(associations) = &failure.partial.associations {
                println!("\nAssociation tests completed before the failure:");
                println!(
                    "{}",
                    AssociationTable {
                        results: associations,
                        alpha: config.association.alpha,
                    }
                );
            }
            return Err(failure);
        }
    };

    println!("\n== Association tests ==");
    println!(
        "{}",
        AssociationTable {
            results: &report.associations,
            alpha: config.association.alpha,
        }
    );

    println!("\n== Model ==");
    println!("{}", report.model);

    println!("\n== Odds ratios (95% CI) ==");
    println!("{}", report.effects);

    if !report.what_if.is_empty() {
        println!("\n== What-if predictions ==");
        for query in &report.what_if {
            println!(
                "{}: probability {:.4} (predicted {})",
                query.features, query.probability, query.label
            );
        }
    }

    println!("\n== Classification performance (threshold {}) ==", config.prediction.threshold);
    println!("{}", report.evaluation);

    report.model.save(&args.model_out)?;
    println!("\nModel saved to: {}", args.model_out.display());

    let truth = report.scored.binary_column(&config.model.outcome)?;
    write_predictions_tsv(&args.predictions_out, &report.predictions, Some(&truth))?;
    println!("Predictions saved to: {}", args.predictions_out.display());
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model.display());
    let model = FittedModel::load(&args.model)?;

    let record = FeatureRecord::from_assignments(args.features.iter().map(String::as_str))?;
    let batch = predict_records(&model, std::slice::from_ref(&record), args.threshold)?;
    println!(
        "{}: probability {:.4} (predicted {} at threshold {})",
        record, batch.probabilities[0], batch.labels[0], batch.threshold
    );
    Ok(())
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Analyze(args)) => analyze(args),
        Some(Commands::Predict(args)) => predict(args),
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
