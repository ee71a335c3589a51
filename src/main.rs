//! ChurnForge: churn prediction CLI for ride-service user data
//!
//! This is the main entrypoint that orchestrates data loading, feature
//! engineering, model training and prediction.

use anyhow::Result;
use churnforge::{build_features, load_csv, predict_churn, train_model, Args, Mode, TrainOptions};
use clap::Parser;
use ndarray::Array1;
use std::fs;
use std::time::Instant;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    if args.verbose {
        println!("ChurnForge - Ride-Service Churn Prediction");
        println!("==========================================\n");
    }

    match args.mode {
        Mode::Train => run_train(&args),
        Mode::Predict => run_predict(&args),
    }
}

/// Train a model and persist the artifact
fn run_train(args: &Args) -> Result<()> {
    println!("=== Training Mode ===");

    let start_time = Instant::now();
    let reference_date = args.parse_reference_date()?;
    let separator = args.separator_byte()?;

    // Step 1: Load raw data
    if args.verbose {
        println!("\nStep 1: Loading data");
        println!("  Input file: {}", args.data);
    }
    let df = load_csv(&args.data, separator)?;
    println!("✓ Data loaded: {} rows", df.height());

    // Step 2: Build features and churn labels
    if args.verbose {
        println!("\nStep 2: Building features");
        println!("  Reference date: {}", reference_date);
    }
    let features = build_features(&df, reference_date, true)?;
    println!("✓ Features built: {:?}", features.features.shape());

    // Step 3: Fit the classifier
    if args.verbose {
        println!("\nStep 3: Training");
        println!(
            "  Classifier: {}",
            if args.tree_model {
                "random forest"
            } else {
                "logistic regression"
            }
        );
        println!("  Test fraction: {}", args.test_fraction);
        println!("  Seed: {}", args.seed);
    }
    let options = TrainOptions {
        tree_model: args.tree_model,
        test_fraction: args.test_fraction,
        seed: args.seed,
    };
    let (artifact, report) = train_model(&features, &options)?;
    println!(
        "✓ Model fitted on {} rows, evaluated on {}",
        report.train_rows, report.test_rows
    );

    // R squared is the legacy summary statistic; accuracy and F1 are the
    // classification-appropriate companions
    println!("\n=== Training Summary ===");
    println!("R squared = {:.2}", report.r_squared);
    println!("Accuracy  = {:.2}", report.accuracy);
    println!("F1 score  = {:.2}", report.f1);

    artifact.save(&args.model_output_path)?;

    let elapsed = start_time.elapsed();
    println!("\nModel saved to: {}", args.model_output_path);
    println!("Total processing time: {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Score new data with a persisted model
fn run_predict(args: &Args) -> Result<()> {
    println!("=== Prediction Mode ===");

    let start_time = Instant::now();
    let reference_date = args.parse_reference_date()?;
    let separator = args.separator_byte()?;

    if args.verbose {
        println!("\nLoading data from: {}", args.data);
    }
    let df = load_csv(&args.data, separator)?;
    println!("✓ Data loaded: {} rows", df.height());

    let features = build_features(&df, reference_date, false)?;
    if args.verbose {
        println!("  Features shape: {:?}", features.features.shape());
        println!("  Model: {}", args.model_input_path);
    }

    let predictions = predict_churn(&features, &args.model_input_path)?;
    write_predictions(&predictions, &args.output_file)?;

    let elapsed = start_time.elapsed();
    println!(
        "✓ {} predictions written to: {}",
        predictions.len(),
        args.output_file
    );
    println!("Total processing time: {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Write predictions as plain text, one value per line
fn write_predictions(predictions: &Array1<f64>, path: &str) -> Result<()> {
    let mut out = String::with_capacity(predictions.len() * 8);
    for value in predictions.iter() {
        out.push_str(&format!("{}\n", value));
    }
    fs::write(path, out)
        .map_err(|e| anyhow::anyhow!("failed to write predictions to '{}': {}", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_predictions() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        let predictions = array![1.0, std::f64::consts::E];

        write_predictions(&predictions, path).unwrap();

        let written = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].parse::<f64>().unwrap(), 1.0);
    }
}
