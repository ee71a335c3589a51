//! Command-line interface definitions and argument parsing

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

/// Pipeline mode: fit a new model or score new data with a saved one
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Fit a classifier and persist the model artifact
    Train,
    /// Load a model artifact and write predictions
    Predict,
}

/// Churn prediction CLI for ride-service user data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// train or predict
    #[arg(value_enum)]
    pub mode: Mode,

    /// Path to the delimited input data file
    #[arg(long)]
    pub data: String,

    /// File to save the serialized model artifact to
    #[arg(long = "model_output_path", default_value = "model.joblib")]
    pub model_output_path: String,

    /// Model artifact to load for prediction
    #[arg(long = "model_input_path", default_value = "model.joblib")]
    pub model_input_path: String,

    /// Where to save the model predictions
    #[arg(long = "output_file", default_value = "predictions.txt")]
    pub output_file: String,

    /// Use the random forest classifier instead of logistic regression
    #[arg(long = "tree_model")]
    pub tree_model: bool,

    /// Field separator for the input file (single character; `\t` or `tab` for tabs)
    #[arg(long, default_value = ",")]
    pub separator: String,

    /// Reference date for churn labeling, YYYY-MM-DD
    #[arg(long = "reference_date", default_value = "2014-07-01")]
    pub reference_date: String,

    /// Fraction of rows held out for evaluation during training
    #[arg(long = "test_fraction", default_value_t = 0.2)]
    pub test_fraction: f64,

    /// Seed for the train/test split and the forest bootstrap
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Resolve the separator flag to a single byte
    pub fn separator_byte(&self) -> crate::Result<u8> {
        match self.separator.as_str() {
            "\\t" | "tab" => Ok(b'\t'),
            s if s.len() == 1 && s.is_ascii() => Ok(s.as_bytes()[0]),
            s => anyhow::bail!("separator must be a single ASCII character, got '{}'", s),
        }
    }

    /// Parse the churn reference date flag
    pub fn parse_reference_date(&self) -> crate::Result<NaiveDate> {
        NaiveDate::parse_from_str(&self.reference_date, "%Y-%m-%d").map_err(|e| {
            anyhow::anyhow!("invalid reference date '{}': {}", self.reference_date, e)
        })
    }
}
