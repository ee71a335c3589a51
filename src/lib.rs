//! ChurnForge: a Rust CLI application for ride-service churn prediction
//!
//! This library loads tabular user data, engineers churn features, trains a
//! binary classifier (logistic regression or random forest) and applies a
//! persisted model to new data.

pub mod cli;
pub mod data;
pub mod forest;
pub mod model;

// Re-export public items for easier access
pub use cli::{Args, Mode};
pub use data::{build_features, load_csv, FeatureSet, StandardScaler, FEATURE_COLUMNS};
pub use forest::RandomForest;
pub use model::{predict_churn, train_model, Classifier, ModelArtifact, TrainOptions, TrainReport};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
