//! Classifier training, model persistence and prediction

use std::fs;

use anyhow::Context;
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::data::{FeatureSet, StandardScaler};
use crate::forest::{RandomForest, RandomForestParams};

/// Gradient-descent iterations for the logistic fit
const LOGISTIC_MAX_ITER: usize = 500;
/// Gradient-descent step size; features are standardized first
const LOGISTIC_LEARNING_RATE: f64 = 0.1;

/// Logistic regression fitted by batch gradient descent on the sigmoid loss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Array1<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    /// Fit weights on a feature matrix and 0/1 targets
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>) -> Self {
        let n = x.nrows() as f64;
        let mut weights: Array1<f64> = Array1::zeros(x.ncols());
        let mut intercept = 0.0;

        for _ in 0..LOGISTIC_MAX_ITER {
            let scores = x.dot(&weights) + intercept;
            let probs = scores.mapv(sigmoid);
            let residual = &probs - y;

            let grad_w = x.t().dot(&residual) / n;
            let grad_b = residual.sum() / n;
            weights.scaled_add(-LOGISTIC_LEARNING_RATE, &grad_w);
            intercept -= LOGISTIC_LEARNING_RATE * grad_b;
        }

        Self { weights, intercept }
    }

    /// Positive-class probability per row
    pub fn predict_proba(&self, x: &Array2<f64>) -> Array1<f64> {
        (x.dot(&self.weights) + self.intercept).mapv(sigmoid)
    }

    /// Class labels (0.0 or 1.0) per row
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        self.predict_proba(x)
            .mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 })
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// The classifier half of a persisted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Classifier {
    Logistic(LogisticModel),
    Forest(RandomForest),
}

impl Classifier {
    /// Class labels (0.0 or 1.0) per row
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        match self {
            Classifier::Logistic(model) => model.predict(x),
            Classifier::Forest(model) => model.predict(x),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classifier::Logistic(_) => "logistic regression",
            Classifier::Forest(_) => "random forest",
        }
    }
}

/// Fitted scaler + classifier pair plus the feature schema it was fit on.
///
/// The only entity that outlives a process invocation: written by a train
/// run, read back by a predict run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub scaler: StandardScaler,
    pub classifier: Classifier,
    pub feature_names: Vec<String>,
}

impl ModelArtifact {
    /// Serialize to a file with bincode
    pub fn save(&self, path: &str) -> crate::Result<()> {
        let bytes = bincode::serialize(self).context("failed to serialize model artifact")?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write model artifact to '{}'", path))
    }

    /// Load a previously saved artifact
    pub fn load(path: &str) -> crate::Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read model artifact '{}'", path))?;
        bincode::deserialize(&bytes)
            .with_context(|| format!("model artifact '{}' is corrupt or incompatible", path))
    }

    /// Score a feature set: standardize, classify, exponentiate.
    ///
    /// The incoming columns must match the schema the model was trained on.
    pub fn predict(&self, features: &FeatureSet) -> crate::Result<Array1<f64>> {
        if features.feature_names != self.feature_names {
            anyhow::bail!(
                "feature columns {:?} do not match the columns the model was trained on {:?}",
                features.feature_names,
                self.feature_names
            );
        }
        let scaled = self.scaler.transform(&features.features);
        let raw = self.classifier.predict(&scaled);
        Ok(raw.mapv(f64::exp))
    }
}

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Use the random forest instead of logistic regression
    pub tree_model: bool,
    /// Fraction of rows held out for evaluation
    pub test_fraction: f64,
    /// Seed for the shuffle split and the forest bootstrap
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            tree_model: false,
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Held-out evaluation results.
///
/// R squared is kept as the legacy summary statistic even though it is a
/// regression metric applied to a boolean label; accuracy and F1 are the
/// classification-appropriate companions.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub r_squared: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Train a classifier on a labelled feature set.
///
/// Splits the rows with a seeded shuffle, fits the scaler on the training
/// partition only, fits the chosen classifier on the standardized training
/// rows and evaluates on the held-out rows.
pub fn train_model(
    features: &FeatureSet,
    options: &TrainOptions,
) -> crate::Result<(ModelArtifact, TrainReport)> {
    let x = &features.features;
    let labels = features
        .labels
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("training requires labelled data"))?;

    if x.nrows() != labels.len() {
        anyhow::bail!(
            "feature matrix has {} rows but label vector has {}",
            x.nrows(),
            labels.len()
        );
    }
    if x.nrows() < 2 {
        anyhow::bail!("training requires at least 2 rows, got {}", x.nrows());
    }
    if !(options.test_fraction > 0.0 && options.test_fraction < 1.0) {
        anyhow::bail!(
            "test fraction must be between 0 and 1, got {}",
            options.test_fraction
        );
    }

    let positives = labels.iter().filter(|&&c| c).count();
    if positives == 0 || positives == labels.len() {
        anyhow::bail!("all rows belong to a single churn class; cannot train a classifier");
    }

    let y = labels.mapv(|c| if c { 1.0 } else { 0.0 });

    // Seeded shuffle split
    let n = x.nrows();
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(options.seed));
    let test_len = ((n as f64 * options.test_fraction).round() as usize).clamp(1, n - 1);
    let (test_idx, train_idx) = indices.split_at(test_len);

    let x_train = x.select(Axis(0), train_idx);
    let y_train = y.select(Axis(0), train_idx);
    let x_test = x.select(Axis(0), test_idx);
    let y_test = y.select(Axis(0), test_idx);

    let scaler = StandardScaler::fit(&x_train);
    let x_train_scaled = scaler.transform(&x_train);
    let x_test_scaled = scaler.transform(&x_test);

    let classifier = if options.tree_model {
        let params = RandomForestParams {
            seed: options.seed,
            ..Default::default()
        };
        Classifier::Forest(RandomForest::fit(&x_train_scaled, &y_train, &params)?)
    } else {
        Classifier::Logistic(LogisticModel::fit(&x_train_scaled, &y_train))
    };

    let y_pred = classifier.predict(&x_test_scaled);
    let report = TrainReport {
        r_squared: r_squared(&y_test, &y_pred),
        accuracy: accuracy(&y_test, &y_pred),
        f1: f1_score(&y_test, &y_pred),
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
    };

    let artifact = ModelArtifact {
        scaler,
        classifier,
        feature_names: features.feature_names.clone(),
    };
    Ok((artifact, report))
}

/// Load a persisted model and score a feature set, exponentiating the output
pub fn predict_churn(features: &FeatureSet, model_input_path: &str) -> crate::Result<Array1<f64>> {
    let artifact = ModelArtifact::load(model_input_path)?;
    artifact.predict(features)
}

/// Coefficient of determination; 0.0 when the true values are constant
pub fn r_squared(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.sum() / y_true.len() as f64;
    let ss_tot: f64 = y_true.iter().map(|v| (v - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return 0.0;
    }
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    1.0 - ss_res / ss_tot
}

/// Fraction of correct class predictions
pub fn accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

/// Harmonic mean of precision and recall; 0.0 when undefined
pub fn f1_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut fne = 0.0;
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        match (*t == 1.0, *p == 1.0) {
            (true, true) => tp += 1.0,
            (false, true) => fp += 1.0,
            (true, false) => fne += 1.0,
            (false, false) => {}
        }
    }
    if tp == 0.0 {
        return 0.0;
    }
    let precision = tp / (tp + fp);
    let recall = tp / (tp + fne);
    2.0 * precision * recall / (precision + recall)
}
