//! Data loading and churn feature engineering using Polars

use std::collections::BTreeSet;

use anyhow::Context;
use chrono::NaiveDate;
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Feature columns fed to the classifier, in training order.
///
/// `city_Astapor` and `phone_Other` are the dropped reference categories.
pub const FEATURE_COLUMNS: [&str; 12] = [
    "avg_dist",
    "avg_rating_by_driver",
    "avg_rating_of_driver",
    "avg_surge",
    "surge_pct",
    "trips_in_first_30_days",
    "luxury_car_user",
    "weekday_pct",
    "city_King's Landing",
    "city_Winterfell",
    "phone_Android",
    "phone_iPhone",
];

/// Users whose last trip is more than this many days before the reference
/// date are labeled as churned.
pub const CHURN_WINDOW_DAYS: i64 = 30;

const CITY_CATEGORIES: [&str; 2] = ["King's Landing", "Winterfell"];
const CITY_REFERENCE: &str = "Astapor";
const PHONE_CATEGORIES: [&str; 2] = ["Android", "iPhone"];
const PHONE_REFERENCE: &str = "Other";

/// Model-ready features for one batch of raw records
#[derive(Debug)]
pub struct FeatureSet {
    /// Feature matrix (n_rows, 12), columns ordered as `FEATURE_COLUMNS`
    pub features: Array2<f64>,
    /// Churn labels, present only when built with labels
    pub labels: Option<Array1<bool>>,
    /// Column names of `features`, used for schema checks at prediction time
    pub feature_names: Vec<String>,
}

/// Standardizes features to zero mean and unit variance.
///
/// Fitted on the training partition only; persisted inside the model
/// artifact so prediction applies the same transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Array1<f64>,
    pub stds: Array1<f64>,
}

impl StandardScaler {
    /// Fit means and standard deviations column-wise
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means = x.sum_axis(Axis(0)) / n;
        let mut stds = Array1::zeros(x.ncols());
        for j in 0..x.ncols() {
            let var = x
                .column(j)
                .iter()
                .map(|v| (v - means[j]).powi(2))
                .sum::<f64>()
                / n;
            stds[j] = var.sqrt();
        }
        // Constant columns pass through unscaled
        stds.mapv_inplace(|s| if s > 0.0 { s } else { 1.0 });
        Self { means, stds }
    }

    /// Apply the fitted transform to a matrix with the same column layout
    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.to_owned();
        for mut row in out.rows_mut() {
            row -= &self.means;
            row /= &self.stds;
        }
        out
    }
}

/// Load a delimited text file into a DataFrame
///
/// # Arguments
/// * `path` - Path to the input file (header row required)
/// * `separator` - Field separator byte
pub fn load_csv(path: &str, separator: u8) -> crate::Result<DataFrame> {
    let df = CsvReader::from_path(path)
        .with_context(|| format!("failed to open data file '{}'", path))?
        .has_header(true)
        .with_separator(separator)
        .finish()
        .with_context(|| format!("failed to parse data file '{}'", path))?;

    if df.height() == 0 {
        anyhow::bail!("no data rows found in '{}'", path);
    }

    Ok(df)
}

/// Build the model-ready feature matrix from raw records
///
/// Steps, in order: parse dates, impute missing ratings with the batch mean,
/// fill missing phone values with "Other", one-hot encode city and phone
/// against the fixed vocabulary (reference categories dropped), then when
/// `with_labels` derive churn from days since the last trip relative to
/// `reference_date`.
pub fn build_features(
    df: &DataFrame,
    reference_date: NaiveDate,
    with_labels: bool,
) -> crate::Result<FeatureSet> {
    let n = df.height();

    let last_trip = date_column(df, "last_trip_date")?;
    // signup_date is validated as part of the raw schema; no feature uses it
    date_column(df, "signup_date")?;

    let rating_by = impute_mean(
        numeric_column(df, "avg_rating_by_driver")?,
        "avg_rating_by_driver",
    )?;
    let rating_of = impute_mean(
        numeric_column(df, "avg_rating_of_driver")?,
        "avg_rating_of_driver",
    )?;

    let avg_dist = required_numeric(df, "avg_dist")?;
    let avg_surge = required_numeric(df, "avg_surge")?;
    let surge_pct = required_numeric(df, "surge_pct")?;
    let trips_30 = required_numeric(df, "trips_in_first_30_days")?;
    let luxury = required_numeric(df, "luxury_car_user")?;
    let weekday_pct = required_numeric(df, "weekday_pct")?;

    let city = one_hot(df, "city", &CITY_CATEGORIES, CITY_REFERENCE, None)?;
    let phone = one_hot(
        df,
        "phone",
        &PHONE_CATEGORIES,
        PHONE_REFERENCE,
        Some(PHONE_REFERENCE),
    )?;

    let columns: Vec<&Vec<f64>> = vec![
        &avg_dist,
        &rating_by,
        &rating_of,
        &avg_surge,
        &surge_pct,
        &trips_30,
        &luxury,
        &weekday_pct,
        &city[0],
        &city[1],
        &phone[0],
        &phone[1],
    ];

    let mut data = Vec::with_capacity(n * columns.len());
    for i in 0..n {
        for col in &columns {
            data.push(col[i]);
        }
    }
    let features = Array2::from_shape_vec((n, columns.len()), data)?;

    if features.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("feature matrix contains non-finite values after encoding");
    }

    let labels = if with_labels {
        let churn: Vec<bool> = last_trip
            .iter()
            .map(|d| reference_date.signed_duration_since(*d).num_days() > CHURN_WINDOW_DAYS)
            .collect();
        Some(Array1::from_vec(churn))
    } else {
        None
    };

    Ok(FeatureSet {
        features,
        labels,
        feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
    })
}

/// Extract a column of `%Y-%m-%d` dates, failing on missing or malformed values
fn date_column(df: &DataFrame, name: &str) -> crate::Result<Vec<NaiveDate>> {
    let series = df
        .column(name)
        .with_context(|| format!("missing required column '{}'", name))?;
    let ca = series
        .utf8()
        .with_context(|| format!("column '{}' must contain date strings", name))?;

    let mut dates = Vec::with_capacity(df.height());
    for value in ca.into_iter() {
        let value =
            value.ok_or_else(|| anyhow::anyhow!("column '{}' contains missing dates", name))?;
        let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .with_context(|| format!("column '{}' has malformed date '{}'", name, value))?;
        dates.push(date);
    }
    Ok(dates)
}

/// Extract a column as f64 values, keeping nulls as `None`.
///
/// Boolean and True/False text columns map to 1.0/0.0 so flags like
/// `luxury_car_user` survive whichever way the CSV reader inferred them.
fn numeric_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    let series = df
        .column(name)
        .with_context(|| format!("missing required column '{}'", name))?;

    match series.dtype() {
        DataType::Float64 | DataType::Float32 | DataType::Int64 | DataType::Int32
        | DataType::UInt64 | DataType::UInt32 => {
            let cast = series
                .cast(&DataType::Float64)
                .with_context(|| format!("column '{}' is not numeric", name))?;
            Ok(cast.f64()?.into_iter().collect())
        }
        DataType::Boolean => Ok(series
            .bool()?
            .into_iter()
            .map(|v| v.map(|b| if b { 1.0 } else { 0.0 }))
            .collect()),
        DataType::Utf8 => series
            .utf8()?
            .into_iter()
            .map(|v| match v {
                None => Ok(None),
                Some(text) => match text.trim() {
                    t if t.eq_ignore_ascii_case("true") => Ok(Some(1.0)),
                    t if t.eq_ignore_ascii_case("false") => Ok(Some(0.0)),
                    t => t.parse::<f64>().map(Some).map_err(|_| {
                        anyhow::anyhow!("non-numeric value '{}' in column '{}'", text, name)
                    }),
                },
            })
            .collect(),
        dtype => anyhow::bail!("column '{}' has unsupported type {:?}", name, dtype),
    }
}

/// Extract a numeric column that must not contain missing values
fn required_numeric(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    numeric_column(df, name)?
        .into_iter()
        .map(|v| v.ok_or_else(|| anyhow::anyhow!("column '{}' contains missing values", name)))
        .collect()
}

/// Replace missing values with the mean of the non-missing values in the batch
fn impute_mean(values: Vec<Option<f64>>, name: &str) -> crate::Result<Vec<f64>> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        anyhow::bail!("column '{}' has no values to impute from", name);
    }
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    Ok(values.into_iter().map(|v| v.unwrap_or(mean)).collect())
}

/// One-hot encode a categorical column against a fixed vocabulary.
///
/// Returns one indicator vector per category in `categories`, in order. The
/// reference category encodes as all zeros. Values outside the vocabulary
/// also encode as all zeros but are reported on stderr, once per distinct
/// value, instead of being dropped silently.
fn one_hot(
    df: &DataFrame,
    name: &str,
    categories: &[&str],
    reference: &str,
    missing_fill: Option<&str>,
) -> crate::Result<Vec<Vec<f64>>> {
    let series = df
        .column(name)
        .with_context(|| format!("missing required column '{}'", name))?;
    let ca = series
        .utf8()
        .with_context(|| format!("column '{}' must be categorical text", name))?;

    let n = df.height();
    let mut indicators = vec![vec![0.0; n]; categories.len()];
    let mut unknown = BTreeSet::new();

    for (i, value) in ca.into_iter().enumerate() {
        let value = match (value, missing_fill) {
            (Some(v), _) => v.trim(),
            (None, Some(fill)) => fill,
            (None, None) => {
                anyhow::bail!("column '{}' contains missing values", name)
            }
        };

        if let Some(pos) = categories.iter().position(|c| *c == value) {
            indicators[pos][i] = 1.0;
        } else if value != reference {
            unknown.insert(value.to_string());
        }
    }

    for value in &unknown {
        eprintln!(
            "warning: unknown {} category '{}' encoded as all-zero indicators",
            name, value
        );
    }

    Ok(indicators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "last_trip_date,signup_date,avg_rating_by_driver,avg_rating_of_driver,\
avg_dist,avg_surge,surge_pct,trips_in_first_30_days,luxury_car_user,weekday_pct,city,phone";

    fn create_test_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2014, 7, 1).unwrap()
    }

    #[test]
    fn test_feature_columns_and_order() {
        let file = create_test_csv(&[
            "2014-06-17,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,True,46.2,King's Landing,iPhone",
            "2014-05-05,2014-01-25,4.9,5.0,8.26,1.0,0.0,0,False,50.0,Astapor,Android",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let set = build_features(&df, reference_date(), true).unwrap();

        assert_eq!(set.features.shape(), &[2, 12]);
        assert_eq!(set.feature_names, FEATURE_COLUMNS.to_vec());
        assert!(set.labels.is_some());

        // Row 0: King's Landing / iPhone
        assert_eq!(set.features[[0, 8]], 1.0);
        assert_eq!(set.features[[0, 9]], 0.0);
        assert_eq!(set.features[[0, 10]], 0.0);
        assert_eq!(set.features[[0, 11]], 1.0);
        // luxury_car_user True -> 1.0
        assert_eq!(set.features[[0, 6]], 1.0);
        assert_eq!(set.features[[1, 6]], 0.0);
    }

    #[test]
    fn test_churn_boundary() {
        // 2014-06-01 is exactly 30 days before the reference: not churned.
        // 2014-05-31 is 31 days before: churned.
        let file = create_test_csv(&[
            "2014-06-01,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
            "2014-05-31,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
            "2014-07-01,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let set = build_features(&df, reference_date(), true).unwrap();

        let labels = set.labels.unwrap();
        assert!(!labels[0]);
        assert!(labels[1]);
        assert!(!labels[2]);
    }

    #[test]
    fn test_mean_imputation() {
        let file = create_test_csv(&[
            "2014-06-17,2014-01-10,4.0,5.0,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
            "2014-06-17,2014-01-10,,5.0,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
            "2014-06-17,2014-01-10,5.0,5.0,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let set = build_features(&df, reference_date(), true).unwrap();

        // Missing avg_rating_by_driver becomes the mean of 4.0 and 5.0
        assert!((set.features[[1, 1]] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_reference_categories_all_zero() {
        let file = create_test_csv(&[
            "2014-06-17,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Astapor,",
            "2014-06-17,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Winterfell,iPhone",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let set = build_features(&df, reference_date(), false).unwrap();

        // Astapor city and missing phone (filled as Other) are the dropped
        // reference categories: all four indicators stay zero
        assert_eq!(set.features[[0, 8]], 0.0);
        assert_eq!(set.features[[0, 9]], 0.0);
        assert_eq!(set.features[[0, 10]], 0.0);
        assert_eq!(set.features[[0, 11]], 0.0);
        assert!(set.labels.is_none());
    }

    #[test]
    fn test_unknown_category_encodes_all_zero() {
        let file = create_test_csv(&[
            "2014-06-17,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Braavos,iPhone",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let set = build_features(&df, reference_date(), true).unwrap();

        assert_eq!(set.features[[0, 8]], 0.0);
        assert_eq!(set.features[[0, 9]], 0.0);
    }

    #[test]
    fn test_missing_required_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "last_trip_date,signup_date,avg_dist").unwrap();
        writeln!(file, "2014-06-17,2014-01-10,3.67").unwrap();

        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        let result = build_features(&df, reference_date(), true);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_date() {
        let file = create_test_csv(&[
            "17/06/2014,2014-01-10,5.0,4.7,3.67,1.1,15.4,4,1,46.2,Astapor,iPhone",
        ]);
        let df = load_csv(file.path().to_str().unwrap(), b',').unwrap();
        assert!(build_features(&df, reference_date(), true).is_err());
    }

    #[test]
    fn test_tab_separator() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER.replace(',', "\t")).unwrap();
        writeln!(
            file,
            "2014-06-17\t2014-01-10\t5.0\t4.7\t3.67\t1.1\t15.4\t4\t1\t46.2\tWinterfell\tAndroid"
        )
        .unwrap();

        let df = load_csv(file.path().to_str().unwrap(), b'\t').unwrap();
        let set = build_features(&df, reference_date(), false).unwrap();
        assert_eq!(set.features[[0, 9]], 1.0);
        assert_eq!(set.features[[0, 10]], 1.0);
    }

    #[test]
    fn test_missing_file() {
        assert!(load_csv("/nonexistent/churn.csv", b',').is_err());
    }

    #[test]
    fn test_standard_scaler() {
        let x = Array2::from_shape_vec((4, 2), vec![1.0, 10.0, 2.0, 10.0, 3.0, 10.0, 4.0, 10.0])
            .unwrap();
        let scaler = StandardScaler::fit(&x);
        let scaled = scaler.transform(&x);

        // First column standardizes to zero mean, unit variance
        let mean: f64 = scaled.column(0).iter().sum::<f64>() / 4.0;
        let var: f64 = scaled.column(0).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-12);

        // Constant column passes through centered but unscaled
        for v in scaled.column(1).iter() {
            assert_eq!(*v, 0.0);
        }
    }
}
