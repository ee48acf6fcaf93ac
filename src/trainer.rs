use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::forest::{ForestParams, RandomForest};
use crate::models::{
    ClassMetrics, EvaluationSummary, LabeledRow, RespondentPrediction, StressLevel,
};

pub const MODEL_NAME: &str = "RandomForest";
pub const TEST_FRACTION: f64 = 0.25;

/// Maps the distinct labels of a training set to dense integer codes,
/// ordered by severity rank so the encoding is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<StressLevel>,
}

impl LabelEncoder {
    pub fn fit(labels: &[StressLevel]) -> Self {
        let classes: Vec<StressLevel> = labels
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self { classes }
    }

    pub fn encode(&self, level: StressLevel) -> Option<usize> {
        self.classes.iter().position(|&c| c == level)
    }

    /// `code` must come from this encoder's `0..n_classes()` range.
    pub fn decode(&self, code: usize) -> StressLevel {
        self.classes[code]
    }

    pub fn classes(&self) -> &[StressLevel] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}

/// 75/25 stratified partition, reproducible for a fixed seed. The held-out
/// quota is `ceil(n * test_fraction)`, spread across classes by largest
/// remainder with at least one row of every class on each side.
pub fn stratified_split<T: Copy + Ord + fmt::Display>(
    labels: &[T],
    test_fraction: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>), PipelineError> {
    let mut by_class: BTreeMap<T, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(i);
    }

    if by_class.len() < 2 {
        return Err(PipelineError::Stratification(format!(
            "need at least two label classes, found {}",
            by_class.len()
        )));
    }
    if let Some((label, _)) = by_class.iter().find(|(_, members)| members.len() < 2) {
        return Err(PipelineError::Stratification(format!(
            "label class {label:?} has only one example",
            label = label.to_string()
        )));
    }

    let n = labels.len();
    let n_test = ((n as f64) * test_fraction).ceil() as usize;
    let classes: Vec<(T, Vec<usize>)> = by_class.into_iter().collect();

    let mut quotas = Vec::with_capacity(classes.len());
    let mut remainders = Vec::with_capacity(classes.len());
    for (_, members) in &classes {
        let exact = members.len() as f64 * n_test as f64 / n as f64;
        quotas.push((exact.floor() as usize).clamp(1, members.len() - 1));
        remainders.push(exact - exact.floor());
    }

    let mut order: Vec<usize> = (0..classes.len()).collect();
    order.sort_by(|&a, &b| {
        remainders[b]
            .partial_cmp(&remainders[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut assigned: usize = quotas.iter().sum();
    while assigned < n_test {
        let before = assigned;
        for &ci in &order {
            if assigned == n_test {
                break;
            }
            if quotas[ci] < classes[ci].1.len() - 1 {
                quotas[ci] += 1;
                assigned += 1;
            }
        }
        if assigned == before {
            break;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for ((_, mut members), quota) in classes.into_iter().zip(quotas) {
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..quota]);
        train.extend_from_slice(&members[quota..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Ok((train, test))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn accuracy_percent(y_true: &[usize], y_pred: &[usize]) -> f64 {
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    round_to(correct as f64 / y_true.len() as f64 * 100.0, 2)
}

pub fn classification_report(
    y_true: &[usize],
    y_pred: &[usize],
    encoder: &LabelEncoder,
) -> BTreeMap<String, ClassMetrics> {
    let mut report = BTreeMap::new();
    for code in 0..encoder.n_classes() {
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == code, p == code) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }

        let precision = if tp + fp == 0 {
            0.0
        } else {
            tp as f64 / (tp + fp) as f64
        };
        let recall = if tp + fn_ == 0 {
            0.0
        } else {
            tp as f64 / (tp + fn_) as f64
        };
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        report.insert(
            encoder.decode(code).to_string(),
            ClassMetrics {
                precision,
                recall,
                f1,
                support: tp + fn_,
            },
        );
    }
    report
}

/// MAE and RMSE over severity ranks, each rounded to 3 decimals.
pub fn ordinal_errors(y_true: &[usize], y_pred: &[usize], encoder: &LabelEncoder) -> (f64, f64) {
    let deltas: Vec<f64> = y_true
        .iter()
        .zip(y_pred)
        .map(|(&t, &p)| {
            f64::from(encoder.decode(t).rank()) - f64::from(encoder.decode(p).rank())
        })
        .collect();

    let n = deltas.len() as f64;
    let mae = deltas.iter().map(|d| d.abs()).sum::<f64>() / n;
    let rmse = (deltas.iter().map(|d| d * d).sum::<f64>() / n).sqrt();
    (round_to(mae, 3), round_to(rmse, 3))
}

/// The fitted forest and its encoder, bundled so a later run could score
/// without retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_name: String,
    pub trained_at: DateTime<Utc>,
    pub forest: RandomForest,
    pub encoder: LabelEncoder,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[derive(Debug)]
pub struct TrainOutput {
    pub summary: EvaluationSummary,
    pub predictions: Vec<RespondentPrediction>,
    pub artifact: ModelArtifact,
}

/// Fits the forest on a stratified training partition, evaluates on the
/// held-out partition, then re-scores the entire dataset for persistence.
pub fn train_and_evaluate(rows: &[LabeledRow], seed: u64) -> Result<TrainOutput, PipelineError> {
    let labels: Vec<StressLevel> = rows.iter().map(|r| r.label).collect();
    let encoder = LabelEncoder::fit(&labels);

    let mut y = Vec::with_capacity(rows.len());
    for &label in &labels {
        let code = encoder
            .encode(label)
            .ok_or_else(|| PipelineError::UnknownLabel(label.to_string()))?;
        y.push(code);
    }
    let x: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| r.features.iter().map(|&v| f64::from(v)).collect())
        .collect();

    let (train_idx, test_idx) = stratified_split(&labels, TEST_FRACTION, seed)?;

    let x_train: Vec<Vec<f64>> = train_idx.iter().map(|&i| x[i].clone()).collect();
    let y_train: Vec<usize> = train_idx.iter().map(|&i| y[i]).collect();
    let params = ForestParams {
        seed,
        ..ForestParams::default()
    };
    let forest = RandomForest::fit(&x_train, &y_train, encoder.n_classes(), &params);

    let x_test: Vec<Vec<f64>> = test_idx.iter().map(|&i| x[i].clone()).collect();
    let y_test: Vec<usize> = test_idx.iter().map(|&i| y[i]).collect();
    let y_pred = forest.predict_batch(&x_test);

    let accuracy = accuracy_percent(&y_test, &y_pred);
    let report = classification_report(&y_test, &y_pred, &encoder);
    let (mae, rmse) = ordinal_errors(&y_test, &y_pred, &encoder);

    let predictions: Vec<RespondentPrediction> = rows
        .iter()
        .zip(&x)
        .map(|(row, features)| {
            let pred = forest.predict_with_votes(features);
            RespondentPrediction {
                respondent_id: row.respondent_id,
                level: encoder.decode(pred.class),
                probability: round_to(pred.confidence, 4),
            }
        })
        .collect();

    let summary = EvaluationSummary {
        accuracy,
        mae,
        rmse,
        train_count: train_idx.len(),
        test_count: test_idx.len(),
        report,
    };
    let artifact = ModelArtifact {
        model_name: MODEL_NAME.to_string(),
        trained_at: Utc::now(),
        forest,
        encoder,
    };

    Ok(TrainOutput {
        summary,
        predictions,
        artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{categorize_stress, pseudo_score};
    use crate::models::LabelSource;
    use uuid::Uuid;

    fn labeled_row(features: Vec<i32>, label: StressLevel, source: LabelSource) -> LabeledRow {
        LabeledRow {
            respondent_id: Uuid::new_v4(),
            features,
            label,
            source,
        }
    }

    fn pseudo_row(features: Vec<i32>) -> LabeledRow {
        let label = categorize_stress(pseudo_score(&features));
        labeled_row(features, label, LabelSource::Pseudo)
    }

    // 20 complete respondents: 8 normal, 6 mild, 4 moderate, 2 severe
    fn pseudo_labeled_set() -> Vec<LabeledRow> {
        let mut rows = Vec::new();
        for i in 0..8 {
            let spread = i % 3;
            rows.push(pseudo_row(vec![spread, 0, 1, 0, spread, 1, 0]));
        }
        for i in 0..6 {
            let spread = i % 2;
            rows.push(pseudo_row(vec![2, 1, 1, 1 + spread, 1, 1, 1]));
        }
        for i in 0..4 {
            let spread = i % 3;
            rows.push(pseudo_row(vec![2, 2, 1, 2, 1 + spread, 1, 1]));
        }
        for i in 0..2 {
            rows.push(pseudo_row(vec![2, 2, 2, 2, 2, 2, 1 + i]));
        }
        rows
    }

    #[test]
    fn encoder_orders_classes_by_severity() {
        let encoder = LabelEncoder::fit(&[
            StressLevel::Severe,
            StressLevel::Normal,
            StressLevel::Severe,
            StressLevel::Mild,
        ]);
        assert_eq!(
            encoder.classes(),
            &[StressLevel::Normal, StressLevel::Mild, StressLevel::Severe]
        );
    }

    #[test]
    fn encoder_round_trips_codes() {
        let encoder = LabelEncoder::fit(&[StressLevel::Moderate, StressLevel::Normal]);
        for &level in encoder.classes() {
            let code = encoder.encode(level).unwrap();
            assert_eq!(encoder.decode(code), level);
        }
        assert_eq!(encoder.encode(StressLevel::Severe), None);
    }

    #[test]
    fn split_preserves_class_proportions() {
        let mut labels = Vec::new();
        labels.extend(std::iter::repeat(StressLevel::Normal).take(8));
        labels.extend(std::iter::repeat(StressLevel::Mild).take(6));
        labels.extend(std::iter::repeat(StressLevel::Moderate).take(4));
        labels.extend(std::iter::repeat(StressLevel::Severe).take(2));

        let (train, test) = stratified_split(&labels, TEST_FRACTION, 42).unwrap();
        assert_eq!(train.len(), 15);
        assert_eq!(test.len(), 5);

        let test_count = |level: StressLevel| test.iter().filter(|&&i| labels[i] == level).count();
        assert_eq!(test_count(StressLevel::Normal), 2);
        assert_eq!(test_count(StressLevel::Mild), 1);
        assert_eq!(test_count(StressLevel::Moderate), 1);
        assert_eq!(test_count(StressLevel::Severe), 1);
    }

    #[test]
    fn split_is_a_partition() {
        let labels: Vec<StressLevel> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    StressLevel::Normal
                } else {
                    StressLevel::Severe
                }
            })
            .collect();

        let (train, test) = stratified_split(&labels, TEST_FRACTION, 3).unwrap();
        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn split_is_reproducible_for_a_seed() {
        let labels: Vec<StressLevel> = (0..20)
            .map(|i| {
                if i % 3 == 0 {
                    StressLevel::Mild
                } else {
                    StressLevel::Normal
                }
            })
            .collect();

        let a = stratified_split(&labels, TEST_FRACTION, 42).unwrap();
        let b = stratified_split(&labels, TEST_FRACTION, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_class_cannot_be_stratified() {
        let labels = vec![StressLevel::Normal; 10];
        let err = stratified_split(&labels, TEST_FRACTION, 42).unwrap_err();
        assert!(matches!(err, PipelineError::Stratification(_)));
    }

    #[test]
    fn singleton_class_cannot_be_stratified() {
        // two manual labels, one example each: the documented failure path
        let rows = vec![
            labeled_row(vec![0, 0, 1, 0, 0, 1, 0], StressLevel::Normal, LabelSource::Manual),
            labeled_row(vec![3, 2, 3, 2, 3, 2, 3], StressLevel::Severe, LabelSource::Manual),
        ];
        let err = train_and_evaluate(&rows, 42).unwrap_err();
        assert!(matches!(err, PipelineError::Stratification(_)));
    }

    #[test]
    fn accuracy_is_a_rounded_percentage() {
        assert_eq!(accuracy_percent(&[0, 1, 2], &[0, 1, 1]), 66.67);
        assert_eq!(accuracy_percent(&[0, 1], &[0, 1]), 100.0);
        assert_eq!(accuracy_percent(&[0, 1], &[1, 0]), 0.0);
    }

    #[test]
    fn rmse_dominates_mae() {
        let encoder = LabelEncoder::fit(&[
            StressLevel::Normal,
            StressLevel::Mild,
            StressLevel::Moderate,
            StressLevel::Severe,
            StressLevel::ExtremelySevere,
        ]);
        let y_true = vec![0, 1, 2, 3, 4];
        let y_pred = vec![1, 1, 2, 4, 2];

        let (mae, rmse) = ordinal_errors(&y_true, &y_pred, &encoder);
        assert_eq!(mae, 0.8);
        assert_eq!(rmse, 1.095);
        assert!(rmse >= mae);
    }

    #[test]
    fn perfect_predictions_have_zero_error() {
        let encoder = LabelEncoder::fit(&[StressLevel::Normal, StressLevel::Severe]);
        let (mae, rmse) = ordinal_errors(&[0, 1, 1], &[0, 1, 1], &encoder);
        assert_eq!(mae, 0.0);
        assert_eq!(rmse, 0.0);
    }

    #[test]
    fn report_covers_every_encoded_class() {
        let encoder = LabelEncoder::fit(&[StressLevel::Normal, StressLevel::Mild]);
        let report = classification_report(&[0, 0, 1, 1], &[0, 1, 1, 1], &encoder);

        assert_eq!(report.len(), 2);
        let normal = &report["normal"];
        assert_eq!(normal.support, 2);
        assert!((normal.precision - 1.0).abs() < f64::EPSILON);
        assert!((normal.recall - 0.5).abs() < f64::EPSILON);

        let mild = &report["mild"];
        assert_eq!(mild.support, 2);
        assert!((mild.recall - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pseudo_labeled_set_trains_end_to_end() {
        let rows = pseudo_labeled_set();
        assert_eq!(rows.len(), 20);

        let output = train_and_evaluate(&rows, 42).unwrap();
        let summary = &output.summary;

        assert_eq!(summary.train_count + summary.test_count, 20);
        assert_eq!(summary.train_count, 15);
        assert_eq!(summary.test_count, 5);
        assert!((0.0..=100.0).contains(&summary.accuracy));
        assert!(summary.mae >= 0.0);
        assert!(summary.rmse >= summary.mae);

        assert_eq!(output.predictions.len(), 20);
        for prediction in &output.predictions {
            assert!(prediction.probability > 0.0 && prediction.probability <= 1.0);
        }
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        let rows = pseudo_labeled_set();
        let a = train_and_evaluate(&rows, 42).unwrap();
        let b = train_and_evaluate(&rows, 42).unwrap();

        assert_eq!(a.summary.accuracy, b.summary.accuracy);
        assert_eq!(a.summary.mae, b.summary.mae);
        for (pa, pb) in a.predictions.iter().zip(&b.predictions) {
            assert_eq!(pa.level, pb.level);
            assert!((pa.probability - pb.probability).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn artifact_round_trips_through_json() {
        let rows = pseudo_labeled_set();
        let output = train_and_evaluate(&rows, 42).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress_model.json");
        output.artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded.model_name, MODEL_NAME);
        assert_eq!(loaded.encoder.classes(), output.artifact.encoder.classes());
        for row in &rows {
            let features: Vec<f64> = row.features.iter().map(|&v| f64::from(v)).collect();
            assert_eq!(
                loaded.forest.predict(&features),
                output.artifact.forest.predict(&features)
            );
        }
    }
}
