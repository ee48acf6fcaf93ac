use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StressLevel {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "mild")]
    Mild,
    #[serde(rename = "moderate")]
    Moderate,
    #[serde(rename = "severe")]
    Severe,
    #[serde(rename = "extremely severe")]
    ExtremelySevere,
}

pub const STRESS_LEVELS: [StressLevel; 5] = [
    StressLevel::Normal,
    StressLevel::Mild,
    StressLevel::Moderate,
    StressLevel::Severe,
    StressLevel::ExtremelySevere,
];

impl StressLevel {
    /// Ordinal rank used for the MAE/RMSE error metrics.
    pub fn rank(self) -> u8 {
        match self {
            StressLevel::Normal => 0,
            StressLevel::Mild => 1,
            StressLevel::Moderate => 2,
            StressLevel::Severe => 3,
            StressLevel::ExtremelySevere => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StressLevel::Normal => "normal",
            StressLevel::Mild => "mild",
            StressLevel::Moderate => "moderate",
            StressLevel::Severe => "severe",
            StressLevel::ExtremelySevere => "extremely severe",
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StressLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(StressLevel::Normal),
            "mild" => Ok(StressLevel::Mild),
            "moderate" => Ok(StressLevel::Moderate),
            "severe" => Ok(StressLevel::Severe),
            "extremely severe" => Ok(StressLevel::ExtremelySevere),
            other => Err(PipelineError::UnknownLabel(other.to_string())),
        }
    }
}

/// Typed handle for the question category the classifier is trained on,
/// resolved once at command entry. `question_ids` is sorted ascending and
/// defines the feature vector layout.
#[derive(Debug, Clone)]
pub struct StressCategory {
    pub id: i32,
    pub question_ids: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub respondent_id: Uuid,
    pub question_id: i32,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub respondent_id: Uuid,
    pub features: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    Manual,
    Pseudo,
}

#[derive(Debug, Clone)]
pub struct LabeledRow {
    pub respondent_id: Uuid,
    pub features: Vec<i32>,
    pub label: StressLevel,
    pub source: LabelSource,
}

#[derive(Debug, Clone)]
pub struct RespondentPrediction {
    pub respondent_id: Uuid,
    pub level: StressLevel,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub accuracy: f64,
    pub mae: f64,
    pub rmse: f64,
    pub train_count: usize,
    pub test_count: usize,
    pub report: BTreeMap<String, ClassMetrics>,
}

#[derive(Debug, Clone)]
pub struct LabelSummary {
    pub level: StressLevel,
    pub manual_count: i64,
    pub pseudo_count: i64,
}

#[derive(Debug, Clone)]
pub struct PredictionRow {
    pub respondent_email: String,
    pub model_name: String,
    pub prediction: StressLevel,
    pub probability: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_severity_order() {
        let ranks: Vec<u8> = STRESS_LEVELS.iter().map(|l| l.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn level_round_trips_through_store_text() {
        for level in STRESS_LEVELS {
            assert_eq!(level.as_str().parse::<StressLevel>().unwrap(), level);
        }
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!("panicked".parse::<StressLevel>().is_err());
    }
}
