use std::fmt::Write;

use crate::models::{LabelSummary, PredictionRow, STRESS_LEVELS};

pub fn build_report(labels: &[LabelSummary], predictions: &[PredictionRow]) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Stress Survey Report");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Severity Mix");

    if labels.is_empty() {
        let _ = writeln!(output, "No labels recorded yet.");
    } else {
        for level in STRESS_LEVELS {
            let (manual, pseudo) = labels
                .iter()
                .find(|s| s.level == level)
                .map_or((0, 0), |s| (s.manual_count, s.pseudo_count));
            let _ = writeln!(
                output,
                "- {}: {} labeled ({} manual, {} pseudo)",
                level,
                manual + pseudo,
                manual,
                pseudo
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Predictions");

    if predictions.is_empty() {
        let _ = writeln!(output, "No predictions recorded yet.");
    } else {
        for prediction in predictions {
            let _ = writeln!(
                output,
                "- {} predicted {} (p={:.4}, {}) on {}",
                prediction.respondent_email,
                prediction.prediction,
                prediction.probability,
                prediction.model_name,
                prediction.created_at.date_naive()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StressLevel;
    use chrono::Utc;

    #[test]
    fn lists_the_severity_mix() {
        let labels = vec![
            LabelSummary {
                level: StressLevel::Normal,
                manual_count: 2,
                pseudo_count: 3,
            },
            LabelSummary {
                level: StressLevel::Severe,
                manual_count: 1,
                pseudo_count: 0,
            },
        ];

        let report = build_report(&labels, &[]);
        assert!(report.contains("- normal: 5 labeled (2 manual, 3 pseudo)"));
        assert!(report.contains("- severe: 1 labeled (1 manual, 0 pseudo)"));
        assert!(report.contains("No predictions recorded yet."));
    }

    #[test]
    fn lists_recent_predictions() {
        let predictions = vec![PredictionRow {
            respondent_email: "ayu.pratiwi@example.edu".to_string(),
            model_name: "RandomForest".to_string(),
            prediction: StressLevel::Moderate,
            probability: 0.8125,
            created_at: Utc::now(),
        }];

        let report = build_report(&[], &predictions);
        assert!(report.contains("No labels recorded yet."));
        assert!(report.contains("ayu.pratiwi@example.edu predicted moderate (p=0.8125, RandomForest)"));
    }
}
