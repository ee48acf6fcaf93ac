use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::models::{AnswerRecord, FeatureRow, LabelSource, LabeledRow, StressLevel};

/// Severity cut-points for the 7-item stress subscale, applied to
/// `sum(answers) * 2` so the standard 21-item thresholds carry over.
pub fn categorize_stress(score: i64) -> StressLevel {
    match score {
        s if s <= 14 => StressLevel::Normal,
        s if s <= 18 => StressLevel::Mild,
        s if s <= 25 => StressLevel::Moderate,
        s if s <= 33 => StressLevel::Severe,
        _ => StressLevel::ExtremelySevere,
    }
}

pub fn pseudo_score(features: &[i32]) -> i64 {
    features.iter().map(|&v| i64::from(v)).sum::<i64>() * 2
}

/// One feature vector per respondent with exactly one parseable answer for
/// every stress question, ordered by question id ascending. Respondents with
/// missing, duplicated, or non-numeric answers are excluded, not repaired.
pub fn build_feature_rows(question_ids: &[i32], answers: &[AnswerRecord]) -> Vec<FeatureRow> {
    let mut by_respondent: BTreeMap<Uuid, Vec<&AnswerRecord>> = BTreeMap::new();
    for answer in answers {
        if !question_ids.contains(&answer.question_id) {
            continue;
        }
        by_respondent
            .entry(answer.respondent_id)
            .or_default()
            .push(answer);
    }

    let mut rows = Vec::new();
    'respondents: for (respondent_id, mut respondent_answers) in by_respondent {
        if respondent_answers.len() != question_ids.len() {
            continue;
        }
        respondent_answers.sort_by_key(|a| a.question_id);

        let mut features = Vec::with_capacity(question_ids.len());
        for (answer, &question_id) in respondent_answers.iter().zip(question_ids) {
            // a duplicated question id leaves some other question uncovered
            if answer.question_id != question_id {
                continue 'respondents;
            }
            match answer.value.trim().parse::<i32>() {
                Ok(value) => features.push(value),
                Err(_) => continue 'respondents,
            }
        }

        rows.push(FeatureRow {
            respondent_id,
            features,
        });
    }

    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPolicy {
    ManualOnly,
    AllowPseudo,
}

/// Resolve one training label per eligible respondent: a manual label wins
/// outright; otherwise the scoring rule applies when pseudo-labeling is
/// allowed; otherwise the respondent contributes nothing this run.
pub fn resolve_labels(
    rows: &[FeatureRow],
    manual: &HashMap<Uuid, StressLevel>,
    policy: LabelPolicy,
) -> Vec<LabeledRow> {
    let mut labeled = Vec::new();
    for row in rows {
        let (label, source) = match manual.get(&row.respondent_id) {
            Some(&level) => (level, LabelSource::Manual),
            None if policy == LabelPolicy::AllowPseudo => (
                categorize_stress(pseudo_score(&row.features)),
                LabelSource::Pseudo,
            ),
            None => continue,
        };
        labeled.push(LabeledRow {
            respondent_id: row.respondent_id,
            features: row.features.clone(),
            label,
            source,
        });
    }
    labeled
}

/// Rows to materialize in the pseudo-label pre-pass: one per complete
/// respondent. The store's partial unique index makes the insert idempotent.
pub fn pseudo_labels(rows: &[FeatureRow]) -> Vec<(Uuid, StressLevel)> {
    rows.iter()
        .map(|row| {
            (
                row.respondent_id,
                categorize_stress(pseudo_score(&row.features)),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTIONS: [i32; 3] = [10, 11, 12];

    fn answer(respondent: Uuid, question_id: i32, value: &str) -> AnswerRecord {
        AnswerRecord {
            respondent_id: respondent,
            question_id,
            value: value.to_string(),
        }
    }

    fn complete_answers(respondent: Uuid, values: [&str; 3]) -> Vec<AnswerRecord> {
        QUESTIONS
            .iter()
            .zip(values)
            .map(|(&q, v)| answer(respondent, q, v))
            .collect()
    }

    #[test]
    fn excludes_respondents_with_incomplete_answers() {
        let complete = Uuid::new_v4();
        let partial = Uuid::new_v4();
        let mut answers = complete_answers(complete, ["0", "1", "2"]);
        answers.push(answer(partial, 10, "3"));

        let rows = build_feature_rows(&QUESTIONS, &answers);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].respondent_id, complete);
    }

    #[test]
    fn orders_features_by_question_id() {
        let respondent = Uuid::new_v4();
        let answers = vec![
            answer(respondent, 12, "3"),
            answer(respondent, 10, "1"),
            answer(respondent, 11, "2"),
        ];

        let rows = build_feature_rows(&QUESTIONS, &answers);
        assert_eq!(rows[0].features, vec![1, 2, 3]);
    }

    #[test]
    fn skips_respondents_with_unparseable_answers() {
        let respondent = Uuid::new_v4();
        let rows = build_feature_rows(&QUESTIONS, &complete_answers(respondent, ["0", "often", "2"]));
        assert!(rows.is_empty());
    }

    #[test]
    fn duplicate_answers_make_a_respondent_ineligible() {
        let respondent = Uuid::new_v4();
        let mut answers = complete_answers(respondent, ["0", "1", "2"]);
        answers.push(answer(respondent, 10, "3"));

        assert!(build_feature_rows(&QUESTIONS, &answers).is_empty());
    }

    #[test]
    fn duplicate_count_masking_a_gap_is_still_ineligible() {
        let respondent = Uuid::new_v4();
        let answers = vec![
            answer(respondent, 10, "1"),
            answer(respondent, 10, "2"),
            answer(respondent, 11, "0"),
        ];

        assert!(build_feature_rows(&QUESTIONS, &answers).is_empty());
    }

    #[test]
    fn ignores_answers_outside_the_category() {
        let respondent = Uuid::new_v4();
        let mut answers = complete_answers(respondent, ["0", "1", "2"]);
        answers.push(answer(respondent, 99, "3"));

        let rows = build_feature_rows(&QUESTIONS, &answers);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].features, vec![0, 1, 2]);
    }

    #[test]
    fn manual_label_wins_over_pseudo() {
        let respondent = Uuid::new_v4();
        let rows = vec![FeatureRow {
            respondent_id: respondent,
            features: vec![3, 3, 3],
        }];
        let manual = HashMap::from([(respondent, StressLevel::Normal)]);

        let labeled = resolve_labels(&rows, &manual, LabelPolicy::AllowPseudo);
        assert_eq!(labeled.len(), 1);
        assert_eq!(labeled[0].label, StressLevel::Normal);
        assert_eq!(labeled[0].source, LabelSource::Manual);
    }

    #[test]
    fn manual_only_policy_drops_unlabeled_respondents() {
        let rows = vec![FeatureRow {
            respondent_id: Uuid::new_v4(),
            features: vec![1, 1, 1],
        }];

        let labeled = resolve_labels(&rows, &HashMap::new(), LabelPolicy::ManualOnly);
        assert!(labeled.is_empty());
    }

    #[test]
    fn pseudo_policy_scores_unlabeled_respondents() {
        let rows = vec![FeatureRow {
            respondent_id: Uuid::new_v4(),
            features: vec![3, 3, 3],
        }];

        let labeled = resolve_labels(&rows, &HashMap::new(), LabelPolicy::AllowPseudo);
        assert_eq!(labeled.len(), 1);
        // 9 * 2 = 18
        assert_eq!(labeled[0].label, StressLevel::Mild);
        assert_eq!(labeled[0].source, LabelSource::Pseudo);
    }

    #[test]
    fn cutpoints_are_exact_at_the_boundaries() {
        assert_eq!(categorize_stress(14), StressLevel::Normal);
        assert_eq!(categorize_stress(15), StressLevel::Mild);
        assert_eq!(categorize_stress(18), StressLevel::Mild);
        assert_eq!(categorize_stress(19), StressLevel::Moderate);
        assert_eq!(categorize_stress(25), StressLevel::Moderate);
        assert_eq!(categorize_stress(26), StressLevel::Severe);
        assert_eq!(categorize_stress(33), StressLevel::Severe);
        assert_eq!(categorize_stress(34), StressLevel::ExtremelySevere);
    }

    #[test]
    fn pseudo_labels_cover_every_complete_respondent() {
        let rows = vec![
            FeatureRow {
                respondent_id: Uuid::new_v4(),
                features: vec![0, 0, 0],
            },
            FeatureRow {
                respondent_id: Uuid::new_v4(),
                features: vec![3, 3, 3],
            },
        ];

        let pseudo = pseudo_labels(&rows);
        assert_eq!(pseudo.len(), 2);
        assert_eq!(pseudo[0].1, StressLevel::Normal);
        assert_eq!(pseudo[1].1, StressLevel::Mild);
    }
}
