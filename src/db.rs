use std::collections::HashMap;

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{
    AnswerRecord, LabelSummary, PredictionRow, RespondentPrediction, StressCategory, StressLevel,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Resolves the category name into a typed handle once per command; the
/// pipeline only ever sees the handle. Question ids come back sorted
/// ascending and define the feature vector layout.
pub async fn resolve_stress_category(
    pool: &PgPool,
    name: &str,
) -> Result<StressCategory, PipelineError> {
    let row = sqlx::query("SELECT id FROM stress_survey.question_categories WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(PipelineError::Configuration(format!(
            "question category {name:?} not found"
        )));
    };
    let id: i32 = row.get("id");

    let rows = sqlx::query(
        "SELECT id FROM stress_survey.questions WHERE question_category_id = $1 ORDER BY id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    let question_ids: Vec<i32> = rows.iter().map(|r| r.get("id")).collect();

    if question_ids.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "question category {name:?} has no questions"
        )));
    }

    Ok(StressCategory { id, question_ids })
}

pub async fn fetch_category_answers(
    pool: &PgPool,
    question_ids: &[i32],
) -> Result<Vec<AnswerRecord>, PipelineError> {
    let rows = sqlx::query(
        "SELECT survey_respondent_id, question_id, answer \
         FROM stress_survey.survey_answers \
         WHERE question_id = ANY($1)",
    )
    .bind(question_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| AnswerRecord {
            respondent_id: row.get("survey_respondent_id"),
            question_id: row.get("question_id"),
            value: row.get("answer"),
        })
        .collect())
}

/// One manual (non-model) label per respondent; the earliest wins when a
/// respondent has several.
pub async fn fetch_manual_labels(
    pool: &PgPool,
) -> Result<HashMap<Uuid, StressLevel>, PipelineError> {
    let rows = sqlx::query(
        "SELECT DISTINCT ON (survey_respondent_id) survey_respondent_id, stress_level \
         FROM stress_survey.stress_labels \
         WHERE NOT predicted_by_model \
         ORDER BY survey_respondent_id, created_at, id",
    )
    .fetch_all(pool)
    .await?;

    let mut labels = HashMap::with_capacity(rows.len());
    for row in rows {
        let respondent_id: Uuid = row.get("survey_respondent_id");
        let level: StressLevel = row.get::<String, _>("stress_level").parse()?;
        labels.insert(respondent_id, level);
    }
    Ok(labels)
}

/// Materializes pseudo-labels in one transaction. The partial unique index on
/// model-flagged labels makes reruns no-ops per respondent.
pub async fn insert_pseudo_labels(
    pool: &PgPool,
    labels: &[(Uuid, StressLevel)],
) -> Result<u64, PipelineError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for (respondent_id, level) in labels {
        let result = sqlx::query(
            "INSERT INTO stress_survey.stress_labels \
             (id, survey_respondent_id, stress_level, predicted_by_model, created_at) \
             VALUES ($1, $2, $3, TRUE, $4) \
             ON CONFLICT (survey_respondent_id) WHERE predicted_by_model DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(respondent_id)
        .bind(level.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Records one prediction per (respondent, model name), insert-if-absent:
/// existing rows are never updated, so a rerun with different output leaves
/// the stored prediction untouched. All inserts commit together.
pub async fn insert_predictions(
    pool: &PgPool,
    model_name: &str,
    predictions: &[RespondentPrediction],
) -> Result<u64, PipelineError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for prediction in predictions {
        let result = sqlx::query(
            "INSERT INTO stress_survey.prediction_logs \
             (id, survey_respondent_id, model_name, prediction, probability, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (survey_respondent_id, model_name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(prediction.respondent_id)
        .bind(model_name)
        .bind(prediction.level.as_str())
        .bind(prediction.probability)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn fetch_label_summary(pool: &PgPool) -> anyhow::Result<Vec<LabelSummary>> {
    let rows = sqlx::query(
        "SELECT stress_level, \
                COUNT(*) FILTER (WHERE NOT predicted_by_model) AS manual_count, \
                COUNT(*) FILTER (WHERE predicted_by_model) AS pseudo_count \
         FROM stress_survey.stress_labels \
         GROUP BY stress_level",
    )
    .fetch_all(pool)
    .await?;

    let mut summaries = Vec::with_capacity(rows.len());
    for row in rows {
        let level: StressLevel = row.get::<String, _>("stress_level").parse()?;
        summaries.push(LabelSummary {
            level,
            manual_count: row.get("manual_count"),
            pseudo_count: row.get("pseudo_count"),
        });
    }
    summaries.sort_by_key(|s| s.level.rank());
    Ok(summaries)
}

pub async fn fetch_recent_predictions(
    pool: &PgPool,
    limit: i64,
) -> anyhow::Result<Vec<PredictionRow>> {
    let rows = sqlx::query(
        "SELECT r.email, p.model_name, p.prediction, p.probability, p.created_at \
         FROM stress_survey.prediction_logs p \
         JOIN stress_survey.survey_respondents r ON r.id = p.survey_respondent_id \
         ORDER BY p.created_at DESC, p.id \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut predictions = Vec::with_capacity(rows.len());
    for row in rows {
        let prediction: StressLevel = row.get::<String, _>("prediction").parse()?;
        predictions.push(PredictionRow {
            respondent_email: row.get("email"),
            model_name: row.get("model_name"),
            prediction,
            probability: row.get("probability"),
            created_at: row.get("created_at"),
        });
    }
    Ok(predictions)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let questions: Vec<(&str, &str)> = vec![
        ("I couldn't seem to experience any positive feeling at all.", "depression"),
        ("I found it difficult to work up the initiative to do things.", "depression"),
        ("I felt that I had nothing to look forward to.", "depression"),
        ("I felt down-hearted and blue.", "depression"),
        ("I was unable to become enthusiastic about anything.", "depression"),
        ("I felt I wasn't worth much as a person.", "depression"),
        ("I felt that life was meaningless.", "depression"),
        ("I was aware of dryness of my mouth.", "anxiety"),
        ("I experienced breathing difficulty.", "anxiety"),
        ("I experienced trembling, for example in the hands.", "anxiety"),
        ("I was worried about situations in which I might panic.", "anxiety"),
        ("I felt I was close to panic.", "anxiety"),
        ("I was aware of the action of my heart without physical exertion.", "anxiety"),
        ("I felt scared without any good reason.", "anxiety"),
        ("I found it hard to wind down.", "stress"),
        ("I tended to over-react to situations.", "stress"),
        ("I felt that I was using a lot of nervous energy.", "stress"),
        ("I found myself getting agitated.", "stress"),
        ("I found it difficult to relax.", "stress"),
        ("I was intolerant of anything that kept me from what I was doing.", "stress"),
        ("I found myself getting upset rather easily.", "stress"),
    ];

    let mut category_ids: HashMap<&str, i32> = HashMap::new();
    for category in ["depression", "anxiety", "stress"] {
        let id: i32 = sqlx::query(
            "INSERT INTO stress_survey.question_categories (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
        )
        .bind(category)
        .fetch_one(pool)
        .await?
        .get("id");
        category_ids.insert(category, id);
    }

    let mut stress_question_ids = Vec::new();
    for (prompt, category) in questions {
        let id: i32 = sqlx::query(
            "INSERT INTO stress_survey.questions (prompt, question_category_id) VALUES ($1, $2) \
             ON CONFLICT (prompt) DO UPDATE SET question_category_id = EXCLUDED.question_category_id \
             RETURNING id",
        )
        .bind(prompt)
        .bind(category_ids[category])
        .fetch_one(pool)
        .await?
        .get("id");
        if category == "stress" {
            stress_question_ids.push(id);
        }
    }
    stress_question_ids.sort_unstable();

    let respondents: Vec<(Uuid, &str, [i32; 7])> = vec![
        (
            Uuid::parse_str("7b0c5d2e-58a1-4a52-9c0a-0b0f2d9a1c01")?,
            "ayu.pratiwi@example.edu",
            [0, 0, 0, 0, 0, 0, 0],
        ),
        (
            Uuid::parse_str("2f6e8a91-3c47-4d7e-b1c8-5a9e0d3b2c02")?,
            "bima.santoso@example.edu",
            [1, 1, 0, 1, 0, 1, 0],
        ),
        (
            Uuid::parse_str("9d4b1c73-6e25-4f19-a3d0-7c8f5e2a1b03")?,
            "citra.lestari@example.edu",
            [2, 1, 2, 1, 2, 1, 1],
        ),
        (
            Uuid::parse_str("4a8f3e62-9b50-4c84-8e17-1d6a9c4f3e04")?,
            "dimas.wijaya@example.edu",
            [3, 2, 3, 3, 2, 3, 3],
        ),
        (
            Uuid::parse_str("c1e7d954-2a83-4b6f-9d42-8e0b7f5a4d05")?,
            "eka.rahma@example.edu",
            [2, 2, 2, 2, 2, 2, 1],
        ),
    ];

    for (i, &(id, email, answers)) in respondents.iter().enumerate() {
        let submitted_at = chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
            .context("invalid date")?
            .and_hms_opt(9 + i as u32, 15, 0)
            .context("invalid time")?;

        sqlx::query(
            "INSERT INTO stress_survey.survey_respondents (id, email, submitted_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(email)
        .bind(submitted_at)
        .execute(pool)
        .await?;

        for (question_id, value) in stress_question_ids.iter().zip(answers) {
            sqlx::query(
                "INSERT INTO stress_survey.survey_answers \
                 (id, survey_respondent_id, question_id, answer) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (survey_respondent_id, question_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(question_id)
            .bind(value.to_string())
            .execute(pool)
            .await?;
        }
    }

    // two respondents per class so a manual-only run can stratify
    let manual_labels: Vec<(Uuid, Uuid, StressLevel)> = vec![
        (
            Uuid::parse_str("5c2a9e18-7d64-4f30-b8a5-3e1c6d9f0a11")?,
            respondents[0].0,
            StressLevel::Normal,
        ),
        (
            Uuid::parse_str("8e5d3b72-1f49-4a86-9c03-6b4e7a2d5c12")?,
            respondents[1].0,
            StressLevel::Normal,
        ),
        (
            Uuid::parse_str("3f9c6a45-8b21-4e57-a6d9-0c5f8e3b7a13")?,
            respondents[3].0,
            StressLevel::ExtremelySevere,
        ),
        (
            Uuid::parse_str("a6d1f283-4c97-4b05-8f6e-2a9d0c7e4b14")?,
            respondents[4].0,
            StressLevel::ExtremelySevere,
        ),
    ];

    for (label_id, respondent_id, level) in manual_labels {
        sqlx::query(
            "INSERT INTO stress_survey.stress_labels \
             (id, survey_respondent_id, stress_level, predicted_by_model, created_at) \
             VALUES ($1, $2, $3, FALSE, $4) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(label_id)
        .bind(respondent_id)
        .bind(level.as_str())
        .bind(Utc::now())
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(
    pool: &PgPool,
    category: &StressCategory,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        submitted_at: NaiveDateTime,
        s1: Option<String>,
        s2: Option<String>,
        s3: Option<String>,
        s4: Option<String>,
        s5: Option<String>,
        s6: Option<String>,
        s7: Option<String>,
    }

    anyhow::ensure!(
        category.question_ids.len() == 7,
        "expected 7 stress questions, category has {}",
        category.question_ids.len()
    );

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut imported = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let respondent_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO stress_survey.survey_respondents (id, email, submitted_at) \
             VALUES ($1, $2, $3)",
        )
        .bind(respondent_id)
        .bind(&row.email)
        .bind(row.submitted_at)
        .execute(pool)
        .await?;

        let values = [
            &row.s1, &row.s2, &row.s3, &row.s4, &row.s5, &row.s6, &row.s7,
        ];
        for (question_id, value) in category.question_ids.iter().zip(values) {
            // blank cells leave the respondent incomplete and ineligible
            let Some(value) = value else { continue };
            if value.trim().is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO stress_survey.survey_answers \
                 (id, survey_respondent_id, question_id, answer) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (survey_respondent_id, question_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(respondent_id)
            .bind(question_id)
            .bind(value.trim())
            .execute(pool)
            .await?;
        }

        imported += 1;
    }

    Ok(imported)
}
