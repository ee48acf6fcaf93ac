use std::collections::HashMap;
use std::path::PathBuf;

use sqlx::PgPool;
use uuid::Uuid;

use crate::dataset::{self, LabelPolicy};
use crate::db;
use crate::error::PipelineError;
use crate::models::{EvaluationSummary, LabelSource, StressCategory, StressLevel};
use crate::trainer::{self, MODEL_NAME};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model_path: PathBuf,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    TryManual,
    FallbackPseudo,
    Done,
    Aborted,
}

/// Transition guard for the training phases: an empty dataset after the
/// manual pass falls back to pseudo-labels; an empty dataset after the
/// fallback aborts; anything non-empty proceeds to training.
pub fn next_phase(phase: Phase, dataset_empty: bool) -> Phase {
    match (phase, dataset_empty) {
        (Phase::TryManual, false) | (Phase::FallbackPseudo, false) => Phase::Done,
        (Phase::TryManual, true) => Phase::FallbackPseudo,
        (Phase::FallbackPseudo, true) => Phase::Aborted,
        (terminal, _) => terminal,
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(EvaluationSummary),
    /// Zero eligible training examples after both passes: a normal,
    /// reportable outcome rather than an error.
    NoUsableData,
}

pub async fn run_stress_pipeline(
    pool: &PgPool,
    category: &StressCategory,
    config: &PipelineConfig,
) -> Result<PipelineOutcome, PipelineError> {
    let answers = db::fetch_category_answers(pool, &category.question_ids).await?;
    let rows = dataset::build_feature_rows(&category.question_ids, &answers);
    let manual: HashMap<Uuid, StressLevel> = db::fetch_manual_labels(pool).await?;
    tracing::info!(
        category_id = category.id,
        eligible = rows.len(),
        manual_labels = manual.len(),
        "assembled answer matrix"
    );

    let mut phase = Phase::TryManual;
    let mut labeled = dataset::resolve_labels(&rows, &manual, LabelPolicy::ManualOnly);
    phase = next_phase(phase, labeled.is_empty());

    if phase == Phase::FallbackPseudo {
        tracing::info!("no manually labeled examples; materializing pseudo-labels");
        let pseudo = dataset::pseudo_labels(&rows);
        let inserted = db::insert_pseudo_labels(pool, &pseudo).await?;
        tracing::info!(inserted, "pseudo-labels persisted");

        labeled = dataset::resolve_labels(&rows, &manual, LabelPolicy::AllowPseudo);
        phase = next_phase(phase, labeled.is_empty());
    }

    if phase == Phase::Aborted {
        return Ok(PipelineOutcome::NoUsableData);
    }

    let manual_examples = labeled
        .iter()
        .filter(|row| row.source == LabelSource::Manual)
        .count();
    tracing::info!(
        examples = labeled.len(),
        manual_examples,
        "training classifier"
    );
    let output = trainer::train_and_evaluate(&labeled, config.seed)?;
    output.artifact.save(&config.model_path)?;

    let inserted = db::insert_predictions(pool, MODEL_NAME, &output.predictions).await?;
    tracing::info!(
        inserted,
        scored = output.predictions.len(),
        accuracy = output.summary.accuracy,
        "pipeline finished"
    );

    Ok(PipelineOutcome::Completed(output.summary))
}
