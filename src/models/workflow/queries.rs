use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::collections::HashSet;

use crate::errors::AppError;
use crate::models::evaluation::{self, EvaluationType, NewEvaluation};
use crate::models::{proposal, rubric};
use super::diff::{EvaluationDiff, TemplateStep, diff_template_evaluations};
use super::types::*;

const SELECT_WORKFLOW: &str = "\
    SELECT id, space_id, title, sort_index, evaluations, created_at, updated_at FROM workflows";

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: i64,
    space_id: i64,
    title: String,
    sort_index: i32,
    evaluations: Json<Vec<EvaluationBlueprint>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Workflow {
            id: row.id,
            space_id: row.space_id,
            title: row.title,
            index: row.sort_index,
            evaluations: row.evaluations.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    workflow_id: i64,
) -> Result<Option<Workflow>, AppError> {
    let sql = format!("{SELECT_WORKFLOW} WHERE id = $1");
    let row = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(workflow_id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(Workflow::from))
}

pub async fn find_for_space<'e>(
    executor: impl PgExecutor<'e>,
    space_id: i64,
) -> Result<Vec<Workflow>, AppError> {
    let sql = format!("{SELECT_WORKFLOW} WHERE space_id = $1 ORDER BY sort_index, id");
    let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(space_id)
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(Workflow::from).collect())
}

/// Reject blueprint lists that cannot be stamped onto a proposal.
pub fn validate_blueprints(blueprints: &[EvaluationBlueprint]) -> Result<(), AppError> {
    if blueprints.is_empty() {
        return Err(AppError::InvalidInput("A workflow needs at least one evaluation".to_string()));
    }
    let mut seen = HashSet::new();
    for blueprint in blueprints {
        if blueprint.id.trim().is_empty() {
            return Err(AppError::InvalidInput("Every evaluation needs an id".to_string()));
        }
        if !seen.insert(blueprint.id.as_str()) {
            return Err(AppError::InvalidInput(format!("Duplicate evaluation id '{}'", blueprint.id)));
        }
        if blueprint.title.trim().is_empty() {
            return Err(AppError::InvalidInput("Every evaluation needs a title".to_string()));
        }
        if blueprint.required_reviews < 1 {
            return Err(AppError::InvalidInput(format!(
                "Evaluation '{}' must require at least one review",
                blueprint.title
            )));
        }
        if let Some(settings) = &blueprint.vote_settings {
            settings.validate()?;
        }
        if blueprint.appealable && blueprint.evaluation_type != EvaluationType::PassFail {
            return Err(AppError::InvalidInput(format!(
                "Evaluation '{}' cannot be appealable; only pass/fail steps can",
                blueprint.title
            )));
        }
        if blueprint.appeal_required_reviews < 1 {
            return Err(AppError::InvalidInput(format!(
                "Evaluation '{}' must require at least one appeal review",
                blueprint.title
            )));
        }
        if !blueprint.rubric_criteria.is_empty() && blueprint.evaluation_type != EvaluationType::Rubric {
            return Err(AppError::InvalidInput(format!(
                "Evaluation '{}' has rubric criteria but is not a rubric step",
                blueprint.title
            )));
        }
        rubric::validate_criteria(&blueprint.rubric_criteria)?;
    }
    Ok(())
}

/// Create or replace a workflow. Replacing propagates the structural change to
/// every proposal template built from it, in the same transaction.
pub async fn upsert(pool: &PgPool, input: &WorkflowUpsert) -> Result<UpsertOutcome, AppError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("Workflow title is required".to_string()));
    }
    validate_blueprints(&input.evaluations)?;

    let mut tx = pool.begin().await?;

    let previous = match input.id {
        Some(workflow_id) => {
            let sql = format!("{SELECT_WORKFLOW} WHERE id = $1 FOR UPDATE");
            let row = sqlx::query_as::<_, WorkflowRow>(&sql)
                .bind(workflow_id)
                .fetch_optional(&mut *tx)
                .await?
                .map(Workflow::from)
                .filter(|w| w.space_id == input.space_id)
                .ok_or_else(|| AppError::NotFound(format!("workflow {workflow_id}")))?;
            Some(row)
        }
        None => None,
    };

    let row = match &previous {
        Some(old) => {
            let sql = "UPDATE workflows SET title = $1, sort_index = $2, evaluations = $3, updated_at = NOW() \
                       WHERE id = $4 \
                       RETURNING id, space_id, title, sort_index, evaluations, created_at, updated_at";
            sqlx::query_as::<_, WorkflowRow>(sql)
                .bind(title)
                .bind(input.index)
                .bind(Json(&input.evaluations))
                .bind(old.id)
                .fetch_one(&mut *tx)
                .await?
        }
        None => {
            let sql = "INSERT INTO workflows (space_id, title, sort_index, evaluations) VALUES ($1, $2, $3, $4) \
                       RETURNING id, space_id, title, sort_index, evaluations, created_at, updated_at";
            sqlx::query_as::<_, WorkflowRow>(sql)
                .bind(input.space_id)
                .bind(title)
                .bind(input.index)
                .bind(Json(&input.evaluations))
                .fetch_one(&mut *tx)
                .await?
        }
    };
    let workflow = Workflow::from(row);

    let mut templates_updated = 0;
    if let Some(old) = &previous {
        for template_id in proposal::find_template_ids_for_workflow(&mut tx, workflow.id).await? {
            let current: Vec<TemplateStep> = evaluation::find_for_proposal(&mut *tx, template_id)
                .await?
                .into_iter()
                .map(|e| TemplateStep {
                    id: e.id,
                    index: e.index,
                    title: e.title,
                    evaluation_type: e.evaluation_type,
                })
                .collect();
            let diff = diff_template_evaluations(&old.evaluations, &workflow.evaluations, &current);
            if diff.is_empty() {
                continue;
            }
            apply_template_diff(&mut tx, template_id, &diff).await?;
            templates_updated += 1;
        }
    }

    tx.commit().await?;

    log::info!(
        "Upserted workflow {} in space {} ({} templates updated)",
        workflow.id, workflow.space_id, templates_updated
    );
    Ok(UpsertOutcome {
        workflow,
        templates_updated,
    })
}

/// Index uniqueness is checked at commit, so intermediate states may overlap.
async fn apply_template_diff(
    tx: &mut Transaction<'_, Postgres>,
    template_id: i64,
    diff: &EvaluationDiff,
) -> Result<(), AppError> {
    if !diff.delete.is_empty() {
        evaluation::delete_many(tx, &diff.delete).await?;
    }
    for update in &diff.update {
        evaluation::update_structure(tx, update.id, update.index, &update.title, update.evaluation_type)
            .await?;
    }
    let creates: Vec<NewEvaluation> = diff
        .create
        .iter()
        .map(|c| c.blueprint.to_new_evaluation(c.index))
        .collect();
    if !creates.is_empty() {
        evaluation::insert_many(tx, template_id, &creates).await?;
    }
    log::debug!(
        "Template {}: {} created, {} updated, {} deleted",
        template_id,
        diff.create.len(),
        diff.update.len(),
        diff.delete.len()
    );
    Ok(())
}
