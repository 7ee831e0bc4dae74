//! Rubric answers and criteria on rubric steps.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::models::evaluation::{self, EvaluationType, ProposalEvaluation, current_evaluation};
use crate::models::proposal;
use crate::models::rubric::{
    self, CriterionSummary, RubricAnswer, RubricAnswerInput, RubricCriterion, RubricCriterionInput,
};

/// Body of `PUT /api/proposals/{id}/evaluations/{eid}/rubric-answers`.
#[derive(Debug, Clone, Deserialize)]
pub struct RubricAnswers {
    pub answers: Vec<RubricAnswerInput>,
}

/// Body of `PUT /api/proposals/{id}/evaluations/{eid}/rubric-criteria`.
#[derive(Debug, Clone, Deserialize)]
pub struct RubricCriteria {
    pub criteria: Vec<RubricCriterionInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricOverview {
    pub evaluation_id: i64,
    pub criteria: Vec<RubricCriterion>,
    pub answers: Vec<RubricAnswer>,
    pub summary: Vec<CriterionSummary>,
}

fn rubric_step(
    evaluations: &[ProposalEvaluation],
    evaluation_id: i64,
) -> Result<&ProposalEvaluation, AppError> {
    let step = evaluations
        .iter()
        .find(|e| e.id == evaluation_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))?;
    if step.evaluation_type != EvaluationType::Rubric {
        return Err(AppError::InvalidInput("Only rubric evaluations have criteria".to_string()));
    }
    Ok(step)
}

/// Store the caller's scores for every criterion of the current rubric step.
/// Answers can be revised until the step is decided.
pub async fn save_rubric_answers(
    pool: &PgPool,
    proposal_id: i64,
    evaluation_id: i64,
    user_id: i64,
    answers: &[RubricAnswerInput],
) -> Result<Vec<RubricAnswer>, AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;
    let step = rubric_step(&evaluations, evaluation_id)?;

    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot review an archived proposal".to_string()));
    }
    let is_current = current_evaluation(proposal.status, &evaluations).map(|c| c.id) == Some(step.id);
    if !is_current || step.result.is_some() {
        return Err(AppError::InvalidInput(
            "Rubric answers can only change while the evaluation is in progress".to_string(),
        ));
    }
    if !permissions.can_review() {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to review this evaluation".to_string(),
        ));
    }

    let criteria = rubric::find_criteria(&mut *tx, step.id).await?;
    rubric::check_answers(&criteria, answers)?;
    rubric::upsert_answers(&mut tx, step.id, user_id, answers).await?;
    let saved = rubric::find_answers_by(&mut *tx, step.id, user_id).await?;
    tx.commit().await?;

    log::info!(
        "User {} scored {} criteria on evaluation {}",
        user_id,
        saved.len(),
        step.id
    );
    Ok(saved)
}

/// Replace the criteria of a rubric step. Refused once any reviewer answered.
pub async fn set_rubric_criteria(
    pool: &PgPool,
    proposal_id: i64,
    evaluation_id: i64,
    user_id: i64,
    criteria: &[RubricCriterionInput],
) -> Result<Vec<RubricCriterion>, AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;
    if !permissions.edit {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to edit this proposal".to_string(),
        ));
    }
    rubric::validate_criteria(criteria)?;

    let mut tx = pool.begin().await?;
    proposal::lock_for_update(&mut tx, proposal_id).await?;
    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;
    let step = rubric_step(&evaluations, evaluation_id)?;
    if rubric::count_answers(&mut *tx, step.id).await? > 0 {
        return Err(AppError::InvalidInput(
            "Rubric criteria cannot change once reviewers have answered".to_string(),
        ));
    }

    rubric::replace_criteria(&mut tx, step.id, criteria).await?;
    let stored = rubric::find_criteria(&mut *tx, step.id).await?;
    tx.commit().await?;
    log::info!("Evaluation {} of proposal {} now has {} rubric criteria", step.id, proposal_id, stored.len());
    Ok(stored)
}

/// Criteria, every reviewer's answers and the per-criterion averages.
pub async fn load_rubric(pool: &PgPool, proposal_id: i64, evaluation_id: i64) -> Result<RubricOverview, AppError> {
    let evaluations = evaluation::find_for_proposal(pool, proposal_id).await?;
    let step = rubric_step(&evaluations, evaluation_id)?;
    let criteria = rubric::find_criteria(pool, step.id).await?;
    let answers = rubric::find_answers(pool, step.id).await?;
    let summary = rubric::summarize(&criteria, &answers);
    Ok(RubricOverview {
        evaluation_id: step.id,
        criteria,
        answers,
        summary,
    })
}
