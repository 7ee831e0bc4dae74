use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::events::{self, ProposalEventContext};
use crate::models::evaluation::{
    self, EvaluationResult, EvaluationType, ProposalEvaluation, current_evaluation, next_evaluation,
};
use crate::models::proposal::{self, Proposal, ProposalStatus};
use crate::models::{review, rubric, vote};

/// Body of `PUT /api/proposals/{id}/submit-result`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvaluationResult {
    pub evaluation_id: i64,
    pub result: Option<EvaluationResult>,
    #[serde(default)]
    pub decline_reasons: Vec<String>,
    pub decline_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubmissionOutcome {
    /// The step already carries the requested result.
    Unchanged,
    /// Review stored; more reviews are needed before the step is decided.
    Recorded,
    #[serde(rename_all = "camelCase")]
    Decided {
        result: EvaluationResult,
        current_evaluation_id: i64,
    },
}

#[derive(Debug)]
pub enum Precheck<'a> {
    Unchanged,
    Proceed {
        step: &'a ProposalEvaluation,
        next: Option<&'a ProposalEvaluation>,
    },
}

/// Validation that only needs the proposal and its steps.
pub fn check_submission<'a>(
    proposal: &Proposal,
    evaluations: &'a [ProposalEvaluation],
    evaluation_id: i64,
    result: EvaluationResult,
) -> Result<Precheck<'a>, AppError> {
    let step = evaluations
        .iter()
        .find(|e| e.id == evaluation_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))?;

    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot review an archived proposal".to_string()));
    }
    if step.is_appealed() {
        return Err(AppError::InvalidInput(
            "This evaluation is under appeal; submit an appeal result instead".to_string(),
        ));
    }
    if step.result == Some(result) {
        return Ok(Precheck::Unchanged);
    }
    if proposal.status == ProposalStatus::Draft {
        return Err(AppError::InvalidInput("Proposal has not been published".to_string()));
    }
    if current_evaluation(proposal.status, evaluations).map(|c| c.id) != Some(step.id) {
        return Err(AppError::InvalidInput("Only the current evaluation can be reviewed".to_string()));
    }
    if step.evaluation_type == EvaluationType::Vote {
        return Err(AppError::InvalidInput("Vote evaluations are decided by their vote".to_string()));
    }

    Ok(Precheck::Proceed {
        step,
        next: next_evaluation(evaluations, step.id),
    })
}

/// Whether a newly recorded review settles the step.
pub fn is_decided(
    step: &ProposalEvaluation,
    result: EvaluationResult,
    passes_recorded: i64,
    can_complete: bool,
) -> bool {
    can_complete
        || result == EvaluationResult::Fail
        || !step.evaluation_type.counts_reviews()
        || passes_recorded >= i64::from(step.required_reviews)
}

pub async fn submit_evaluation_result(
    pool: &PgPool,
    proposal_id: i64,
    user_id: i64,
    input: &SubmitEvaluationResult,
) -> Result<SubmissionOutcome, AppError> {
    let result = input
        .result
        .ok_or_else(|| AppError::InvalidInput("A result is required".to_string()))?;
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;

    let precheck = check_submission(&proposal, &evaluations, input.evaluation_id, result)?;
    if !permissions.can_review() {
        log::warn!(
            "User {} tried to review evaluation {} without permission",
            user_id, input.evaluation_id
        );
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to review this evaluation".to_string(),
        ));
    }

    let (step, next) = match precheck {
        Precheck::Unchanged => {
            tx.rollback().await?;
            log::info!(
                "Evaluation {} already has result '{}', nothing to do",
                input.evaluation_id,
                result.as_str()
            );
            return Ok(SubmissionOutcome::Unchanged);
        }
        Precheck::Proceed { step, next } => (step, next),
    };

    if review::has_reviewed(&mut *tx, step.id, user_id, false).await? {
        return Err(AppError::ActionNotPermitted("You have already reviewed this evaluation".to_string()));
    }
    if step.evaluation_type == EvaluationType::Rubric && !permissions.complete_evaluation {
        let criteria = rubric::find_criteria(&mut *tx, step.id).await?;
        let answers = rubric::find_answers_by(&mut *tx, step.id, user_id).await?;
        if !rubric::answers_complete(&criteria, &answers) {
            return Err(AppError::InvalidInput(
                "Every question of the evaluation must be answered".to_string(),
            ));
        }
    }

    let inserted = review::insert(
        &mut tx,
        step.id,
        user_id,
        false,
        result,
        &input.decline_reasons,
        input.decline_message.as_deref(),
    )
    .await?;
    if !inserted {
        return Err(AppError::ActionNotPermitted("You have already reviewed this evaluation".to_string()));
    }

    let passes = review::count_with_result(&mut *tx, step.id, false, EvaluationResult::Pass).await?;
    if !is_decided(step, result, passes, permissions.complete_evaluation) {
        tx.commit().await?;
        log::info!(
            "Recorded review by {} on evaluation {} ({}/{} passes)",
            user_id, step.id, passes, step.required_reviews
        );
        return Ok(SubmissionOutcome::Recorded);
    }

    let now = Utc::now();
    evaluation::set_result(
        &mut tx,
        step.id,
        result,
        user_id,
        now,
        &input.decline_reasons,
        input.decline_message.as_deref(),
    )
    .await?;

    let advances = result == EvaluationResult::Pass && !step.final_step;
    let mut current_evaluation_id = step.id;
    if let (true, Some(next)) = (advances, next) {
        current_evaluation_id = next.id;
        if next.evaluation_type == EvaluationType::Vote && next.vote_id.is_none() {
            vote::open_for_evaluation(&mut tx, proposal.space_id, next, user_id, now).await?;
        }
    }

    tx.commit().await?;
    log::info!(
        "Evaluation {} of proposal {} decided '{}' by user {}",
        step.id,
        proposal_id,
        result.as_str(),
        user_id
    );

    events::publish_best_effort(
        pool,
        ProposalEventContext {
            proposal_id,
            space_id: proposal.space_id,
            current_evaluation_id: Some(current_evaluation_id),
            user_id,
        },
    )
    .await;

    Ok(SubmissionOutcome::Decided {
        result,
        current_evaluation_id,
    })
}
