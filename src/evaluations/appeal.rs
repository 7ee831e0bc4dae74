//! Appeals on failed pass/fail steps.
//!
//! An author appeals the current step after it failed. The result is cleared
//! and the step's appeal reviewers decide it again against
//! `appeal_required_reviews`. Whatever they decide is final: the proposal
//! stays on the appealed step.

use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::events::{self, ProposalEventContext};
use crate::models::evaluation::{self, EvaluationResult, ProposalEvaluation, current_evaluation};
use crate::models::proposal::{self, Proposal};
use crate::models::{review, space};
use super::submit::{Precheck, SubmissionOutcome, SubmitEvaluationResult};

/// Body of `PUT /api/proposals/{id}/appeal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppealEvaluation {
    pub evaluation_id: i64,
    pub reason: String,
}

fn find_step(
    evaluations: &[ProposalEvaluation],
    evaluation_id: i64,
) -> Result<&ProposalEvaluation, AppError> {
    evaluations
        .iter()
        .find(|e| e.id == evaluation_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))
}

fn is_current(proposal: &Proposal, evaluations: &[ProposalEvaluation], step: &ProposalEvaluation) -> bool {
    current_evaluation(proposal.status, evaluations).map(|c| c.id) == Some(step.id)
}

pub fn check_appeal<'a>(
    proposal: &Proposal,
    evaluations: &'a [ProposalEvaluation],
    evaluation_id: i64,
) -> Result<&'a ProposalEvaluation, AppError> {
    let step = find_step(evaluations, evaluation_id)?;
    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot appeal on an archived proposal".to_string()));
    }
    if !is_current(proposal, evaluations, step) {
        return Err(AppError::InvalidInput("Only the current evaluation can be appealed".to_string()));
    }
    if !step.appealable {
        return Err(AppError::InvalidInput("This evaluation cannot be appealed".to_string()));
    }
    if step.is_appealed() {
        return Err(AppError::InvalidInput("This evaluation has already been appealed".to_string()));
    }
    if step.result != Some(EvaluationResult::Fail) {
        return Err(AppError::InvalidInput("Only failed evaluations can be appealed".to_string()));
    }
    Ok(step)
}

pub fn check_appeal_submission<'a>(
    proposal: &Proposal,
    evaluations: &'a [ProposalEvaluation],
    evaluation_id: i64,
    result: EvaluationResult,
) -> Result<Precheck<'a>, AppError> {
    let step = find_step(evaluations, evaluation_id)?;
    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot review an archived proposal".to_string()));
    }
    if !step.is_appealed() {
        return Err(AppError::InvalidInput("This evaluation has not been appealed".to_string()));
    }
    if step.result == Some(result) {
        return Ok(Precheck::Unchanged);
    }
    if step.result.is_some() {
        return Err(AppError::InvalidInput("The appeal has already been decided".to_string()));
    }
    if !is_current(proposal, evaluations, step) {
        return Err(AppError::InvalidInput("Only the current evaluation can be reviewed".to_string()));
    }
    Ok(Precheck::Proceed { step, next: None })
}

/// Whether a newly recorded appeal review settles the appeal.
pub fn is_appeal_decided(
    step: &ProposalEvaluation,
    result: EvaluationResult,
    passes_recorded: i64,
    can_complete: bool,
) -> bool {
    can_complete
        || result == EvaluationResult::Fail
        || passes_recorded >= i64::from(step.appeal_required_reviews)
}

/// Appeal a failed step. Only authors of the proposal may appeal.
pub async fn appeal_evaluation(
    pool: &PgPool,
    proposal_id: i64,
    user_id: i64,
    input: &AppealEvaluation,
) -> Result<(), AppError> {
    let reason = input.reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidInput("An appeal needs a reason".to_string()));
    }

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;
    let step = check_appeal(&proposal, &evaluations, input.evaluation_id)?;
    if !proposal::is_author(&mut *tx, proposal_id, user_id).await? {
        log::warn!("User {} tried to appeal evaluation {} without being an author", user_id, step.id);
        return Err(AppError::ActionNotPermitted(
            "Only authors can appeal an evaluation".to_string(),
        ));
    }

    evaluation::mark_appealed(&mut tx, step.id, user_id, reason, Utc::now()).await?;
    tx.commit().await?;
    log::info!("Evaluation {} of proposal {} appealed by user {}", step.id, proposal_id, user_id);

    let ctx = ProposalEventContext {
        proposal_id,
        space_id: proposal.space_id,
        current_evaluation_id: Some(step.id),
        user_id,
    };
    if let Err(e) = events::publish_proposal_appealed(pool, ctx).await {
        log::error!("Failed to publish event for proposal {}: {}", proposal_id, e);
    }
    Ok(())
}

/// Record an appeal reviewer's verdict on an appealed step.
pub async fn submit_appeal_result(
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

    let precheck = check_appeal_submission(&proposal, &evaluations, input.evaluation_id, result)?;
    if !permissions.can_review_appeal() {
        log::warn!(
            "User {} tried to review the appeal of evaluation {} without permission",
            user_id, input.evaluation_id
        );
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to review this appeal".to_string(),
        ));
    }
    let step = match precheck {
        Precheck::Unchanged => {
            tx.rollback().await?;
            return Ok(SubmissionOutcome::Unchanged);
        }
        Precheck::Proceed { step, .. } => step,
    };

    let inserted = review::insert(
        &mut tx,
        step.id,
        user_id,
        true,
        result,
        &input.decline_reasons,
        input.decline_message.as_deref(),
    )
    .await?;
    if !inserted {
        return Err(AppError::ActionNotPermitted("You have already reviewed this appeal".to_string()));
    }

    let passes = review::count_with_result(&mut *tx, step.id, true, EvaluationResult::Pass).await?;
    if !is_appeal_decided(step, result, passes, permissions.complete_evaluation) {
        tx.commit().await?;
        log::info!(
            "Recorded appeal review by {} on evaluation {} ({}/{} passes)",
            user_id, step.id, passes, step.appeal_required_reviews
        );
        return Ok(SubmissionOutcome::Recorded);
    }

    evaluation::set_result(
        &mut tx,
        step.id,
        result,
        user_id,
        Utc::now(),
        &input.decline_reasons,
        input.decline_message.as_deref(),
    )
    .await?;
    tx.commit().await?;
    log::info!(
        "Appeal on evaluation {} of proposal {} decided '{}' by user {}",
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
            current_evaluation_id: Some(step.id),
            user_id,
        },
    )
    .await;

    Ok(SubmissionOutcome::Decided {
        result,
        current_evaluation_id: step.id,
    })
}

/// Replace the appeal reviewers of an appealable step.
pub async fn set_appeal_reviewers(
    pool: &PgPool,
    proposal_id: i64,
    evaluation_id: i64,
    user_id: i64,
    reviewer_ids: &[i64],
) -> Result<(), AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;
    if !permissions.edit {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to edit this proposal".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    let step = evaluation::find_by_id(&mut *tx, evaluation_id)
        .await?
        .filter(|e| e.proposal_id == proposal_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))?;
    if !step.appealable {
        return Err(AppError::InvalidInput("This evaluation cannot be appealed".to_string()));
    }

    for reviewer_id in reviewer_ids {
        if space::membership(&mut *tx, proposal.space_id, *reviewer_id).await?.is_none() {
            return Err(AppError::InvalidInput(format!(
                "User {reviewer_id} is not a member of this space"
            )));
        }
    }

    evaluation::set_appeal_reviewers(&mut tx, evaluation_id, reviewer_ids).await?;
    tx.commit().await?;
    log::info!(
        "Evaluation {} of proposal {} now has {} appeal reviewers",
        evaluation_id,
        proposal_id,
        reviewer_ids.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::EvaluationType;
    use crate::models::evaluation::types::fixtures::{decided, evaluation};
    use crate::models::proposal::ProposalStatus;

    fn proposal() -> Proposal {
        Proposal {
            id: 1,
            space_id: 1,
            created_by: 1,
            title: "Grant".to_string(),
            status: ProposalStatus::Published,
            workflow_id: None,
            is_template: false,
            archived: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// feedback(pass) -> appealable pass_fail(fail) -> vote
    fn steps() -> Vec<ProposalEvaluation> {
        let mut review = decided(evaluation(2, 1, EvaluationType::PassFail), EvaluationResult::Fail);
        review.appealable = true;
        review.appeal_required_reviews = 2;
        vec![
            decided(evaluation(1, 0, EvaluationType::Feedback), EvaluationResult::Pass),
            review,
            evaluation(3, 2, EvaluationType::Vote),
        ]
    }

    fn appealed() -> Vec<ProposalEvaluation> {
        let mut steps = steps();
        steps[1].result = None;
        steps[1].appealed_at = Some(Utc::now());
        steps[1].appealed_by = Some(1);
        steps
    }

    #[test]
    fn failed_appealable_step_can_be_appealed() {
        let steps = steps();
        assert_eq!(check_appeal(&proposal(), &steps, 2).map(|s| s.id).ok(), Some(2));
    }

    #[test]
    fn appeal_needs_a_failed_appealable_current_step() {
        let mut not_appealable = steps();
        not_appealable[1].appealable = false;
        assert!(matches!(check_appeal(&proposal(), &not_appealable, 2), Err(AppError::InvalidInput(_))));

        let mut passed = steps();
        passed[1].result = Some(EvaluationResult::Pass);
        assert!(check_appeal(&proposal(), &passed, 3).is_err());

        let mut pending = steps();
        pending[1].result = None;
        assert!(matches!(check_appeal(&proposal(), &pending, 2), Err(AppError::InvalidInput(_))));

        assert!(matches!(check_appeal(&proposal(), &steps(), 9), Err(AppError::NotFound(_))));
    }

    #[test]
    fn a_step_is_appealed_once() {
        let mut again = appealed();
        again[1].result = Some(EvaluationResult::Fail);
        let err = check_appeal(&proposal(), &again, 2).unwrap_err();
        assert!(err.to_string().contains("already been appealed"));
    }

    #[test]
    fn archived_proposal_rejects_appeals() {
        let mut archived = proposal();
        archived.archived = true;
        assert!(matches!(check_appeal(&archived, &steps(), 2), Err(AppError::ActionNotPermitted(_))));
    }

    #[test]
    fn appeal_results_need_an_open_appeal() {
        let err = check_appeal_submission(&proposal(), &steps(), 2, EvaluationResult::Pass).unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let open = appealed();
        assert!(matches!(
            check_appeal_submission(&proposal(), &open, 2, EvaluationResult::Pass),
            Ok(Precheck::Proceed { .. })
        ));

        let mut settled = appealed();
        settled[1].result = Some(EvaluationResult::Pass);
        assert!(matches!(
            check_appeal_submission(&proposal(), &settled, 2, EvaluationResult::Pass),
            Ok(Precheck::Unchanged)
        ));
        assert!(check_appeal_submission(&proposal(), &settled, 2, EvaluationResult::Fail).is_err());
    }

    #[test]
    fn appeal_uses_its_own_threshold() {
        let steps = appealed();
        let step = &steps[1];
        assert!(!is_appeal_decided(step, EvaluationResult::Pass, 1, false));
        assert!(is_appeal_decided(step, EvaluationResult::Pass, 2, false));
        assert!(is_appeal_decided(step, EvaluationResult::Fail, 0, false));
        assert!(is_appeal_decided(step, EvaluationResult::Pass, 0, true));
    }
}
