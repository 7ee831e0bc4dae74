use chrono::Utc;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::events::{self, ProposalEventContext};
use crate::models::evaluation::{self, EvaluationType, ProposalEvaluation, current_evaluation};
use crate::models::proposal::{self, Proposal, ProposalStatus};
use crate::models::{review, reward, rubric, vote};

/// Where to move a proposal back to: one of its steps, or `"draft"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    Draft,
    Evaluation(i64),
}

impl<'de> Deserialize<'de> for RollbackTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Id(id) => Ok(RollbackTarget::Evaluation(id)),
            Raw::Text(text) if text == "draft" => Ok(RollbackTarget::Draft),
            Raw::Text(text) => text.parse().map(RollbackTarget::Evaluation).map_err(|_| {
                de::Error::custom(format!("expected an evaluation id or \"draft\", got \"{text}\""))
            }),
        }
    }
}

/// Body of `PUT /api/proposals/{id}/back-to-step`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoBackToStep {
    pub evaluation_id: RollbackTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    pub cleared_evaluation_ids: Vec<i64>,
    pub deleted_vote_ids: Vec<i64>,
    pub reset_to_draft: bool,
    pub reopen_vote_for: Option<i64>,
    pub current_evaluation_id: Option<i64>,
}

/// Work out what a rollback touches, rejecting it when it is not allowed.
pub fn plan_rollback(
    proposal: &Proposal,
    evaluations: &[ProposalEvaluation],
    target: RollbackTarget,
    reward_count: i64,
    can_move: bool,
) -> Result<RollbackPlan, AppError> {
    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot move an archived proposal".to_string()));
    }
    if reward_count > 0 {
        return Err(AppError::InvalidInput(
            "Cannot move a proposal that already has rewards".to_string(),
        ));
    }
    if !can_move {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to move this proposal".to_string(),
        ));
    }

    let from_index = match target {
        RollbackTarget::Draft => None,
        RollbackTarget::Evaluation(id) => {
            let step = evaluations
                .iter()
                .find(|e| e.id == id)
                .ok_or_else(|| AppError::NotFound(format!("evaluation {id}")))?;
            let current = current_evaluation(proposal.status, evaluations).ok_or_else(|| {
                AppError::InvalidInput("Proposal has not been published".to_string())
            })?;
            if step.index > current.index {
                return Err(AppError::InvalidInput(
                    "Cannot move forward past the current evaluation".to_string(),
                ));
            }
            Some(step.index)
        }
    };

    let slice: Vec<&ProposalEvaluation> = evaluations
        .iter()
        .filter(|e| from_index.is_none_or(|index| e.index >= index))
        .collect();

    if let Some(step) = slice
        .iter()
        .find(|e| e.evaluation_type == EvaluationType::Vote && e.result.is_some())
    {
        return Err(AppError::InvalidInput(format!(
            "Cannot move back past the completed vote \"{}\"",
            step.title
        )));
    }

    let target_step = match target {
        RollbackTarget::Evaluation(id) => slice.iter().find(|e| e.id == id).copied(),
        RollbackTarget::Draft => None,
    };

    Ok(RollbackPlan {
        cleared_evaluation_ids: slice.iter().map(|e| e.id).collect(),
        deleted_vote_ids: slice.iter().filter_map(|e| e.vote_id).collect(),
        reset_to_draft: target == RollbackTarget::Draft,
        reopen_vote_for: target_step
            .filter(|s| s.evaluation_type == EvaluationType::Vote)
            .map(|s| s.id),
        current_evaluation_id: target_step.map(|s| s.id),
    })
}

/// Move a proposal back to an earlier step (or to draft), discarding every
/// result, review, appeal and rubric answer from that step onwards.
pub async fn go_back_to_step(
    pool: &PgPool,
    proposal_id: i64,
    user_id: i64,
    target: RollbackTarget,
) -> Result<RollbackPlan, AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;
    let rewards = reward::count_for_proposal(&mut *tx, proposal_id).await?;

    let plan = plan_rollback(&proposal, &evaluations, target, rewards, permissions.move_proposal)?;

    evaluation::clear_results(&mut tx, &plan.cleared_evaluation_ids).await?;
    review::delete_for_evaluations(&mut tx, &plan.cleared_evaluation_ids).await?;
    rubric::delete_answers_for_evaluations(&mut tx, &plan.cleared_evaluation_ids).await?;
    vote::delete_many(&mut tx, &plan.deleted_vote_ids).await?;

    if plan.reset_to_draft {
        proposal::set_status(&mut tx, proposal_id, ProposalStatus::Draft).await?;
    }
    if let Some(step_id) = plan.reopen_vote_for {
        let step = evaluations
            .iter()
            .find(|e| e.id == step_id)
            .ok_or_else(|| AppError::Internal(format!("rollback target {step_id} vanished")))?;
        vote::open_for_evaluation(&mut tx, proposal.space_id, step, user_id, Utc::now()).await?;
    }

    tx.commit().await?;
    log::info!(
        "Proposal {} moved back to {:?} by user {}: {} steps cleared, {} votes deleted",
        proposal_id,
        target,
        user_id,
        plan.cleared_evaluation_ids.len(),
        plan.deleted_vote_ids.len()
    );

    if !plan.reset_to_draft {
        events::publish_best_effort(
            pool,
            ProposalEventContext {
                proposal_id,
                space_id: proposal.space_id,
                current_evaluation_id: plan.current_evaluation_id,
                user_id,
            },
        )
        .await;
    }

    Ok(plan)
}
