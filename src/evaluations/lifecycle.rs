use chrono::Utc;
use sqlx::PgPool;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::events::{self, ProposalEventContext};
use crate::models::evaluation::{self, EvaluationType};
use crate::models::proposal::{self, ProposalStatus};
use crate::models::{space, vote};

/// Take a draft live. The first step becomes current; a leading vote step
/// gets its vote opened straight away.
pub async fn publish_proposal(pool: &PgPool, proposal_id: i64, user_id: i64) -> Result<(), AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;

    let mut tx = pool.begin().await?;
    let proposal = proposal::lock_for_update(&mut tx, proposal_id).await?;
    if proposal.is_archived() {
        return Err(AppError::ActionNotPermitted("Cannot publish an archived proposal".to_string()));
    }
    if !permissions.edit {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to publish this proposal".to_string(),
        ));
    }
    if proposal.status != ProposalStatus::Draft {
        return Err(AppError::InvalidInput("Proposal is already published".to_string()));
    }

    let evaluations = evaluation::find_for_proposal(&mut *tx, proposal_id).await?;
    let Some(first) = evaluations.first() else {
        return Err(AppError::InvalidInput("Proposal has no evaluation steps".to_string()));
    };

    proposal::set_status(&mut tx, proposal_id, ProposalStatus::Published).await?;
    if first.evaluation_type == EvaluationType::Vote && first.vote_id.is_none() {
        vote::open_for_evaluation(&mut tx, proposal.space_id, first, user_id, Utc::now()).await?;
    }
    tx.commit().await?;
    log::info!("Proposal {} published by user {}", proposal_id, user_id);

    let ctx = ProposalEventContext {
        proposal_id,
        space_id: proposal.space_id,
        current_evaluation_id: Some(first.id),
        user_id,
    };
    if let Err(e) = events::publish_proposal_published(pool, ctx).await {
        log::error!("Failed to publish event for proposal {}: {}", proposal_id, e);
    }
    Ok(())
}

/// Archive or restore a proposal. Archived proposals reject every transition.
pub async fn set_archived(
    pool: &PgPool,
    proposal_id: i64,
    user_id: i64,
    archived: bool,
) -> Result<(), AppError> {
    let permissions = compute_proposal_permissions(pool, proposal_id, user_id).await?;
    if !permissions.archive {
        return Err(AppError::ActionNotPermitted(
            "You do not have permission to archive this proposal".to_string(),
        ));
    }
    proposal::set_archived(pool, proposal_id, archived).await?;
    log::info!(
        "Proposal {} {} by user {}",
        proposal_id,
        if archived { "archived" } else { "unarchived" },
        user_id
    );
    Ok(())
}

/// Replace the reviewers of one step. Reviewers must be members of the space.
pub async fn set_evaluation_reviewers(
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
    evaluation::find_by_id(&mut *tx, evaluation_id)
        .await?
        .filter(|e| e.proposal_id == proposal_id)
        .ok_or_else(|| AppError::NotFound(format!("evaluation {evaluation_id}")))?;

    for reviewer_id in reviewer_ids {
        if space::membership(&mut *tx, proposal.space_id, *reviewer_id).await?.is_none() {
            return Err(AppError::InvalidInput(format!(
                "User {reviewer_id} is not a member of this space"
            )));
        }
    }

    evaluation::set_reviewers(&mut tx, evaluation_id, reviewer_ids).await?;
    tx.commit().await?;
    log::info!(
        "Evaluation {} of proposal {} now has {} reviewers",
        evaluation_id,
        proposal_id,
        reviewer_ids.len()
    );
    Ok(())
}
