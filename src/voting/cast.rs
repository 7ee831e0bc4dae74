use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashSet;

use crate::auth::permissions::compute_proposal_permissions;
use crate::errors::AppError;
use crate::models::space;
use crate::models::vote::{self, Vote, VoteStatus};

/// Body of `POST /api/votes/{id}/cast`.
#[derive(Debug, Clone, Deserialize)]
pub struct CastVote {
    pub choices: Vec<String>,
}

/// Ballot checks that need only the vote itself.
pub fn validate_ballot(vote: &Vote, choices: &[String], now: DateTime<Utc>) -> Result<(), AppError> {
    if vote.status != VoteStatus::InProgress || vote.deadline <= now {
        return Err(AppError::InvalidInput("Voting has closed".to_string()));
    }
    if choices.is_empty() {
        return Err(AppError::InvalidInput("Pick at least one option".to_string()));
    }
    if choices.len() > vote.max_choices.max(1) as usize {
        return Err(AppError::InvalidInput(format!(
            "At most {} options may be chosen",
            vote.max_choices
        )));
    }
    let mut seen = HashSet::new();
    for choice in choices {
        if !vote.vote_options.contains(choice) {
            return Err(AppError::InvalidInput(format!("\"{choice}\" is not an option of this vote")));
        }
        if !seen.insert(choice.as_str()) {
            return Err(AppError::InvalidInput(format!("\"{choice}\" was chosen twice")));
        }
    }
    Ok(())
}

/// Record or replace the caller's ballot on an open vote.
pub async fn cast_vote(pool: &PgPool, vote_id: i64, user_id: i64, choices: &[String]) -> Result<(), AppError> {
    let vote = vote::find_by_id(pool, vote_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vote {vote_id}")))?;

    let allowed = match vote.proposal_id {
        Some(proposal_id) => compute_proposal_permissions(pool, proposal_id, user_id).await?.vote,
        None => space::membership(pool, vote.space_id, user_id).await?.is_some(),
    };
    if !allowed {
        return Err(AppError::ActionNotPermitted("You cannot vote on this proposal".to_string()));
    }

    validate_ballot(&vote, choices, Utc::now())?;
    vote::upsert_ballot(pool, vote_id, user_id, choices).await?;
    log::info!("User {} voted on vote {}", user_id, vote_id);
    Ok(())
}
