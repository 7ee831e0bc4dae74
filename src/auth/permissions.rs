//! Proposal capability map.
//!
//! The engine treats this map as authoritative and opaque; it is computed from
//! a handful of facts about the caller:
//!
//! ```text
//! user --(space_members)--> space          member / admin
//! user --(proposal_authors)--> proposal    author
//! user --(proposal_reviewers)--> step      reviewer of the current step
//! user --(proposal_appeal_reviewers)--> step appeal reviewer of the current step
//! ```
//!
//! While the current step is under appeal only its appeal reviewers evaluate it.

use serde::Serialize;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::evaluation::{self, EvaluationType};
use crate::models::proposal::{self, ProposalStatus};
use crate::models::space;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProposalPermissions {
    pub view: bool,
    pub edit: bool,
    pub evaluate: bool,
    pub evaluate_appeal: bool,
    pub complete_evaluation: bool,
    #[serde(rename = "move")]
    pub move_proposal: bool,
    pub vote: bool,
    pub archive: bool,
}

/// What the map is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionFacts {
    pub is_member: bool,
    pub is_admin: bool,
    pub is_author: bool,
    pub reviews_current_step: bool,
    pub appeal_reviews_current_step: bool,
    pub current_step_appealed: bool,
    pub status: Option<ProposalStatus>,
    pub current_step_type: Option<EvaluationType>,
}

impl ProposalPermissions {
    pub fn from_facts(facts: &PermissionFacts) -> Self {
        let member = facts.is_member || facts.is_admin;
        let has_current_step = facts.current_step_type.is_some();
        let is_draft = facts.status == Some(ProposalStatus::Draft);

        ProposalPermissions {
            view: member || facts.is_author,
            edit: facts.is_admin || (facts.is_author && is_draft),
            evaluate: member
                && has_current_step
                && facts.reviews_current_step
                && !facts.current_step_appealed,
            evaluate_appeal: member && facts.current_step_appealed && facts.appeal_reviews_current_step,
            complete_evaluation: facts.is_admin && has_current_step,
            move_proposal: facts.is_admin || facts.is_author,
            vote: member && facts.current_step_type == Some(EvaluationType::Vote),
            archive: facts.is_admin || facts.is_author,
        }
    }

    pub fn can_review(&self) -> bool {
        self.evaluate || self.complete_evaluation
    }

    pub fn can_review_appeal(&self) -> bool {
        self.evaluate_appeal || self.complete_evaluation
    }
}

/// Capability map of `user_id` on `proposal_id`.
pub async fn compute_proposal_permissions(
    pool: &PgPool,
    proposal_id: i64,
    user_id: i64,
) -> Result<ProposalPermissions, AppError> {
    let proposal = proposal::find_by_id(pool, proposal_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id}")))?;
    let membership = space::membership(pool, proposal.space_id, user_id).await?;
    let is_author = proposal::is_author(pool, proposal_id, user_id).await?;

    let evaluations = evaluation::find_for_proposal(pool, proposal_id).await?;
    let current = evaluation::current_evaluation(proposal.status, &evaluations);
    let (reviews_current_step, appeal_reviews_current_step) = match current {
        Some(step) => (
            evaluation::find_reviewer_ids(pool, step.id).await?.contains(&user_id),
            evaluation::find_appeal_reviewer_ids(pool, step.id).await?.contains(&user_id),
        ),
        None => (false, false),
    };

    let facts = PermissionFacts {
        is_member: membership.is_some(),
        is_admin: membership == Some(true),
        is_author,
        reviews_current_step,
        appeal_reviews_current_step,
        current_step_appealed: current.is_some_and(|s| s.is_appealed()),
        status: Some(proposal.status),
        current_step_type: current.map(|s| s.evaluation_type),
    };
    Ok(ProposalPermissions::from_facts(&facts))
}

/// Guard for space-level configuration such as workflows.
pub async fn require_space_admin(pool: &PgPool, space_id: i64, user_id: i64) -> Result<(), AppError> {
    match space::membership(pool, space_id, user_id).await? {
        Some(true) => Ok(()),
        _ => Err(AppError::AdministratorOnly),
    }
}
