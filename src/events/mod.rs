//! Proposal event publisher.
//!
//! Events are appended to the `proposal_events` outbox, from which the host
//! application's webhook and notification workers fan out. Publishing is
//! fire-and-forget from the engine's point of view: callers log failures and
//! move on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};

use crate::errors::AppError;
use crate::models::evaluation::{self, EvaluationResult, ProposalEvaluation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventScope {
    ProposalStatusChanged,
    ProposalPublished,
    ProposalPassed,
    ProposalFailed,
    ProposalAppealed,
}

impl EventScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::ProposalStatusChanged => "proposal.status_changed",
            EventScope::ProposalPublished => "proposal.published",
            EventScope::ProposalPassed => "proposal.passed",
            EventScope::ProposalFailed => "proposal.failed",
            EventScope::ProposalAppealed => "proposal.appealed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposalEventContext {
    pub proposal_id: i64,
    pub space_id: i64,
    pub current_evaluation_id: Option<i64>,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEvent {
    pub id: i64,
    pub space_id: i64,
    pub proposal_id: i64,
    pub scope: String,
    pub user_id: Option<i64>,
    pub current_evaluation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// `proposal.passed`/`proposal.failed` when the current step is the decided
/// final step of the workflow: the first `final_step` or appealed step, else
/// the last.
pub fn final_outcome_scope(
    evaluations: &[ProposalEvaluation],
    current_evaluation_id: Option<i64>,
) -> Option<EventScope> {
    let final_step = evaluations
        .iter()
        .find(|e| e.final_step || e.is_appealed())
        .or_else(|| evaluations.last())?;
    if Some(final_step.id) != current_evaluation_id {
        return None;
    }
    match final_step.result? {
        EvaluationResult::Pass => Some(EventScope::ProposalPassed),
        EvaluationResult::Fail => Some(EventScope::ProposalFailed),
    }
}

/// Announce that a proposal moved within its workflow.
pub async fn publish_proposal_event(pool: &PgPool, ctx: ProposalEventContext) -> Result<(), AppError> {
    let evaluations = evaluation::find_for_proposal(pool, ctx.proposal_id).await?;
    if let Some(scope) = final_outcome_scope(&evaluations, ctx.current_evaluation_id) {
        record(pool, scope, &ctx).await?;
    }
    record(pool, EventScope::ProposalStatusChanged, &ctx).await?;
    Ok(())
}

pub async fn publish_proposal_published(pool: &PgPool, ctx: ProposalEventContext) -> Result<(), AppError> {
    record(pool, EventScope::ProposalPublished, &ctx).await
}

/// `proposal.appealed`, carrying the appealing author, then the status change.
pub async fn publish_proposal_appealed(pool: &PgPool, ctx: ProposalEventContext) -> Result<(), AppError> {
    record(pool, EventScope::ProposalAppealed, &ctx).await?;
    publish_proposal_event(pool, ctx).await
}

async fn record<'e>(
    executor: impl PgExecutor<'e>,
    scope: EventScope,
    ctx: &ProposalEventContext,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO proposal_events (space_id, proposal_id, scope, user_id, current_evaluation_id) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(ctx.space_id)
    .bind(ctx.proposal_id)
    .bind(scope.as_str())
    .bind(ctx.user_id)
    .bind(ctx.current_evaluation_id)
    .execute(executor)
    .await?;
    log::info!(
        "Published {} for proposal {} (current evaluation {:?})",
        scope.as_str(),
        ctx.proposal_id,
        ctx.current_evaluation_id
    );
    Ok(())
}

/// Publish and swallow the error; used after a transaction has committed.
pub async fn publish_best_effort(pool: &PgPool, ctx: ProposalEventContext) {
    if let Err(e) = publish_proposal_event(pool, ctx).await {
        log::error!("Failed to publish event for proposal {}: {}", ctx.proposal_id, e);
    }
}

pub async fn find_for_proposal<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
) -> Result<Vec<ProposalEvent>, AppError> {
    let events = sqlx::query_as::<_, ProposalEvent>(
        "SELECT id, space_id, proposal_id, scope, user_id, current_evaluation_id, created_at \
         FROM proposal_events WHERE proposal_id = $1 ORDER BY id",
    )
    .bind(proposal_id)
    .fetch_all(executor)
    .await?;
    Ok(events)
}
