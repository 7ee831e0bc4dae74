use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeSet;

use crate::errors::AppError;
use crate::events::{self, ProposalEventContext};
use crate::models::evaluation::{self, EvaluationResult, EvaluationType, next_evaluation};
use crate::models::proposal;
use crate::models::vote::{self, VoteStatus, tally};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub processed: usize,
    pub passed: usize,
    pub rejected: usize,
    pub proposals_notified: usize,
}

/// Close every in-progress vote whose deadline is at or before `now` and
/// cascade the outcome into the steps backing them.
///
/// The proposals behind the votes are locked first, the same lock result
/// submission and rollback take.
pub async fn close_expired_votes(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepSummary, AppError> {
    let tallies = vote::find_expired_in_progress(pool, now).await?;
    if tallies.is_empty() {
        return Ok(SweepSummary::default());
    }
    let partition = tally::partition(&tallies);

    let mut tx = pool.begin().await?;
    let expired: Vec<i64> = partition.passed.iter().chain(&partition.rejected).copied().collect();
    proposal::lock_for_votes(&mut tx, &expired).await?;
    // votes deleted or closed while waiting on the locks drop out here
    let passed = vote::close_batch(&mut tx, &partition.passed, VoteStatus::Passed).await?;
    let rejected = vote::close_batch(&mut tx, &partition.rejected, VoteStatus::Rejected).await?;

    let passed_steps =
        evaluation::set_results_for_votes(&mut tx, &passed, EvaluationResult::Pass, now).await?;
    let failed_steps =
        evaluation::set_results_for_votes(&mut tx, &rejected, EvaluationResult::Fail, now).await?;

    for (evaluation_id, proposal_id) in &passed_steps {
        open_following_vote(&mut tx, *proposal_id, *evaluation_id, now).await?;
    }
    tx.commit().await?;

    let proposal_ids: BTreeSet<i64> = passed_steps
        .iter()
        .chain(failed_steps.iter())
        .map(|(_, proposal_id)| *proposal_id)
        .collect();
    for proposal_id in &proposal_ids {
        notify(pool, *proposal_id).await;
    }

    let summary = SweepSummary {
        processed: passed.len() + rejected.len(),
        passed: passed.len(),
        rejected: rejected.len(),
        proposals_notified: proposal_ids.len(),
    };
    log::info!(
        "Closed {} expired votes ({} passed, {} rejected)",
        summary.processed, summary.passed, summary.rejected
    );
    Ok(summary)
}

/// Open the vote of the step after a passed vote step, when that step is a vote too.
async fn open_following_vote(
    tx: &mut Transaction<'_, Postgres>,
    proposal_id: i64,
    evaluation_id: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let Some(proposal) = proposal::find_by_id(&mut **tx, proposal_id).await? else {
        return Ok(());
    };
    let steps = evaluation::find_for_proposal(&mut **tx, proposal_id).await?;
    if steps.iter().any(|s| s.id == evaluation_id && s.final_step) {
        return Ok(());
    }
    if let Some(next) = next_evaluation(&steps, evaluation_id)
        && next.evaluation_type == EvaluationType::Vote
        && next.vote_id.is_none()
    {
        vote::open_for_evaluation(tx, proposal.space_id, next, proposal.created_by, now).await?;
    }
    Ok(())
}

async fn notify(pool: &PgPool, proposal_id: i64) {
    match proposal::find_detail(pool, proposal_id).await {
        Ok(Some(detail)) => {
            events::publish_best_effort(
                pool,
                ProposalEventContext {
                    proposal_id,
                    space_id: detail.proposal.space_id,
                    current_evaluation_id: detail.current_evaluation_id,
                    user_id: detail.proposal.created_by,
                },
            )
            .await;
        }
        Ok(None) => log::warn!("Proposal {} vanished before its vote event was published", proposal_id),
        Err(e) => log::error!("Failed to load proposal {} for vote event: {}", proposal_id, e),
    }
}
