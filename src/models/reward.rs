use sqlx::PgExecutor;

use crate::errors::AppError;

/// Number of rewards generated from a proposal. Rewards are created by the
/// host application; this service only reads them.
pub async fn count_for_proposal<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM proposal_rewards WHERE proposal_id = $1")
        .bind(proposal_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}
