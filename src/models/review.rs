use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, Postgres, Transaction};

use crate::errors::AppError;
use crate::models::evaluation::EvaluationResult;

/// A single reviewer's verdict on a step. Appeal reviews form a separate round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub evaluation_id: i64,
    pub reviewer_id: i64,
    pub appeal: bool,
    pub result: EvaluationResult,
    pub decline_reasons: Vec<String>,
    pub decline_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

pub async fn has_reviewed<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
    reviewer_id: i64,
    appeal: bool,
) -> Result<bool, AppError> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM proposal_evaluation_reviews \
                        WHERE evaluation_id = $1 AND reviewer_id = $2 AND appeal = $3)",
    )
    .bind(evaluation_id)
    .bind(reviewer_id)
    .bind(appeal)
    .fetch_one(executor)
    .await?;
    Ok(exists)
}

/// Insert a review. Returns `false` when the reviewer already has one for
/// this step and round; the unique constraint settles concurrent submissions.
pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    reviewer_id: i64,
    appeal: bool,
    result: EvaluationResult,
    decline_reasons: &[String],
    decline_message: Option<&str>,
) -> Result<bool, AppError> {
    let done = sqlx::query(
        "INSERT INTO proposal_evaluation_reviews \
             (evaluation_id, reviewer_id, appeal, result, decline_reasons, decline_message) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (evaluation_id, reviewer_id, appeal) DO NOTHING",
    )
    .bind(evaluation_id)
    .bind(reviewer_id)
    .bind(appeal)
    .bind(result.as_str())
    .bind(decline_reasons)
    .bind(decline_message)
    .execute(&mut **tx)
    .await?;
    Ok(done.rows_affected() == 1)
}

pub async fn count_with_result<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
    appeal: bool,
    result: EvaluationResult,
) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM proposal_evaluation_reviews \
         WHERE evaluation_id = $1 AND appeal = $2 AND result = $3",
    )
    .bind(evaluation_id)
    .bind(appeal)
    .bind(result.as_str())
    .fetch_one(executor)
    .await?;
    Ok(count)
}

pub async fn find_for_evaluation<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Vec<Review>, AppError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: i64,
        evaluation_id: i64,
        reviewer_id: i64,
        appeal: bool,
        result: String,
        decline_reasons: Vec<String>,
        decline_message: Option<String>,
        completed_at: DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, Row>(
        "SELECT id, evaluation_id, reviewer_id, appeal, result, decline_reasons, decline_message, \
                completed_at \
         FROM proposal_evaluation_reviews WHERE evaluation_id = $1 ORDER BY appeal, id",
    )
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(Review {
                id: row.id,
                evaluation_id: row.evaluation_id,
                reviewer_id: row.reviewer_id,
                appeal: row.appeal,
                result: row.result.parse()?,
                decline_reasons: row.decline_reasons,
                decline_message: row.decline_message,
                completed_at: row.completed_at,
            })
        })
        .collect()
}

pub async fn delete_for_evaluations(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_ids: &[i64],
) -> Result<u64, AppError> {
    let done = sqlx::query("DELETE FROM proposal_evaluation_reviews WHERE evaluation_id = ANY($1)")
        .bind(evaluation_ids)
        .execute(&mut **tx)
        .await?;
    Ok(done.rows_affected())
}
