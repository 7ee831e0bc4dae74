use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, Postgres, Transaction};

use crate::errors::AppError;
use crate::models::rubric;
use crate::models::vote::VoteSettings;
use super::types::*;

const SELECT_EVALUATION: &str = "\
    SELECT id, proposal_id, step_index, evaluation_type, title, result, decided_by, \
           completed_at, required_reviews, final_step, vote_id, vote_settings, \
           decline_reasons, decline_message, appealable, appeal_required_reviews, \
           appealed_at, appealed_by, appeal_reason \
    FROM proposal_evaluations";

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    id: i64,
    proposal_id: i64,
    step_index: i32,
    evaluation_type: String,
    title: String,
    result: Option<String>,
    decided_by: Option<i64>,
    completed_at: Option<DateTime<Utc>>,
    required_reviews: i32,
    final_step: bool,
    vote_id: Option<i64>,
    vote_settings: Option<Json<VoteSettings>>,
    decline_reasons: Vec<String>,
    decline_message: Option<String>,
    appealable: bool,
    appeal_required_reviews: i32,
    appealed_at: Option<DateTime<Utc>>,
    appealed_by: Option<i64>,
    appeal_reason: Option<String>,
}

impl TryFrom<EvaluationRow> for ProposalEvaluation {
    type Error = AppError;

    fn try_from(row: EvaluationRow) -> Result<Self, Self::Error> {
        Ok(ProposalEvaluation {
            id: row.id,
            proposal_id: row.proposal_id,
            index: row.step_index,
            evaluation_type: row.evaluation_type.parse()?,
            title: row.title,
            result: row.result.as_deref().map(str::parse).transpose()?,
            decided_by: row.decided_by,
            completed_at: row.completed_at,
            required_reviews: row.required_reviews,
            final_step: row.final_step,
            vote_id: row.vote_id,
            vote_settings: row.vote_settings.map(|Json(s)| s),
            decline_reasons: row.decline_reasons,
            decline_message: row.decline_message,
            appealable: row.appealable,
            appeal_required_reviews: row.appeal_required_reviews,
            appealed_at: row.appealed_at,
            appealed_by: row.appealed_by,
            appeal_reason: row.appeal_reason,
        })
    }
}

/// All steps of a proposal, ordered by index.
pub async fn find_for_proposal<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
) -> Result<Vec<ProposalEvaluation>, AppError> {
    let sql = format!("{SELECT_EVALUATION} WHERE proposal_id = $1 ORDER BY step_index");
    let rows = sqlx::query_as::<_, EvaluationRow>(&sql)
        .bind(proposal_id)
        .fetch_all(executor)
        .await?;
    rows.into_iter().map(ProposalEvaluation::try_from).collect()
}

pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Option<ProposalEvaluation>, AppError> {
    let sql = format!("{SELECT_EVALUATION} WHERE id = $1");
    let row = sqlx::query_as::<_, EvaluationRow>(&sql)
        .bind(evaluation_id)
        .fetch_optional(executor)
        .await?;
    row.map(ProposalEvaluation::try_from).transpose()
}

/// Stamp steps, with their rubric criteria, onto a proposal. Returns the new
/// ids in input order.
pub async fn insert_many(
    tx: &mut Transaction<'_, Postgres>,
    proposal_id: i64,
    steps: &[NewEvaluation],
) -> Result<Vec<i64>, AppError> {
    let mut ids = Vec::with_capacity(steps.len());
    for step in steps {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO proposal_evaluations \
                 (proposal_id, step_index, evaluation_type, title, required_reviews, final_step, \
                  vote_settings, appealable, appeal_required_reviews) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id",
        )
        .bind(proposal_id)
        .bind(step.index)
        .bind(step.evaluation_type.as_str())
        .bind(&step.title)
        .bind(step.required_reviews.max(1))
        .bind(step.final_step)
        .bind(step.vote_settings.clone().map(Json))
        .bind(step.appealable)
        .bind(step.appeal_required_reviews.max(1))
        .fetch_one(&mut **tx)
        .await?;
        rubric::insert_criteria(tx, id, &step.rubric_criteria).await?;
        ids.push(id);
    }
    Ok(ids)
}

/// Record the terminal result of a step.
pub async fn set_result(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    result: EvaluationResult,
    decided_by: i64,
    completed_at: DateTime<Utc>,
    decline_reasons: &[String],
    decline_message: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE proposal_evaluations \
         SET result = $1, decided_by = $2, completed_at = $3, decline_reasons = $4, decline_message = $5 \
         WHERE id = $6",
    )
    .bind(result.as_str())
    .bind(decided_by)
    .bind(completed_at)
    .bind(decline_reasons)
    .bind(decline_message)
    .bind(evaluation_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Reset the result, its decline data, any appeal and the vote link on a set of steps.
pub async fn clear_results(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_ids: &[i64],
) -> Result<u64, AppError> {
    let done = sqlx::query(
        "UPDATE proposal_evaluations \
         SET result = NULL, decided_by = NULL, completed_at = NULL, vote_id = NULL, \
             decline_reasons = '{}', decline_message = NULL, \
             appealed_at = NULL, appealed_by = NULL, appeal_reason = NULL \
         WHERE id = ANY($1)",
    )
    .bind(evaluation_ids)
    .execute(&mut **tx)
    .await?;
    Ok(done.rows_affected())
}

/// Cascade a batch of closed votes into their steps. Returns (evaluation id, proposal id)
/// for each step touched.
pub async fn set_results_for_votes(
    tx: &mut Transaction<'_, Postgres>,
    vote_ids: &[i64],
    result: EvaluationResult,
    completed_at: DateTime<Utc>,
) -> Result<Vec<(i64, i64)>, AppError> {
    if vote_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        "UPDATE proposal_evaluations SET result = $1, completed_at = $2 \
         WHERE vote_id = ANY($3) \
         RETURNING id, proposal_id",
    )
    .bind(result.as_str())
    .bind(completed_at)
    .bind(vote_ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows)
}

pub async fn set_vote_id(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    vote_id: i64,
) -> Result<(), AppError> {
    sqlx::query("UPDATE proposal_evaluations SET vote_id = $1 WHERE id = $2")
        .bind(vote_id)
        .bind(evaluation_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Structural update used by workflow propagation: position, title and type only.
pub async fn update_structure(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    index: i32,
    title: &str,
    evaluation_type: EvaluationType,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE proposal_evaluations SET step_index = $1, title = $2, evaluation_type = $3 WHERE id = $4",
    )
    .bind(index)
    .bind(title)
    .bind(evaluation_type.as_str())
    .bind(evaluation_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Open an appeal on a failed step: the result is cleared and the appeal
/// reviewers take over.
pub async fn mark_appealed(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    appealed_by: i64,
    reason: &str,
    appealed_at: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE proposal_evaluations \
         SET result = NULL, decided_by = NULL, completed_at = NULL, \
             decline_reasons = '{}', decline_message = NULL, \
             appealed_at = $1, appealed_by = $2, appeal_reason = $3 \
         WHERE id = $4",
    )
    .bind(appealed_at)
    .bind(appealed_by)
    .bind(reason)
    .bind(evaluation_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn delete_many(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_ids: &[i64],
) -> Result<u64, AppError> {
    let done = sqlx::query("DELETE FROM proposal_evaluations WHERE id = ANY($1)")
        .bind(evaluation_ids)
        .execute(&mut **tx)
        .await?;
    Ok(done.rows_affected())
}

/// Replace the reviewer list of a step.
pub async fn set_reviewers(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    user_ids: &[i64],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM proposal_reviewers WHERE evaluation_id = $1")
        .bind(evaluation_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO proposal_reviewers (evaluation_id, user_id) \
         SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
    )
    .bind(evaluation_id)
    .bind(user_ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn find_reviewer_ids<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM proposal_reviewers WHERE evaluation_id = $1 ORDER BY user_id",
    )
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn set_appeal_reviewers(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    user_ids: &[i64],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM proposal_appeal_reviewers WHERE evaluation_id = $1")
        .bind(evaluation_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "INSERT INTO proposal_appeal_reviewers (evaluation_id, user_id) \
         SELECT $1, UNNEST($2::BIGINT[]) ON CONFLICT DO NOTHING",
    )
    .bind(evaluation_id)
    .bind(user_ids)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn find_appeal_reviewer_ids<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM proposal_appeal_reviewers WHERE evaluation_id = $1 ORDER BY user_id",
    )
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}
