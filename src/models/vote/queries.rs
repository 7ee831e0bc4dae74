use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::collections::HashMap;

use crate::errors::AppError;
use crate::models::evaluation::{self, ProposalEvaluation};
use super::types::*;

#[derive(sqlx::FromRow)]
struct VoteRow {
    id: i64,
    space_id: i64,
    proposal_id: Option<i64>,
    title: String,
    deadline: DateTime<Utc>,
    status: String,
    threshold: i32,
    vote_type: String,
    max_choices: i32,
    created_by: i64,
    created_at: DateTime<Utc>,
}

pub async fn find_by_id(pool: &PgPool, vote_id: i64) -> Result<Option<Vote>, AppError> {
    let row = sqlx::query_as::<_, VoteRow>(
        "SELECT id, space_id, proposal_id, title, deadline, status, threshold, vote_type, \
                max_choices, created_by, created_at \
         FROM votes WHERE id = $1",
    )
    .bind(vote_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let options: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM vote_options WHERE vote_id = $1 ORDER BY position",
    )
    .bind(vote_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(Vote {
        id: row.id,
        space_id: row.space_id,
        proposal_id: row.proposal_id,
        title: row.title,
        deadline: row.deadline,
        status: row.status.parse()?,
        threshold: row.threshold,
        vote_type: row.vote_type.parse()?,
        max_choices: row.max_choices,
        created_by: row.created_by,
        created_at: row.created_at,
        vote_options: options.into_iter().map(|o| o.0).collect(),
    }))
}

/// In-progress votes whose deadline has passed, with their options and ballots.
pub async fn find_expired_in_progress(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<VoteTally>, AppError> {
    let votes: Vec<(i64, String, i32)> = sqlx::query_as(
        "SELECT id, vote_type, threshold FROM votes \
         WHERE status = 'InProgress' AND deadline <= $1 \
         ORDER BY id",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    if votes.is_empty() {
        return Ok(Vec::new());
    }
    let vote_ids: Vec<i64> = votes.iter().map(|v| v.0).collect();

    let option_rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT vote_id, name FROM vote_options WHERE vote_id = ANY($1) ORDER BY vote_id, position",
    )
    .bind(&vote_ids[..])
    .fetch_all(pool)
    .await?;

    let ballot_rows: Vec<(i64, Vec<String>)> = sqlx::query_as(
        "SELECT vote_id, choices FROM user_votes WHERE vote_id = ANY($1)",
    )
    .bind(&vote_ids[..])
    .fetch_all(pool)
    .await?;

    let mut options: HashMap<i64, Vec<String>> = HashMap::new();
    for (vote_id, name) in option_rows {
        options.entry(vote_id).or_default().push(name);
    }
    let mut ballots: HashMap<i64, Vec<Vec<String>>> = HashMap::new();
    for (vote_id, choices) in ballot_rows {
        ballots.entry(vote_id).or_default().push(choices);
    }

    votes
        .into_iter()
        .map(|(id, vote_type, threshold)| {
            Ok(VoteTally {
                vote_id: id,
                vote_type: vote_type.parse()?,
                threshold,
                options: options.remove(&id).unwrap_or_default(),
                ballots: ballots.remove(&id).unwrap_or_default(),
            })
        })
        .collect()
}

/// Move still-open votes to `status`. Returns the ids actually changed; votes
/// closed concurrently by another run are skipped.
pub async fn close_batch(
    tx: &mut Transaction<'_, Postgres>,
    vote_ids: &[i64],
    status: VoteStatus,
) -> Result<Vec<i64>, AppError> {
    if vote_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64,)> = sqlx::query_as(
        "UPDATE votes SET status = $1 WHERE id = ANY($2) AND status = 'InProgress' RETURNING id",
    )
    .bind(status.as_str())
    .bind(vote_ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn delete_many(
    tx: &mut Transaction<'_, Postgres>,
    vote_ids: &[i64],
) -> Result<u64, AppError> {
    if vote_ids.is_empty() {
        return Ok(0);
    }
    let done = sqlx::query("DELETE FROM votes WHERE id = ANY($1)")
        .bind(vote_ids)
        .execute(&mut **tx)
        .await?;
    Ok(done.rows_affected())
}

/// Create the vote backing a `vote` step and link it. Returns the vote id.
pub async fn open_for_evaluation(
    tx: &mut Transaction<'_, Postgres>,
    space_id: i64,
    evaluation: &ProposalEvaluation,
    created_by: i64,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let settings = evaluation.vote_settings.clone().unwrap_or_default();
    let deadline = now + Duration::days(i64::from(settings.duration_days.max(1)));

    let (vote_id,): (i64,) = sqlx::query_as(
        "INSERT INTO votes (space_id, proposal_id, title, deadline, threshold, vote_type, max_choices, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
    )
    .bind(space_id)
    .bind(evaluation.proposal_id)
    .bind(&evaluation.title)
    .bind(deadline)
    .bind(settings.threshold)
    .bind(settings.vote_type.as_str())
    .bind(settings.max_choices)
    .bind(created_by)
    .fetch_one(&mut **tx)
    .await?;

    for (position, name) in settings.options.iter().enumerate() {
        sqlx::query("INSERT INTO vote_options (vote_id, position, name) VALUES ($1, $2, $3)")
            .bind(vote_id)
            .bind(position as i32)
            .bind(name)
            .execute(&mut **tx)
            .await?;
    }

    evaluation::set_vote_id(tx, evaluation.id, vote_id).await?;
    log::info!(
        "Opened vote {} for evaluation {} of proposal {} (deadline {})",
        vote_id, evaluation.id, evaluation.proposal_id, deadline
    );
    Ok(vote_id)
}

/// Record or replace a user's ballot.
pub async fn upsert_ballot<'e>(
    executor: impl PgExecutor<'e>,
    vote_id: i64,
    user_id: i64,
    choices: &[String],
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO user_votes (vote_id, user_id, choices) VALUES ($1, $2, $3) \
         ON CONFLICT (vote_id, user_id) DO UPDATE SET choices = EXCLUDED.choices, updated_at = NOW()",
    )
    .bind(vote_id)
    .bind(user_id)
    .bind(choices)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn find_ballots<'e>(
    executor: impl PgExecutor<'e>,
    vote_id: i64,
) -> Result<Vec<UserVote>, AppError> {
    let rows: Vec<(i64, Vec<String>)> = sqlx::query_as(
        "SELECT user_id, choices FROM user_votes WHERE vote_id = $1 ORDER BY user_id",
    )
    .bind(vote_id)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(user_id, choices)| UserVote { user_id, choices })
        .collect())
}
