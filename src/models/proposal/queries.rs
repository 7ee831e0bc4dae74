use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};

use crate::errors::AppError;
use crate::models::evaluation::{self, NewEvaluation};
use crate::models::workflow::{self, EvaluationBlueprint};
use super::types::*;

const SELECT_PROPOSAL: &str = "\
    SELECT id, space_id, created_by, title, status, workflow_id, is_template, archived, \
           created_at, updated_at \
    FROM proposals";

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: i64,
    space_id: i64,
    created_by: i64,
    title: String,
    status: String,
    workflow_id: Option<i64>,
    is_template: bool,
    archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProposalRow> for Proposal {
    type Error = AppError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(Proposal {
            id: row.id,
            space_id: row.space_id,
            created_by: row.created_by,
            title: row.title,
            status: row.status.parse()?,
            workflow_id: row.workflow_id,
            is_template: row.is_template,
            archived: row.archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
) -> Result<Option<Proposal>, AppError> {
    let sql = format!("{SELECT_PROPOSAL} WHERE id = $1");
    let row = sqlx::query_as::<_, ProposalRow>(&sql)
        .bind(proposal_id)
        .fetch_optional(executor)
        .await?;
    row.map(Proposal::try_from).transpose()
}

/// Load and row-lock a proposal for the rest of the transaction. Transitions on
/// the same proposal queue behind each other here.
pub async fn lock_for_update(
    tx: &mut Transaction<'_, Postgres>,
    proposal_id: i64,
) -> Result<Proposal, AppError> {
    let sql = format!("{SELECT_PROPOSAL} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, ProposalRow>(&sql)
        .bind(proposal_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("proposal {proposal_id}")))?;
    Proposal::try_from(row)
}

/// Row-lock the proposals behind a set of votes, in id order, so the sweep
/// queues behind (and ahead of) per-proposal transitions.
pub async fn lock_for_votes(
    tx: &mut Transaction<'_, Postgres>,
    vote_ids: &[i64],
) -> Result<Vec<i64>, AppError> {
    if vote_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM proposals \
         WHERE id IN (SELECT proposal_id FROM votes WHERE id = ANY($1)) \
         ORDER BY id FOR UPDATE",
    )
    .bind(vote_ids)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Proposal with its steps and derived current step.
pub async fn find_detail(pool: &PgPool, proposal_id: i64) -> Result<Option<ProposalDetail>, AppError> {
    let Some(proposal) = find_by_id(pool, proposal_id).await? else {
        return Ok(None);
    };
    let evaluations = evaluation::find_for_proposal(pool, proposal_id).await?;
    let current_evaluation_id =
        evaluation::current_evaluation(proposal.status, &evaluations).map(|e| e.id);
    Ok(Some(ProposalDetail {
        proposal,
        current_evaluation_id,
        evaluations,
    }))
}

/// Create a draft proposal and stamp its steps in index order. The creator
/// becomes an author. Returns the new proposal id.
pub async fn create(pool: &PgPool, created_by: i64, input: &NewProposal) -> Result<i64, AppError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(AppError::InvalidInput("Proposal title is required".to_string()));
    }

    let mut tx = pool.begin().await?;

    let blueprints: Vec<EvaluationBlueprint> = match input.workflow_id {
        Some(workflow_id) => {
            let wf = workflow::find_by_id(&mut *tx, workflow_id)
                .await?
                .filter(|w| w.space_id == input.space_id)
                .ok_or_else(|| AppError::NotFound(format!("workflow {workflow_id}")))?;
            wf.evaluations
        }
        None => input.evaluations.clone(),
    };
    workflow::validate_blueprints(&blueprints)?;

    let (proposal_id,): (i64,) = sqlx::query_as(
        "INSERT INTO proposals (space_id, created_by, title, status, workflow_id, is_template) \
         VALUES ($1, $2, $3, 'draft', $4, $5) RETURNING id",
    )
    .bind(input.space_id)
    .bind(created_by)
    .bind(title)
    .bind(input.workflow_id)
    .bind(input.is_template)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO proposal_authors (proposal_id, user_id) VALUES ($1, $2)")
        .bind(proposal_id)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;

    let steps: Vec<NewEvaluation> = blueprints
        .iter()
        .enumerate()
        .map(|(index, b)| b.to_new_evaluation(index as i32))
        .collect();
    evaluation::insert_many(&mut tx, proposal_id, &steps).await?;

    tx.commit().await?;

    log::info!(
        "Created proposal {} in space {} with {} evaluation steps",
        proposal_id, input.space_id, steps.len()
    );
    Ok(proposal_id)
}

pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    proposal_id: i64,
    status: ProposalStatus,
) -> Result<(), AppError> {
    sqlx::query("UPDATE proposals SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status.as_str())
        .bind(proposal_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn set_archived<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
    archived: bool,
) -> Result<(), AppError> {
    sqlx::query("UPDATE proposals SET archived = $1, updated_at = NOW() WHERE id = $2")
        .bind(archived)
        .bind(proposal_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn is_author<'e>(
    executor: impl PgExecutor<'e>,
    proposal_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM proposal_authors WHERE proposal_id = $1 AND user_id = $2)",
    )
    .bind(proposal_id)
    .bind(user_id)
    .fetch_one(executor)
    .await?;
    Ok(exists)
}

/// Template proposals built from a workflow; the targets of workflow propagation.
pub async fn find_template_ids_for_workflow(
    tx: &mut Transaction<'_, Postgres>,
    workflow_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM proposals WHERE workflow_id = $1 AND is_template ORDER BY id FOR UPDATE",
    )
    .bind(workflow_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}
