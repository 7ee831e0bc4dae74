//! Rubric criteria attached to rubric steps, and the scores reviewers give them.
//!
//! Criteria are stamped onto a step when the proposal is created and may be
//! replaced until the first answer lands. Each reviewer holds at most one
//! answer per criterion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, Transaction};
use std::collections::HashSet;

use crate::errors::AppError;

/// Inclusive score bounds of a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: i32,
    pub max: i32,
}

impl Default for ScoreRange {
    fn default() -> Self {
        ScoreRange { min: 1, max: 5 }
    }
}

impl ScoreRange {
    pub fn contains(&self, score: i32) -> bool {
        (self.min..=self.max).contains(&score)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricCriterionInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: ScoreRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricCriterion {
    pub id: i64,
    pub evaluation_id: i64,
    pub index: i32,
    pub title: String,
    pub description: Option<String>,
    pub parameters: ScoreRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RubricAnswerInput {
    pub criterion_id: i64,
    pub score: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RubricAnswer {
    pub criterion_id: i64,
    pub evaluation_id: i64,
    pub user_id: i64,
    pub score: i32,
    pub comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-criterion aggregate over every reviewer's answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionSummary {
    pub criterion_id: i64,
    pub title: String,
    pub answer_count: usize,
    pub average: Option<f64>,
}

pub fn validate_criteria(criteria: &[RubricCriterionInput]) -> Result<(), AppError> {
    for criterion in criteria {
        if criterion.title.trim().is_empty() {
            return Err(AppError::InvalidInput("Every rubric criterion needs a title".to_string()));
        }
        if criterion.parameters.min >= criterion.parameters.max {
            return Err(AppError::InvalidInput(format!(
                "Rubric criterion '{}' needs a minimum score below its maximum",
                criterion.title.trim()
            )));
        }
    }
    Ok(())
}

/// A reviewer's answer set must score every criterion of the step exactly once,
/// within its range.
pub fn check_answers(criteria: &[RubricCriterion], answers: &[RubricAnswerInput]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for answer in answers {
        let criterion = criteria
            .iter()
            .find(|c| c.id == answer.criterion_id)
            .ok_or_else(|| {
                AppError::InvalidInput(format!("Unknown rubric criterion {}", answer.criterion_id))
            })?;
        if !seen.insert(answer.criterion_id) {
            return Err(AppError::InvalidInput(format!(
                "Rubric criterion '{}' was answered twice",
                criterion.title
            )));
        }
        if !criterion.parameters.contains(answer.score) {
            return Err(AppError::InvalidInput(format!(
                "Score for '{}' must be between {} and {}",
                criterion.title, criterion.parameters.min, criterion.parameters.max
            )));
        }
    }
    if seen.len() != criteria.len() {
        return Err(AppError::InvalidInput(
            "Every question of the evaluation must be answered".to_string(),
        ));
    }
    Ok(())
}

/// Whether `answers` (one reviewer's) score every criterion.
pub fn answers_complete(criteria: &[RubricCriterion], answers: &[RubricAnswer]) -> bool {
    criteria
        .iter()
        .all(|c| answers.iter().any(|a| a.criterion_id == c.id))
}

pub fn summarize(criteria: &[RubricCriterion], answers: &[RubricAnswer]) -> Vec<CriterionSummary> {
    criteria
        .iter()
        .map(|criterion| {
            let scores: Vec<i32> = answers
                .iter()
                .filter(|a| a.criterion_id == criterion.id)
                .map(|a| a.score)
                .collect();
            let average = (!scores.is_empty())
                .then(|| scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64);
            CriterionSummary {
                criterion_id: criterion.id,
                title: criterion.title.clone(),
                answer_count: scores.len(),
                average,
            }
        })
        .collect()
}

pub async fn insert_criteria(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    criteria: &[RubricCriterionInput],
) -> Result<(), AppError> {
    for (position, criterion) in criteria.iter().enumerate() {
        sqlx::query(
            "INSERT INTO proposal_rubric_criteria \
                 (evaluation_id, position, title, description, min_score, max_score) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(evaluation_id)
        .bind(position as i32)
        .bind(criterion.title.trim())
        .bind(criterion.description.as_deref())
        .bind(criterion.parameters.min)
        .bind(criterion.parameters.max)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Swap the criteria of a step. Callers check that no answers exist yet.
pub async fn replace_criteria(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    criteria: &[RubricCriterionInput],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM proposal_rubric_criteria WHERE evaluation_id = $1")
        .bind(evaluation_id)
        .execute(&mut **tx)
        .await?;
    insert_criteria(tx, evaluation_id, criteria).await
}

pub async fn find_criteria<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Vec<RubricCriterion>, AppError> {
    let rows: Vec<(i64, i64, i32, String, Option<String>, i32, i32)> = sqlx::query_as(
        "SELECT id, evaluation_id, position, title, description, min_score, max_score \
         FROM proposal_rubric_criteria WHERE evaluation_id = $1 ORDER BY position",
    )
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, evaluation_id, index, title, description, min, max)| RubricCriterion {
            id,
            evaluation_id,
            index,
            title,
            description,
            parameters: ScoreRange { min, max },
        })
        .collect())
}

/// Insert or overwrite one reviewer's answers.
pub async fn upsert_answers(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_id: i64,
    user_id: i64,
    answers: &[RubricAnswerInput],
) -> Result<(), AppError> {
    for answer in answers {
        sqlx::query(
            "INSERT INTO proposal_rubric_answers (criterion_id, user_id, evaluation_id, score, comment) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (criterion_id, user_id) \
             DO UPDATE SET score = EXCLUDED.score, comment = EXCLUDED.comment, updated_at = NOW()",
        )
        .bind(answer.criterion_id)
        .bind(user_id)
        .bind(evaluation_id)
        .bind(answer.score)
        .bind(answer.comment.as_deref())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn find_answers<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
) -> Result<Vec<RubricAnswer>, AppError> {
    let answers = sqlx::query_as::<_, RubricAnswer>(
        "SELECT a.criterion_id, a.evaluation_id, a.user_id, a.score, a.comment, a.updated_at \
         FROM proposal_rubric_answers a \
         JOIN proposal_rubric_criteria c ON c.id = a.criterion_id \
         WHERE a.evaluation_id = $1 ORDER BY a.user_id, c.position",
    )
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;
    Ok(answers)
}

pub async fn find_answers_by<'e>(
    executor: impl PgExecutor<'e>,
    evaluation_id: i64,
    user_id: i64,
) -> Result<Vec<RubricAnswer>, AppError> {
    let answers = sqlx::query_as::<_, RubricAnswer>(
        "SELECT a.criterion_id, a.evaluation_id, a.user_id, a.score, a.comment, a.updated_at \
         FROM proposal_rubric_answers a \
         JOIN proposal_rubric_criteria c ON c.id = a.criterion_id \
         WHERE a.evaluation_id = $1 AND a.user_id = $2 ORDER BY c.position",
    )
    .bind(evaluation_id)
    .bind(user_id)
    .fetch_all(executor)
    .await?;
    Ok(answers)
}

pub async fn count_answers<'e>(executor: impl PgExecutor<'e>, evaluation_id: i64) -> Result<i64, AppError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM proposal_rubric_answers WHERE evaluation_id = $1")
            .bind(evaluation_id)
            .fetch_one(executor)
            .await?;
    Ok(count)
}

pub async fn delete_answers_for_evaluations(
    tx: &mut Transaction<'_, Postgres>,
    evaluation_ids: &[i64],
) -> Result<u64, AppError> {
    let done = sqlx::query("DELETE FROM proposal_rubric_answers WHERE evaluation_id = ANY($1)")
        .bind(evaluation_ids)
        .execute(&mut **tx)
        .await?;
    Ok(done.rows_affected())
}
