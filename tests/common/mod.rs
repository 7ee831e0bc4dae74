//! Shared test infrastructure.
//!
//! # Test Database Setup
//! Integration tests run against the Postgres server named by `DATABASE_URL`.
//! `setup_test_db()` creates a throwaway schema per test, points every pooled
//! connection at it and applies the migrations. Every database test is
//! `#[ignore = "requires DATABASE_URL"]`; run them with
//! `cargo test -- --ignored` once the variable is set. A missing
//! `DATABASE_URL` then fails the test instead of passing silently.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use evalflow::db::MIGRATIONS;
use evalflow::evaluations;
use evalflow::models::evaluation::EvaluationType;
use evalflow::models::proposal::{self, NewProposal};
use evalflow::models::vote::VoteSettings;
use evalflow::models::workflow::EvaluationBlueprint;

// ============================================================================
// TEST CONSTANTS
// ============================================================================

pub const SPACE: i64 = 1;
pub const ADMIN: i64 = 100;
pub const AUTHOR: i64 = 200;
pub const REVIEWER: i64 = 300;
pub const MEMBER: i64 = 400;
pub const OUTSIDER: i64 = 999;

// ============================================================================
// DATABASE SETUP
// ============================================================================

pub struct TestDb {
    pool: PgPool,
    pub schema: String,
}

impl TestDb {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Fresh schema with migrations applied.
pub async fn setup_test_db() -> TestDb {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a Postgres server to run database tests");

    let schema = format!("evalflow_test_{:016x}", rand::random::<u64>());
    let admin = PgPool::connect(&url).await.expect("connect to DATABASE_URL");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create test schema");
    admin.close().await;

    let search_path = schema.clone();
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {search_path}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .expect("connect test pool");

    sqlx::raw_sql(MIGRATIONS).execute(&pool).await.expect("run migrations");
    seed_space(&pool).await;

    TestDb { pool, schema }
}

/// Space 1: an admin, an author, a reviewer and a plain member.
async fn seed_space(pool: &PgPool) {
    for (user_id, is_admin) in [(ADMIN, true), (AUTHOR, false), (REVIEWER, false), (MEMBER, false)] {
        sqlx::query("INSERT INTO space_members (space_id, user_id, is_admin) VALUES ($1, $2, $3)")
            .bind(SPACE)
            .bind(user_id)
            .bind(is_admin)
            .execute(pool)
            .await
            .expect("seed space member");
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn blueprint(id: &str, evaluation_type: EvaluationType) -> EvaluationBlueprint {
    EvaluationBlueprint {
        id: id.to_string(),
        title: id.to_string(),
        evaluation_type,
        required_reviews: 1,
        final_step: false,
        vote_settings: match evaluation_type {
            EvaluationType::Vote => Some(VoteSettings::default()),
            _ => None,
        },
        appealable: false,
        appeal_required_reviews: 1,
        rubric_criteria: Vec::new(),
    }
}

/// Draft proposal by `AUTHOR` with one step per blueprint.
pub async fn create_proposal(pool: &PgPool, steps: Vec<EvaluationBlueprint>) -> i64 {
    let input = NewProposal {
        space_id: SPACE,
        title: "Community grant".to_string(),
        workflow_id: None,
        is_template: false,
        evaluations: steps,
    };
    proposal::create(pool, AUTHOR, &input).await.expect("create proposal")
}

/// Published proposal with `REVIEWER` assigned to every step.
pub async fn create_published(pool: &PgPool, steps: Vec<EvaluationBlueprint>) -> i64 {
    let proposal_id = create_proposal(pool, steps).await;
    sqlx::query(
        "INSERT INTO proposal_reviewers (evaluation_id, user_id) \
         SELECT id, $2 FROM proposal_evaluations WHERE proposal_id = $1",
    )
    .bind(proposal_id)
    .bind(REVIEWER)
    .execute(pool)
    .await
    .expect("assign reviewer");
    evaluations::publish_proposal(pool, proposal_id, AUTHOR)
        .await
        .expect("publish proposal");
    proposal_id
}

/// Ids of a proposal's steps in index order.
pub async fn step_ids(pool: &PgPool, proposal_id: i64) -> Vec<i64> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM proposal_evaluations WHERE proposal_id = $1 ORDER BY step_index",
    )
    .bind(proposal_id)
    .fetch_all(pool)
    .await
    .expect("load step ids");
    rows.into_iter().map(|r| r.0).collect()
}

/// Write a result straight to the table, bypassing review rules.
pub async fn force_result(pool: &PgPool, evaluation_id: i64, result: &str) {
    sqlx::query(
        "UPDATE proposal_evaluations SET result = $1, decided_by = $2, completed_at = NOW() WHERE id = $3",
    )
    .bind(result)
    .bind(ADMIN)
    .bind(evaluation_id)
    .execute(pool)
    .await
    .expect("force result");
}

pub async fn set_deadline(pool: &PgPool, vote_id: i64, deadline: DateTime<Utc>) {
    sqlx::query("UPDATE votes SET deadline = $1 WHERE id = $2")
        .bind(deadline)
        .bind(vote_id)
        .execute(pool)
        .await
        .expect("set deadline");
}

pub async fn count_events(pool: &PgPool, proposal_id: i64, scope: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM proposal_events WHERE proposal_id = $1 AND scope = $2",
    )
    .bind(proposal_id)
    .bind(scope)
    .fetch_one(pool)
    .await
    .expect("count events");
    count
}
