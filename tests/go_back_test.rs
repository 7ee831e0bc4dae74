/// Integration tests for moving a proposal back to an earlier step.

use evalflow::errors::AppError;
use evalflow::evaluations::{RollbackTarget, go_back_to_step};
use evalflow::models::evaluation::{self, EvaluationResult, EvaluationType};
use evalflow::models::proposal::{self, ProposalStatus};
use evalflow::models::{review, vote};

mod common;
use common::*;

async fn pass_step(pool: &sqlx::PgPool, proposal_id: i64, evaluation_id: i64) {
    use evalflow::evaluations::{SubmitEvaluationResult, submit_evaluation_result};
    let input = SubmitEvaluationResult {
        evaluation_id,
        result: Some(EvaluationResult::Pass),
        decline_reasons: Vec::new(),
        decline_message: None,
    };
    submit_evaluation_result(pool, proposal_id, REVIEWER, &input)
        .await
        .expect("pass step");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_clears_target_and_later_steps_only() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(
        pool,
        vec![
            blueprint("feedback", EvaluationType::Feedback),
            blueprint("review", EvaluationType::PassFail),
            blueprint("rubric", EvaluationType::Rubric),
        ],
    )
    .await;
    let steps = step_ids(pool, id).await;
    pass_step(pool, id, steps[0]).await;
    pass_step(pool, id, steps[1]).await;

    let plan = go_back_to_step(pool, id, AUTHOR, RollbackTarget::Evaluation(steps[1]))
        .await
        .expect("rollback");
    assert_eq!(plan.cleared_evaluation_ids, vec![steps[1], steps[2]]);

    let detail = proposal::find_detail(pool, id).await.expect("detail").expect("exists");
    assert_eq!(detail.evaluations[0].result, Some(EvaluationResult::Pass));
    assert_eq!(detail.evaluations[1].result, None);
    assert_eq!(detail.evaluations[1].completed_at, None);
    assert_eq!(detail.evaluations[1].decided_by, None);
    assert_eq!(detail.current_evaluation_id, Some(steps[1]));
    assert!(review::find_for_evaluation(pool, steps[1]).await.expect("reviews").is_empty());
    assert_eq!(review::find_for_evaluation(pool, steps[0]).await.expect("reviews").len(), 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_to_draft_resets_status_without_event() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(
        pool,
        vec![blueprint("feedback", EvaluationType::Feedback), blueprint("review", EvaluationType::PassFail)],
    )
    .await;
    let steps = step_ids(pool, id).await;
    pass_step(pool, id, steps[0]).await;
    let events_before = count_events(pool, id, "proposal.status_changed").await;

    go_back_to_step(pool, id, ADMIN, RollbackTarget::Draft).await.expect("rollback");

    let detail = proposal::find_detail(pool, id).await.expect("detail").expect("exists");
    assert_eq!(detail.proposal.status, ProposalStatus::Draft);
    assert_eq!(detail.current_evaluation_id, None);
    assert!(detail.evaluations.iter().all(|e| e.result.is_none()));
    assert_eq!(count_events(pool, id, "proposal.status_changed").await, events_before);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_past_completed_vote_is_rejected() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(
        pool,
        vec![
            blueprint("review", EvaluationType::PassFail),
            blueprint("vote", EvaluationType::Vote),
            blueprint("appeal", EvaluationType::Appeal),
        ],
    )
    .await;
    let steps = step_ids(pool, id).await;
    pass_step(pool, id, steps[0]).await;
    force_result(pool, steps[1], "pass").await;

    let err = go_back_to_step(pool, id, AUTHOR, RollbackTarget::Evaluation(steps[0]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let step = evaluation::find_by_id(pool, steps[0]).await.expect("load").expect("exists");
    assert_eq!(step.result, Some(EvaluationResult::Pass));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_with_rewards_is_rejected() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(pool, vec![blueprint("review", EvaluationType::PassFail)]).await;
    let steps = step_ids(pool, id).await;
    pass_step(pool, id, steps[0]).await;
    sqlx::query("INSERT INTO proposal_rewards (proposal_id) VALUES ($1)")
        .bind(id)
        .execute(pool)
        .await
        .expect("add reward");

    let err = go_back_to_step(pool, id, ADMIN, RollbackTarget::Evaluation(steps[0]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
    let step = evaluation::find_by_id(pool, steps[0]).await.expect("load").expect("exists");
    assert_eq!(step.result, Some(EvaluationResult::Pass));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_requires_move_permission() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(pool, vec![blueprint("review", EvaluationType::PassFail)]).await;
    let steps = step_ids(pool, id).await;

    let err = go_back_to_step(pool, id, REVIEWER, RollbackTarget::Evaluation(steps[0]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActionNotPermitted(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_onto_open_vote_restarts_it() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(
        pool,
        vec![blueprint("review", EvaluationType::PassFail), blueprint("vote", EvaluationType::Vote)],
    )
    .await;
    let steps = step_ids(pool, id).await;
    pass_step(pool, id, steps[0]).await;
    let old_vote = evaluation::find_by_id(pool, steps[1])
        .await
        .expect("load")
        .and_then(|e| e.vote_id)
        .expect("vote opened");

    let plan = go_back_to_step(pool, id, AUTHOR, RollbackTarget::Evaluation(steps[1]))
        .await
        .expect("rollback");
    assert_eq!(plan.deleted_vote_ids, vec![old_vote]);

    assert!(vote::find_by_id(pool, old_vote).await.expect("load vote").is_none());
    let new_vote = evaluation::find_by_id(pool, steps[1])
        .await
        .expect("load")
        .and_then(|e| e.vote_id)
        .expect("vote reopened");
    assert_ne!(new_vote, old_vote);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_to_another_proposals_step_is_not_found() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let first = create_published(pool, vec![blueprint("review", EvaluationType::PassFail)]).await;
    let second = create_published(pool, vec![blueprint("review", EvaluationType::PassFail)]).await;
    let foreign = step_ids(pool, second).await[0];

    let err = go_back_to_step(pool, first, ADMIN, RollbackTarget::Evaluation(foreign))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
