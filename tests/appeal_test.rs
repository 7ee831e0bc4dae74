/// Integration tests for appeals on failed pass/fail steps.

use sqlx::PgPool;

use evalflow::errors::AppError;
use evalflow::evaluations::{
    AppealEvaluation, RollbackTarget, SubmissionOutcome, SubmitEvaluationResult, appeal_evaluation,
    go_back_to_step, set_appeal_reviewers, submit_appeal_result, submit_evaluation_result,
};
use evalflow::models::evaluation::{self, EvaluationResult, EvaluationType};
use evalflow::models::{proposal, review};

mod common;
use common::*;

fn submission(evaluation_id: i64, result: EvaluationResult) -> SubmitEvaluationResult {
    SubmitEvaluationResult {
        evaluation_id,
        result: Some(result),
        decline_reasons: Vec::new(),
        decline_message: None,
    }
}

fn appeal(evaluation_id: i64) -> AppealEvaluation {
    AppealEvaluation {
        evaluation_id,
        reason: "The revised budget answers the reviewer's concern".to_string(),
    }
}

/// `[appealable review(failed), community vote]` with `MEMBER` and `REVIEWER`
/// as appeal reviewers; returns (proposal, step ids).
async fn failed_appealable(pool: &PgPool, appeal_required_reviews: i32) -> (i64, Vec<i64>) {
    let mut review = blueprint("review", EvaluationType::PassFail);
    review.appealable = true;
    review.appeal_required_reviews = appeal_required_reviews;
    let id = create_published(pool, vec![review, blueprint("community", EvaluationType::Vote)]).await;
    let steps = step_ids(pool, id).await;
    set_appeal_reviewers(pool, id, steps[0], ADMIN, &[MEMBER, REVIEWER])
        .await
        .expect("assign appeal reviewers");
    submit_evaluation_result(pool, id, REVIEWER, &submission(steps[0], EvaluationResult::Fail))
        .await
        .expect("fail step");
    (id, steps)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_appeal_is_decided_by_appeal_reviewers() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let (id, steps) = failed_appealable(pool, 2).await;

    let err = appeal_evaluation(pool, id, MEMBER, &appeal(steps[0])).await.unwrap_err();
    assert!(matches!(err, AppError::ActionNotPermitted(_)));

    appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.expect("appeal");
    let step = evaluation::find_by_id(pool, steps[0]).await.expect("load").expect("exists");
    assert_eq!(step.result, None);
    assert_eq!(step.appealed_by, Some(AUTHOR));
    assert!(step.appealed_at.is_some());
    assert_eq!(count_events(pool, id, "proposal.appealed").await, 1);

    let err = submit_evaluation_result(pool, id, REVIEWER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = submit_appeal_result(pool, id, OUTSIDER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActionNotPermitted(_)));

    let outcome = submit_appeal_result(pool, id, MEMBER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .expect("first appeal review");
    assert_eq!(outcome, SubmissionOutcome::Recorded);

    let err = submit_appeal_result(pool, id, MEMBER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActionNotPermitted(_)));

    let outcome = submit_appeal_result(pool, id, REVIEWER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .expect("second appeal review");
    assert_eq!(
        outcome,
        SubmissionOutcome::Decided { result: EvaluationResult::Pass, current_evaluation_id: steps[0] }
    );

    let detail = proposal::find_detail(pool, id).await.expect("detail").expect("exists");
    assert_eq!(detail.current_evaluation_id, Some(steps[0]));
    assert_eq!(detail.evaluations[0].result, Some(EvaluationResult::Pass));
    assert_eq!(detail.evaluations[1].vote_id, None);
    assert_eq!(count_events(pool, id, "proposal.passed").await, 1);

    let reviews = review::find_for_evaluation(pool, steps[0]).await.expect("reviews");
    assert_eq!(reviews.iter().filter(|r| r.appeal).count(), 2);
    assert_eq!(reviews.iter().filter(|r| !r.appeal).count(), 1);

    let err = appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_failed_appeal_ends_the_proposal() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let (id, steps) = failed_appealable(pool, 2).await;
    appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.expect("appeal");

    let outcome = submit_appeal_result(pool, id, MEMBER, &submission(steps[0], EvaluationResult::Fail))
        .await
        .expect("appeal review");
    assert_eq!(
        outcome,
        SubmissionOutcome::Decided { result: EvaluationResult::Fail, current_evaluation_id: steps[0] }
    );
    assert_eq!(count_events(pool, id, "proposal.failed").await, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_only_appealable_failed_steps_accept_appeals() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let id = create_published(
        pool,
        vec![blueprint("review", EvaluationType::PassFail), blueprint("council", EvaluationType::PassFail)],
    )
    .await;
    let steps = step_ids(pool, id).await;
    submit_evaluation_result(pool, id, REVIEWER, &submission(steps[0], EvaluationResult::Fail))
        .await
        .expect("fail step");

    let err = appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = set_appeal_reviewers(pool, id, steps[0], ADMIN, &[MEMBER]).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let mut blank = appeal(steps[0]);
    blank.reason = "   ".to_string();
    let err = appeal_evaluation(pool, id, AUTHOR, &blank).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_rollback_discards_the_appeal() {
    let db = setup_test_db().await;
    let pool = db.pool();

    let (id, steps) = failed_appealable(pool, 1).await;
    appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.expect("appeal");
    submit_appeal_result(pool, id, MEMBER, &submission(steps[0], EvaluationResult::Pass))
        .await
        .expect("appeal review");

    go_back_to_step(pool, id, ADMIN, RollbackTarget::Evaluation(steps[0]))
        .await
        .expect("roll back");

    let step = evaluation::find_by_id(pool, steps[0]).await.expect("load").expect("exists");
    assert_eq!(step.result, None);
    assert_eq!(step.appealed_at, None);
    assert_eq!(step.appeal_reason, None);
    assert!(review::find_for_evaluation(pool, steps[0]).await.expect("reviews").is_empty());

    submit_evaluation_result(pool, id, REVIEWER, &submission(steps[0], EvaluationResult::Fail))
        .await
        .expect("review again");
    appeal_evaluation(pool, id, AUTHOR, &appeal(steps[0])).await.expect("appeal again");
}
