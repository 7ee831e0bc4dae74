//! Proposal transitions: review submission, appeals, rubric scoring, rollback
//! and the publish/archive lifecycle. Every transition row-locks the proposal
//! for its transaction and publishes its event only after commit.

pub mod appeal;
pub mod lifecycle;
pub mod rollback;
pub mod scoring;
pub mod submit;

pub use appeal::{AppealEvaluation, appeal_evaluation, set_appeal_reviewers, submit_appeal_result};
pub use lifecycle::{publish_proposal, set_archived, set_evaluation_reviewers};
pub use rollback::{GoBackToStep, RollbackPlan, RollbackTarget, go_back_to_step, plan_rollback};
pub use scoring::{
    RubricAnswers, RubricCriteria, RubricOverview, load_rubric, save_rubric_answers, set_rubric_criteria,
};
pub use submit::{SubmissionOutcome, SubmitEvaluationResult, submit_evaluation_result};
