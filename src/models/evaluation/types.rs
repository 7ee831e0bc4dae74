use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::proposal::ProposalStatus;
use crate::models::rubric::RubricCriterionInput;
use crate::models::vote::VoteSettings;

/// Kind of evaluation step. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    Feedback,
    PassFail,
    Rubric,
    Vote,
    Appeal,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationType::Feedback => "feedback",
            EvaluationType::PassFail => "pass_fail",
            EvaluationType::Rubric => "rubric",
            EvaluationType::Vote => "vote",
            EvaluationType::Appeal => "appeal",
        }
    }

    /// Feedback steps are moved forward by a single reviewer regardless of
    /// `required_reviews`.
    pub fn counts_reviews(&self) -> bool {
        !matches!(self, EvaluationType::Feedback)
    }
}

impl FromStr for EvaluationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feedback" => Ok(EvaluationType::Feedback),
            "pass_fail" => Ok(EvaluationType::PassFail),
            "rubric" => Ok(EvaluationType::Rubric),
            "vote" => Ok(EvaluationType::Vote),
            "appeal" => Ok(EvaluationType::Appeal),
            other => Err(AppError::Internal(format!("unknown evaluation type '{other}'"))),
        }
    }
}

impl fmt::Display for EvaluationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationResult {
    Pass,
    Fail,
}

impl EvaluationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationResult::Pass => "pass",
            EvaluationResult::Fail => "fail",
        }
    }
}

impl FromStr for EvaluationResult {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(EvaluationResult::Pass),
            "fail" => Ok(EvaluationResult::Fail),
            other => Err(AppError::Internal(format!("unknown evaluation result '{other}'"))),
        }
    }
}

/// One ordered step of a proposal's workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEvaluation {
    pub id: i64,
    pub proposal_id: i64,
    pub index: i32,
    #[serde(rename = "type")]
    pub evaluation_type: EvaluationType,
    pub title: String,
    pub result: Option<EvaluationResult>,
    pub decided_by: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub required_reviews: i32,
    pub final_step: bool,
    pub vote_id: Option<i64>,
    pub vote_settings: Option<VoteSettings>,
    pub decline_reasons: Vec<String>,
    pub decline_message: Option<String>,
    pub appealable: bool,
    pub appeal_required_reviews: i32,
    pub appealed_at: Option<DateTime<Utc>>,
    pub appealed_by: Option<i64>,
    pub appeal_reason: Option<String>,
}

impl ProposalEvaluation {
    pub fn is_appealed(&self) -> bool {
        self.appealed_at.is_some()
    }
}

/// Blueprint used when stamping evaluations onto a new proposal.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub index: i32,
    pub evaluation_type: EvaluationType,
    pub title: String,
    pub required_reviews: i32,
    pub final_step: bool,
    pub vote_settings: Option<VoteSettings>,
    pub appealable: bool,
    pub appeal_required_reviews: i32,
    pub rubric_criteria: Vec<RubricCriterionInput>,
}

/// The step a proposal is currently sitting on.
///
/// Drafts have no current step. Otherwise it is the first step that has not
/// passed. A passed `final_step` or an appealed step ends the walk early; when
/// every step passed, the last one. `evaluations` must be ordered by index.
pub fn current_evaluation(
    status: ProposalStatus,
    evaluations: &[ProposalEvaluation],
) -> Option<&ProposalEvaluation> {
    if status == ProposalStatus::Draft {
        return None;
    }
    for evaluation in evaluations {
        if evaluation.result != Some(EvaluationResult::Pass)
            || evaluation.final_step
            || evaluation.is_appealed()
        {
            return Some(evaluation);
        }
    }
    evaluations.last()
}

/// The step after `evaluation_id`, if any.
pub fn next_evaluation(
    evaluations: &[ProposalEvaluation],
    evaluation_id: i64,
) -> Option<&ProposalEvaluation> {
    let position = evaluations.iter().position(|e| e.id == evaluation_id)?;
    evaluations.get(position + 1)
}
