use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::evaluation::{EvaluationType, NewEvaluation};
use crate::models::rubric::RubricCriterionInput;
use crate::models::vote::VoteSettings;

fn one() -> i32 {
    1
}

/// One step of a workflow template. `id` is stable across edits of the
/// workflow; `title` may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationBlueprint {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub evaluation_type: EvaluationType,
    #[serde(default = "one")]
    pub required_reviews: i32,
    #[serde(default)]
    pub final_step: bool,
    #[serde(default)]
    pub vote_settings: Option<VoteSettings>,
    /// Pass/fail steps only: a failed result may be appealed by the author.
    #[serde(default)]
    pub appealable: bool,
    #[serde(default = "one")]
    pub appeal_required_reviews: i32,
    /// Rubric steps only.
    #[serde(default)]
    pub rubric_criteria: Vec<RubricCriterionInput>,
}

impl EvaluationBlueprint {
    pub fn to_new_evaluation(&self, index: i32) -> NewEvaluation {
        let vote_settings = match self.evaluation_type {
            EvaluationType::Vote => Some(self.vote_settings.clone().unwrap_or_default()),
            _ => None,
        };
        let rubric_criteria = match self.evaluation_type {
            EvaluationType::Rubric => self.rubric_criteria.clone(),
            _ => Vec::new(),
        };
        NewEvaluation {
            index,
            evaluation_type: self.evaluation_type,
            title: self.title.trim().to_string(),
            required_reviews: self.required_reviews.max(1),
            final_step: self.final_step,
            vote_settings,
            appealable: self.appealable && self.evaluation_type == EvaluationType::PassFail,
            appeal_required_reviews: self.appeal_required_reviews.max(1),
            rubric_criteria,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: i64,
    pub space_id: i64,
    pub title: String,
    pub index: i32,
    pub evaluations: Vec<EvaluationBlueprint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create (no `id`) or replace a workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpsert {
    pub id: Option<i64>,
    pub space_id: i64,
    pub title: String,
    #[serde(default)]
    pub index: i32,
    pub evaluations: Vec<EvaluationBlueprint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    pub workflow: Workflow,
    pub templates_updated: usize,
}
