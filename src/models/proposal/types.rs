use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::evaluation::ProposalEvaluation;
use crate::models::workflow::EvaluationBlueprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Published,
    Archived,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Published => "published",
            ProposalStatus::Archived => "archived",
        }
    }
}

impl FromStr for ProposalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProposalStatus::Draft),
            "published" => Ok(ProposalStatus::Published),
            "archived" => Ok(ProposalStatus::Archived),
            other => Err(AppError::Internal(format!("unknown proposal status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: i64,
    pub space_id: i64,
    pub created_by: i64,
    pub title: String,
    pub status: ProposalStatus,
    pub workflow_id: Option<i64>,
    pub is_template: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Archived either through the flag or a legacy `archived` status.
    pub fn is_archived(&self) -> bool {
        self.archived || self.status == ProposalStatus::Archived
    }
}

/// Proposal with its ordered steps and the derived current step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDetail {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub current_evaluation_id: Option<i64>,
    pub evaluations: Vec<ProposalEvaluation>,
}

/// Input for creating a draft proposal. Steps come from `workflow_id` when
/// set, otherwise from `evaluations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub space_id: i64,
    pub title: String,
    pub workflow_id: Option<i64>,
    #[serde(default)]
    pub is_template: bool,
    #[serde(default)]
    pub evaluations: Vec<EvaluationBlueprint>,
}
