use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteStatus {
    InProgress,
    Passed,
    Rejected,
}

impl VoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteStatus::InProgress => "InProgress",
            VoteStatus::Passed => "Passed",
            VoteStatus::Rejected => "Rejected",
        }
    }
}

impl FromStr for VoteStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(VoteStatus::InProgress),
            "Passed" => Ok(VoteStatus::Passed),
            "Rejected" => Ok(VoteStatus::Rejected),
            other => Err(AppError::Internal(format!("unknown vote status '{other}'"))),
        }
    }
}

/// How ballots are counted against the threshold.
///
/// `Approval` only looks at the first option ("Yes"); `SingleChoice` passes
/// when any option reaches the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoteType {
    #[default]
    Approval,
    SingleChoice,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Approval => "Approval",
            VoteType::SingleChoice => "SingleChoice",
        }
    }
}

impl FromStr for VoteType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Approval" => Ok(VoteType::Approval),
            "SingleChoice" => Ok(VoteType::SingleChoice),
            other => Err(AppError::Internal(format!("unknown vote type '{other}'"))),
        }
    }
}

/// Settings carried by `vote` steps and used to open their vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoteSettings {
    pub threshold: i32,
    pub duration_days: i32,
    pub options: Vec<String>,
    pub max_choices: i32,
    #[serde(rename = "type")]
    pub vote_type: VoteType,
}

impl Default for VoteSettings {
    fn default() -> Self {
        Self {
            threshold: 50,
            duration_days: 5,
            options: vec!["Yes".to_string(), "No".to_string(), "Abstain".to_string()],
            max_choices: 1,
            vote_type: VoteType::Approval,
        }
    }
}

impl VoteSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if !(0..=100).contains(&self.threshold) {
            return Err(AppError::InvalidInput("Vote threshold must be between 0 and 100".to_string()));
        }
        if self.duration_days < 1 {
            return Err(AppError::InvalidInput("Vote duration must be at least one day".to_string()));
        }
        if self.options.len() < 2 {
            return Err(AppError::InvalidInput("A vote needs at least two options".to_string()));
        }
        if self.max_choices < 1 || self.max_choices as usize > self.options.len() {
            return Err(AppError::InvalidInput("Vote max choices is out of range".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: i64,
    pub space_id: i64,
    pub proposal_id: Option<i64>,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub status: VoteStatus,
    pub threshold: i32,
    pub vote_type: VoteType,
    pub max_choices: i32,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub vote_options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserVote {
    pub user_id: i64,
    pub choices: Vec<String>,
}

/// Everything the tally needs for one expired vote.
#[derive(Debug, Clone)]
pub struct VoteTally {
    pub vote_id: i64,
    pub vote_type: VoteType,
    pub threshold: i32,
    pub options: Vec<String>,
    pub ballots: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_status_parses_only_stored_values() {
        for status in [VoteStatus::InProgress, VoteStatus::Passed, VoteStatus::Rejected] {
            assert_eq!(status.as_str().parse::<VoteStatus>().ok(), Some(status));
        }
        assert!(matches!("Cancelled".parse::<VoteStatus>(), Err(AppError::Internal(_))));
    }
}
