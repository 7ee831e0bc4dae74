//! Ballot counting for expired votes.
//!
//! A vote passes when the share of ballots naming a qualifying option reaches
//! the threshold percentage. For `Approval` votes only the first option
//! qualifies; for `SingleChoice` votes any option does. A vote nobody voted on
//! is rejected.

use super::types::{VoteStatus, VoteTally, VoteType};

/// Vote ids split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TallyPartition {
    pub passed: Vec<i64>,
    pub rejected: Vec<i64>,
}

pub fn outcome(tally: &VoteTally) -> VoteStatus {
    let total = tally.ballots.len();
    if total == 0 {
        return VoteStatus::Rejected;
    }

    let count_for = |option: &str| {
        tally
            .ballots
            .iter()
            .filter(|choices| choices.iter().any(|c| c == option))
            .count()
    };
    // Integer form of `count / total * 100 >= threshold`.
    let reaches_threshold = |count: usize| count * 100 >= tally.threshold.max(0) as usize * total;

    let passed = match tally.vote_type {
        VoteType::Approval => tally
            .options
            .first()
            .is_some_and(|yes| reaches_threshold(count_for(yes))),
        VoteType::SingleChoice => tally
            .options
            .iter()
            .any(|option| reaches_threshold(count_for(option))),
    };

    if passed { VoteStatus::Passed } else { VoteStatus::Rejected }
}

pub fn partition(tallies: &[VoteTally]) -> TallyPartition {
    let mut result = TallyPartition::default();
    for tally in tallies {
        match outcome(tally) {
            VoteStatus::Passed => result.passed.push(tally.vote_id),
            _ => result.rejected.push(tally.vote_id),
        }
    }
    result
}
