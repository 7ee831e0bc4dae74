//! Proposal evaluation workflow engine.
//!
//! Proposals move through an ordered list of evaluation steps (feedback,
//! pass/fail, rubric, vote, appeal). Reviewers submit results, authors and
//! admins can roll a proposal back, a scheduled sweep closes expired votes,
//! and workflow edits propagate to template proposals.

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod evaluations;
pub mod events;
pub mod handlers;
pub mod models;
pub mod voting;
