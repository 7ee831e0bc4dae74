pub mod evaluation;
pub mod proposal;
pub mod review;
pub mod reward;
pub mod rubric;
pub mod space;
pub mod vote;
pub mod workflow;
