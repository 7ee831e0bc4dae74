pub mod cast;
pub mod scheduler;
pub mod sweep;

pub use cast::{CastVote, cast_vote};
pub use scheduler::spawn_scheduler;
pub use sweep::{SweepSummary, close_expired_votes};
