pub mod queries;
pub mod tally;
pub mod types;

pub use queries::*;
pub use types::*;
