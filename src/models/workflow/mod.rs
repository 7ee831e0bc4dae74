pub mod diff;
pub mod queries;
pub mod types;

pub use queries::*;
pub use types::*;
