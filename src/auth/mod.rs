pub mod identity;
pub mod permissions;
