//! CLI command implementations

pub mod restore;
pub mod serve;
pub mod sessions;
pub mod validate;
