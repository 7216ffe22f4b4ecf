//! CLI command handling

pub mod args;
pub mod handlers;
