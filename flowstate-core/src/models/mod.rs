//! Data models for flowstate

pub mod configuration;
pub mod predicate;
pub mod report;
pub mod workflow;

pub use configuration::*;
pub use predicate::*;
pub use report::*;
pub use workflow::*;
