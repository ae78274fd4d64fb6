//! CLI command implementations

pub mod conformance;
pub mod describe;
pub mod resolve;
