//! Domain models for the aggregator
//!
//! Core types for batch proving, recursive aggregation and the two-phase
//! commit-reveal settlement flow.

mod batch;
mod messages;
mod proof;

pub use batch::*;
pub use messages::*;
pub use proof::*;
