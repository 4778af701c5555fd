//! Migration System
//!
//! Store (files on disk), ledger (applied rows), planner (what to run),
//! applier (one migration, one transaction) and the runner tying them together.

pub mod applier;
pub mod definitions;
pub mod ledger;
pub mod planner;
pub mod runner;
pub mod store;

pub use applier::*;
pub use definitions::*;
pub use ledger::*;
pub use planner::*;
pub use runner::*;
pub use store::*;
