//! Quality oracles for the game generation pipeline.
//!
//! An oracle scores a deployed build from 0 to 10 and lists its defects.
//! The repair loop uses the score to decide whether a game is kept.

pub mod script;

pub use gamegen_core::oracle::{Defect, QualityOracle, QualityReport, Severity};
pub use script::ScriptOracle;
