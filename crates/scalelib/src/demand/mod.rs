mod calculator;
mod result;

pub use calculator::{DemandCalculator, DemandConfig, MatchOutcome};
pub use result::DemandResult;
