//! Token-budgeted context assembly.
//!
//! | Source | Order | Trim strategy |
//! |--------|-------|---------------|
//! | Relevant turns | Descending similarity | Stop at first misfit |
//! | Recent turns | Oldest first | Stop at first misfit |

pub mod assembler;
pub mod token;

pub use assembler::{AssemblerConfig, ContextAssembler, FillReport, fill_budget};
pub use token::{HeuristicEstimator, TiktokenEstimator, TokenEstimator, estimator_for};
