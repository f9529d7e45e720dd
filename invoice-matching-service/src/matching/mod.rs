//! Manual bank transaction to invoice matching.

pub mod amount;
pub mod applier;
pub mod cascade;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod proposal;
pub mod reconciler;
pub mod settlement;

pub use amount::{to_amount, to_amount_opt, AMOUNT_EPSILON, FUNDED_RATIO_THRESHOLD};
pub use cascade::CascadeOutcome;
pub use classifier::MatchClassification;
pub use engine::{ManualMatchOutcome, ManualMatchRequest, MatchingEngine, TransactionMatches};
pub use error::MatchError;
pub use reconciler::TransactionState;
