pub mod aggregate;
pub mod config;
pub mod error;
pub mod estimator;
pub mod types;

pub use aggregate::{build_table, group_outcomes, summarize};
pub use config::{validate_ks, AggregateConfig, EvalConfig, RunnerConfig, StoreConfig, StoreMode};
pub use error::{PassKError, Result};
pub use estimator::{binomial, pass_at_k, round_to, DEFAULT_PRECISION, MAX_PRECISION};
pub use types::{
    is_known_problem, AggregateRow, GroupCounts, GroupKey, ModelSummary, OutcomeRecord, PassAtK,
    SummaryCell, KNOWN_PROBLEMS,
};
