pub mod evaluation;
pub mod report;
pub mod runner;
pub mod store;

pub use evaluation::{discover_samples, EvalEvent, Evaluator, SampleJob};
pub use report::{render, render_summary, OutputFormat, UNDEFINED};
pub use runner::{
    defines_function, extract_function_names, PytestRunner, SampleRunner, SampleRunnerError,
};
pub use store::{parse_records, scan, ResultsStore};
