pub mod binder;
pub mod engine;
pub mod executor;
pub mod function;
pub mod main_entry;
pub mod parser;
pub mod planner;
pub mod util;

#[cfg(test)]
mod test_util;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use self::main_entry::{
    CancellationToken, PipelineError, PipelineExecutor, PipelineOptions, PipelineOptionsBuilder,
    PipelineResult,
};
