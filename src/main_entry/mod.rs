mod cancellation;
mod correlation;
mod errors;
mod observer;
mod options;
mod pipeline_executor;
mod pipeline_run;
mod query_result;

pub use cancellation::*;
pub use correlation::*;
pub use errors::*;
pub use observer::*;
pub use options::*;
pub use pipeline_executor::*;
pub use pipeline_run::*;
pub use query_result::*;
