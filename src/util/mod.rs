pub mod tree_render;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;

/// Renders batches as a boxed table, for logs and debugging.
pub fn pretty_batches_string(batches: &[RecordBatch]) -> Result<String, ArrowError> {
    Ok(pretty_format_batches(batches)?.to_string())
}
