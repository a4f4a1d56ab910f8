use arrow::record_batch::RecordBatch;

use crate::BoxError;

/// The relational engine the pipeline runs on. It executes ordinary SQL and owns the
/// temporary tables stages materialize into. No DDL other than temp-table create and drop is
/// ever issued through it.
#[async_trait::async_trait]
pub trait RelationalEngine: Send + Sync {
    /// Runs a query and returns its full result.
    async fn execute(&self, sql: &str) -> Result<RecordBatch, BoxError>;

    /// Runs `CREATE TEMP TABLE <name> AS (<sql>)` and returns the number of rows written.
    async fn create_temp_table_as(&self, name: &str, sql: &str) -> Result<usize, BoxError>;

    /// Creates temp table `name` holding exactly `rows`, in order.
    async fn create_temp_table_from_rows(
        &self,
        name: &str,
        rows: &RecordBatch,
    ) -> Result<(), BoxError>;

    /// Drops table `name`. Dropping a table that does not exist succeeds.
    async fn drop_table(&self, name: &str) -> Result<(), BoxError>;
}

pub fn create_temp_table_sql(name: &str, sql: &str) -> String {
    format!("CREATE TEMP TABLE {} AS ({})", name, sql)
}

pub fn drop_table_sql(name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", name)
}
