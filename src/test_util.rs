use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

use crate::engine::{create_temp_table_sql, RelationalEngine};
use crate::executor::{EvaluationBatch, SemanticBackend};
use crate::planner::{CallPosition, SemanticCall};
use crate::BoxError;

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `n` documents: `id` 0..n, `text` of length `id + 1`, `category` even/odd.
pub(crate) fn docs(n: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from_iter_values(0..n as i64)),
            Arc::new(StringArray::from_iter_values(
                (0..n).map(|i| "a".repeat(i + 1)),
            )),
            Arc::new(StringArray::from_iter_values(
                (0..n).map(|i| if i % 2 == 0 { "even" } else { "odd" }),
            )),
        ],
    )
    .unwrap()
}

/// Rows as text, one line per row with values separated by a space. Nulls read `NULL`.
pub(crate) fn rows_to_string(batch: &RecordBatch) -> String {
    (0..batch.num_rows())
        .map(|row| {
            batch
                .columns()
                .iter()
                .map(|column| {
                    if column.is_null(row) {
                        "NULL".to_string()
                    } else {
                        array_value_to_string(column, row).unwrap()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .map(|line| line + "\n")
        .collect()
}

/// Builds a batch from named columns.
pub(crate) fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields = columns
        .iter()
        .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
        .collect::<Vec<_>>();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

/// Rows `SELECT id, text AS __sem_0_0, <needle> AS __sem_0_1 FROM docs` would return.
pub(crate) fn structural_docs(n: usize, needle: &str) -> RecordBatch {
    let docs = docs(n);
    batch(vec![
        ("id", docs.column(0).clone()),
        ("__sem_0_0", docs.column(1).clone()),
        (
            "__sem_0_1",
            Arc::new(StringArray::from_iter_values((0..n).map(|_| needle))) as ArrayRef,
        ),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineCall {
    Execute(String),
    CreateTempTableAs { name: String, ddl: String },
    CreateTempTableFromRows { name: String, rows: usize },
    DropTable(String),
}

impl EngineCall {
    pub(crate) fn is_create(&self) -> bool {
        matches!(
            self,
            EngineCall::CreateTempTableAs { .. } | EngineCall::CreateTempTableFromRows { .. }
        )
    }
}

pub(crate) type QueryHandler =
    Box<dyn Fn(&str, &HashMap<String, RecordBatch>) -> Result<RecordBatch, BoxError> + Send + Sync>;

/// Relational engine double: answers queries through a scripted handler that can read the
/// temp tables created so far, and records every call.
pub(crate) struct MockEngine {
    handler: QueryHandler,
    tables: Mutex<HashMap<String, RecordBatch>>,
    calls: Mutex<Vec<EngineCall>>,
    fail_when: Vec<String>,
    fail_drop_when: Vec<String>,
    stall_when: Vec<String>,
}

impl MockEngine {
    pub(crate) fn new(
        handler: impl Fn(&str, &HashMap<String, RecordBatch>) -> Result<RecordBatch, BoxError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            tables: Mutex::new(HashMap::new()),
            calls: Mutex::new(vec![]),
            fail_when: vec![],
            fail_drop_when: vec![],
            stall_when: vec![],
        }
    }

    /// Statements containing `pattern` fail. Matched against the query text, the CREATE
    /// statement text, or the target table name.
    pub(crate) fn fail_when(mut self, pattern: &str) -> Self {
        self.fail_when.push(pattern.to_string());
        self
    }

    pub(crate) fn fail_drop_when(mut self, pattern: &str) -> Self {
        self.fail_drop_when.push(pattern.to_string());
        self
    }

    /// Statements containing `pattern` never complete.
    pub(crate) fn stall_when(mut self, pattern: &str) -> Self {
        self.stall_when.push(pattern.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn table(&self, name: &str) -> Option<RecordBatch> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    pub(crate) fn tables_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names = self
            .tables
            .lock()
            .unwrap()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn check(&self, text: &str) -> Result<(), BoxError> {
        if self.stall_when.iter().any(|p| text.contains(p.as_str())) {
            futures::future::pending::<()>().await;
        }
        if self.fail_when.iter().any(|p| text.contains(p.as_str())) {
            return Err(format!("engine rejected: {}", text).into());
        }
        Ok(())
    }

    fn run(&self, sql: &str) -> Result<RecordBatch, BoxError> {
        let tables = self.tables.lock().unwrap();
        (self.handler)(sql, &tables)
    }
}

#[async_trait::async_trait]
impl RelationalEngine for MockEngine {
    async fn execute(&self, sql: &str) -> Result<RecordBatch, BoxError> {
        self.record(EngineCall::Execute(sql.to_string()));
        self.check(sql).await?;
        self.run(sql)
    }

    async fn create_temp_table_as(&self, name: &str, sql: &str) -> Result<usize, BoxError> {
        let ddl = create_temp_table_sql(name, sql);
        self.record(EngineCall::CreateTempTableAs {
            name: name.to_string(),
            ddl: ddl.clone(),
        });
        self.check(&ddl).await?;
        let rows = self.run(sql)?;
        let row_count = rows.num_rows();
        self.tables.lock().unwrap().insert(name.to_string(), rows);
        Ok(row_count)
    }

    async fn create_temp_table_from_rows(
        &self,
        name: &str,
        rows: &RecordBatch,
    ) -> Result<(), BoxError> {
        self.record(EngineCall::CreateTempTableFromRows {
            name: name.to_string(),
            rows: rows.num_rows(),
        });
        self.check(name).await?;
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), rows.clone());
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<(), BoxError> {
        self.record(EngineCall::DropTable(name.to_string()));
        if self.fail_drop_when.iter().any(|p| name.contains(p.as_str())) {
            return Err(format!("cannot drop {}", name).into());
        }
        self.tables.lock().unwrap().remove(name);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DispatchedBatch {
    pub stage_name: String,
    pub batch_index: usize,
    pub rows: usize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Semantic backend double. Projections score a row with the length of its first argument;
/// predicates test whether the first argument contains the second.
pub(crate) struct MockBackend {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    dispatched: Mutex<Vec<DispatchedBatch>>,
    delay: Box<dyn Fn(usize) -> Duration + Send + Sync>,
    failing_batch: Option<usize>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            dispatched: Mutex::new(vec![]),
            delay: Box::new(|_| Duration::ZERO),
            failing_batch: None,
        }
    }

    /// Per-batch latency, by batch index.
    pub(crate) fn with_delay(mut self, delay: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub(crate) fn failing_on(mut self, batch_index: usize) -> Self {
        self.failing_batch = Some(batch_index);
        self
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn dispatched(&self) -> Vec<DispatchedBatch> {
        self.dispatched.lock().unwrap().clone()
    }

    pub(crate) fn dispatched_indices(&self) -> Vec<usize> {
        let mut indices = self
            .dispatched()
            .into_iter()
            .map(|b| b.batch_index)
            .collect::<Vec<_>>();
        indices.sort_unstable();
        indices
    }

    fn score(batch: &EvaluationBatch, call: &SemanticCall) -> Result<ArrayRef, BoxError> {
        let args = batch.arguments(call)?;
        let text = args[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or("first argument must be text")?;
        match call.position {
            CallPosition::Projection { .. } => {
                let scores = text
                    .iter()
                    .map(|v| v.map(|s| s.len() as f64))
                    .collect::<Float64Array>();
                Ok(Arc::new(scores) as ArrayRef)
            }
            CallPosition::Predicate => {
                let needle = args
                    .get(1)
                    .and_then(|a| a.as_any().downcast_ref::<StringArray>())
                    .ok_or("second argument must be text")?;
                let matches = text
                    .iter()
                    .zip(needle.iter())
                    .map(|(t, n)| Some(t?.contains(n?)))
                    .collect::<BooleanArray>();
                Ok(Arc::new(matches) as ArrayRef)
            }
        }
    }
}

#[async_trait::async_trait]
impl SemanticBackend for MockBackend {
    async fn evaluate(&self, batch: &EvaluationBatch) -> Result<Vec<ArrayRef>, BoxError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.dispatched.lock().unwrap().push(DispatchedBatch {
            stage_name: batch.stage_name.clone(),
            batch_index: batch.batch_index,
            rows: batch.num_rows(),
        });

        tokio::time::sleep((self.delay)(batch.batch_index)).await;
        if self.failing_batch == Some(batch.batch_index) {
            return Err(format!("backend unavailable for batch {}", batch.batch_index).into());
        }
        batch
            .calls
            .iter()
            .map(|call| Self::score(batch, call))
            .collect()
    }
}
