use crate::error::Error;
use crate::warehouse::{ProcParam, Warehouse};
use chrono::NaiveDate;
use log::info;
use serde_json::Value;

const DATE_QA_PROC: &str = "MinMaxDateRawQA";
const SUM_QA_PROC: &str = "CheckDCMPivotSumQA";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A post-load verification check, run as a separate pass after loading,
/// never during it.
#[async_trait::async_trait]
pub trait QaTask: Send + Sync {
    fn name(&self) -> String;

    async fn run(&self, warehouse: &dyn Warehouse) -> Result<(), Error>;
}

/// Runs tasks in order; the first failure stops the group.
pub struct TaskGroup {
    tasks: Vec<Box<dyn QaTask>>,
}

impl TaskGroup {
    pub fn new(tasks: Vec<Box<dyn QaTask>>) -> Self {
        TaskGroup { tasks }
    }

    pub async fn run(&self, warehouse: &dyn Warehouse) -> Result<(), Error> {
        for task in &self.tasks {
            info!("running QA task {}", task.name());
            task.run(warehouse).await?;
        }
        Ok(())
    }
}

/// Checks that a raw table's loaded date span matches the expected inclusive
/// range: the QA procedure returns one (min, max) row for the source.
pub struct DateRangeQaTask {
    source_name: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRangeQaTask {
    pub fn new(source_name: &str, start: NaiveDate, end: NaiveDate) -> Self {
        DateRangeQaTask {
            source_name: source_name.to_string(),
            start,
            end,
        }
    }
}

#[async_trait::async_trait]
impl QaTask for DateRangeQaTask {
    fn name(&self) -> String {
        format!("date range QA ({})", self.source_name)
    }

    async fn run(&self, warehouse: &dyn Warehouse) -> Result<(), Error> {
        let results = warehouse
            .execute_procedure(
                DATE_QA_PROC,
                &[(
                    "name".to_string(),
                    ProcParam::Str(self.source_name.clone()),
                )],
            )
            .await?;

        let fail = |detail: String| Error::DateQaFailed {
            source_name: self.source_name.clone(),
            detail,
        };

        if results.len() != 1 {
            return Err(fail(format!("expected 1 result row, got {}", results.len())));
        }

        let row = &results.rows()[0];
        let expected_min = Value::from(self.start.format(DATE_FORMAT).to_string());
        let expected_max = Value::from(self.end.format(DATE_FORMAT).to_string());
        if row.first() != Some(&expected_min) || row.get(1) != Some(&expected_max) {
            return Err(fail(format!(
                "loaded span {:?}..{:?} does not match expected {}..{}",
                row.first(),
                row.get(1),
                self.start,
                self.end
            )));
        }

        Ok(())
    }
}

/// Checks that a pivot's two cross-column sums agree: the QA procedure
/// returns one row whose first two cells must be numerically equal.
pub struct PivotSumQaTask {
    pivot: String,
}

impl PivotSumQaTask {
    pub fn new(pivot: &str) -> Self {
        PivotSumQaTask {
            pivot: pivot.to_string(),
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait::async_trait]
impl QaTask for PivotSumQaTask {
    fn name(&self) -> String {
        format!("pivot sum QA ({})", self.pivot)
    }

    async fn run(&self, warehouse: &dyn Warehouse) -> Result<(), Error> {
        let results = warehouse
            .execute_procedure(
                SUM_QA_PROC,
                &[("pivot".to_string(), ProcParam::Str(self.pivot.clone()))],
            )
            .await?;

        let row = results.rows().first().ok_or_else(|| Error::SumQaFailed {
            left: "<no rows>".to_string(),
            right: "<no rows>".to_string(),
        })?;

        let (left, right) = (row.first(), row.get(1));
        let mismatch = || Error::SumQaFailed {
            left: left.map(|v| v.to_string()).unwrap_or_default(),
            right: right.map(|v| v.to_string()).unwrap_or_default(),
        };

        match (left.and_then(as_f64), right.and_then(as_f64)) {
            (Some(a), Some(b)) if a == b => Ok(()),
            _ => Err(mismatch()),
        }
    }
}
