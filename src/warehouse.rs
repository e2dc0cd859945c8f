use crate::config::WarehouseCredentials;
use crate::error::Error;
use crate::frame::Frame;
use crate::schema::check_columns_compatible;
use log::{info, warn};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::{Column, Row, TypeInfo};

/// Stored-procedure parameter. The warehouse procs take strings and ints
/// only.
#[derive(Debug, Clone)]
pub enum ProcParam {
    Str(String),
    Int(i64),
}

/// Warehouse operations the load path needs. One instance owns one
/// connection pool per run; reconnecting replaces it wholesale.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    /// Distinct column names of the destination relation.
    async fn known_columns(&self, table: &str) -> Result<Vec<String>, Error>;

    /// Destructive truncate, executed as its own statement. Deliberately not
    /// atomic with any following insert; a crash in between leaves the table
    /// empty. Known hazard, kept as-is.
    async fn truncate_table(&self, table: &str) -> Result<(), Error>;

    /// Bulk-appends all frame rows; returns the driver's row count.
    async fn append_rows(&self, table: &str, frame: &Frame) -> Result<u64, Error>;

    /// Runs a stored procedure and returns its result set.
    async fn execute_procedure(
        &self,
        proc: &str,
        params: &[(String, ProcParam)],
    ) -> Result<Frame, Error>;

    /// Replaces the underlying session after a transient failure. Any
    /// outstanding cursor on the old session is invalidated.
    async fn reconnect(&mut self) -> Result<(), Error>;
}

/// Loads a fetch result into its destination table. Each step is a hard
/// gate; failure anywhere aborts the whole operation:
/// clean column names -> drop configured columns -> validate against the
/// destination schema -> optional truncate -> append.
///
/// No validated frame is ever written to a table it was not checked against,
/// and nothing is written before validation passes.
pub async fn insert_frame<W: Warehouse + ?Sized>(
    warehouse: &W,
    mut frame: Frame,
    table: &str,
    truncate: bool,
    drop_columns: &[String],
) -> Result<u64, Error> {
    frame.clean_column_names();
    frame.drop_columns(drop_columns);

    let known_columns = warehouse.known_columns(table).await?;
    check_columns_compatible(frame.columns(), &known_columns)?;

    if truncate {
        warn!("truncating {table} before insert");
        warehouse.truncate_table(table).await?;
    }

    let inserted = warehouse.append_rows(table, &frame).await?;
    info!("inserted {inserted} row(s) into {table}");
    Ok(inserted)
}

/// [`insert_frame`] with one reconnect-and-retry on a transient connection
/// failure; a second failure propagates. The whole gate sequence is repeated,
/// so a truncate may run twice against an already-empty table.
pub async fn insert_frame_with_retry<W: Warehouse + ?Sized>(
    warehouse: &mut W,
    frame: Frame,
    table: &str,
    truncate: bool,
    drop_columns: &[String],
) -> Result<u64, Error> {
    match insert_frame(&*warehouse, frame.clone(), table, truncate, drop_columns).await {
        Err(e) if e.is_transient() => {
            warn!("transient warehouse failure, reconnecting and retrying: {e}");
            warehouse.reconnect().await?;
            insert_frame(warehouse, frame, table, truncate, drop_columns).await
        }
        other => other,
    }
}

/// Formats a stored-procedure invocation by interpolating parameters into
/// the command text, e.g. `EXEC Summarize_Week_Campaigns @channel = 'Social'`.
/// This mirrors the warehouse's established calling convention; the
/// injection-risk surface it carries is documented, not addressed here.
pub fn format_procedure(proc: &str, params: &[(String, ProcParam)]) -> String {
    if params.is_empty() {
        return format!("EXEC {proc}");
    }
    let rendered: Vec<String> = params
        .iter()
        .map(|(key, value)| match value {
            ProcParam::Str(s) => format!("@{key} = '{}'", s.replace('\'', "''")),
            ProcParam::Int(i) => format!("@{key} = {i}"),
        })
        .collect();
    format!("EXEC {proc} {}", rendered.join(", "))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Builds one multi-row INSERT for the whole frame.
pub fn insert_statement(table: &str, frame: &Frame) -> String {
    let columns: Vec<String> = frame
        .columns()
        .iter()
        .map(|c| quote_identifier(c))
        .collect();
    let rows: Vec<String> = frame
        .rows()
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(sql_literal).collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table),
        columns.join(", "),
        rows.join(", ")
    )
}

/// sqlx/Postgres-backed warehouse client. The pool is owned exclusively by
/// one client per orchestrated run.
pub struct PgWarehouse {
    pool: PgPool,
    connection_string: String,
}

impl PgWarehouse {
    pub async fn connect(creds: &WarehouseCredentials) -> Result<Self, Error> {
        let connection_string = creds.connection_string();
        let pool = PgPool::connect(&connection_string).await?;
        Ok(PgWarehouse {
            pool,
            connection_string,
        })
    }

    fn row_to_cells(row: &sqlx::postgres::PgRow) -> Result<Vec<Value>, Error> {
        let mut cells = Vec::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            let cell = match column.type_info().name() {
                "INT2" => row
                    .try_get::<Option<i16>, _>(i)?
                    .map(|v| Value::from(v as i64)),
                "INT4" => row
                    .try_get::<Option<i32>, _>(i)?
                    .map(|v| Value::from(v as i64)),
                "INT8" => row.try_get::<Option<i64>, _>(i)?.map(Value::from),
                "FLOAT4" => row
                    .try_get::<Option<f32>, _>(i)?
                    .map(|v| Value::from(v as f64)),
                "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(Value::from),
                "BOOL" => row.try_get::<Option<bool>, _>(i)?.map(Value::from),
                "DATE" => row
                    .try_get::<Option<chrono::NaiveDate>, _>(i)?
                    .map(|v| Value::from(v.format("%Y-%m-%d").to_string())),
                _ => row.try_get::<Option<String>, _>(i)?.map(Value::from),
            };
            cells.push(cell.unwrap_or(Value::Null));
        }
        Ok(cells)
    }
}

#[async_trait::async_trait]
impl Warehouse for PgWarehouse {
    async fn known_columns(&self, table: &str) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            "SELECT DISTINCT column_name FROM information_schema.columns WHERE table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>(0))
            .collect())
    }

    async fn truncate_table(&self, table: &str) -> Result<(), Error> {
        let statement = format!("TRUNCATE TABLE {}", quote_identifier(table));
        sqlx::query(&statement).execute(&self.pool).await?;
        Ok(())
    }

    async fn append_rows(&self, table: &str, frame: &Frame) -> Result<u64, Error> {
        if frame.is_empty() {
            return Ok(0);
        }
        let statement = insert_statement(table, frame);
        let result = sqlx::query(&statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn execute_procedure(
        &self,
        proc: &str,
        params: &[(String, ProcParam)],
    ) -> Result<Frame, Error> {
        let command = format_procedure(proc, params);
        info!("{command}");
        let rows = sqlx::query(&command).fetch_all(&self.pool).await?;

        let columns: Vec<String> = match rows.first() {
            Some(first) => first
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            None => Vec::new(),
        };
        let mut cells = Vec::with_capacity(rows.len());
        for row in &rows {
            cells.push(Self::row_to_cells(row)?);
        }
        Ok(Frame::new(columns, cells))
    }

    async fn reconnect(&mut self) -> Result<(), Error> {
        self.pool = PgPool::connect(&self.connection_string).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use serde_json::json;

    fn sample_frame() -> Frame {
        Frame::new(
            vec!["CampaignID".to_string(), "Impr.".to_string()],
            vec![
                vec![json!("c1"), json!(100)],
                vec![json!("o'neil"), json!(50)],
            ],
        )
    }

    #[test]
    fn format_procedure_interpolates_params_in_order() {
        let command = format_procedure(
            "Summarize_Week_Campaigns",
            &[
                ("channel".to_string(), ProcParam::Str("Social".to_string())),
                ("limit".to_string(), ProcParam::Int(5)),
            ],
        );
        assert_eq!(
            command,
            "EXEC Summarize_Week_Campaigns @channel = 'Social', @limit = 5"
        );
    }

    #[test]
    fn format_procedure_without_params() {
        assert_eq!(format_procedure("RefreshViews", &[]), "EXEC RefreshViews");
    }

    #[test]
    fn literals_double_embedded_quotes() {
        assert_eq!(sql_literal(&json!("o'neil")), "'o''neil'");
        assert_eq!(sql_literal(&Value::Null), "NULL");
        assert_eq!(sql_literal(&json!(2.5)), "2.5");
        assert_eq!(sql_literal(&json!(true)), "TRUE");
    }

    #[test]
    fn insert_statement_covers_all_rows() {
        let statement = insert_statement("raw_Table", &sample_frame());
        assert_eq!(
            statement,
            "INSERT INTO \"raw_Table\" (\"CampaignID\", \"Impr.\") \
             VALUES ('c1', 100), ('o''neil', 50)"
        );
    }

    #[tokio::test]
    async fn insert_frame_validates_before_any_write() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_known_columns()
            .returning(|_| Ok(vec!["CampaignID".to_string()]));
        // Unknown column "Impr " (after cleaning) must abort before truncate
        // or insert run.
        warehouse.expect_truncate_table().times(0);
        warehouse.expect_append_rows().times(0);

        let err = insert_frame(&warehouse, sample_frame(), "raw_Table", true, &[])
            .await
            .unwrap_err();
        match err {
            Error::SchemaMismatch { column, .. } => assert_eq!(column, "Impr "),
            other => panic!("expected SchemaMismatch, got {other}"),
        }
    }

    #[tokio::test]
    async fn insert_frame_truncates_then_appends() {
        let mut warehouse = MockWarehouse::new();
        let mut seq = Sequence::new();
        warehouse
            .expect_known_columns()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["CampaignID".to_string(), "Impr ".to_string()]));
        warehouse
            .expect_truncate_table()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        warehouse
            .expect_append_rows()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, frame| Ok(frame.len() as u64));

        let inserted = insert_frame(&warehouse, sample_frame(), "raw_Table", true, &[])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn insert_frame_skips_truncate_when_appending() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_known_columns()
            .returning(|_| Ok(vec!["CampaignID".to_string(), "Impr ".to_string()]));
        warehouse.expect_truncate_table().times(0);
        warehouse
            .expect_append_rows()
            .returning(|_, frame| Ok(frame.len() as u64));

        let inserted = insert_frame(&warehouse, sample_frame(), "raw_Table", false, &[])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn transient_insert_failure_reconnects_and_retries_once() {
        let mut warehouse = MockWarehouse::new();
        let mut seq = Sequence::new();
        warehouse
            .expect_known_columns()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["CampaignID".to_string(), "Impr ".to_string()]));
        warehouse
            .expect_append_rows()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Database(sqlx::Error::PoolTimedOut)));
        warehouse
            .expect_reconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        warehouse
            .expect_known_columns()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec!["CampaignID".to_string(), "Impr ".to_string()]));
        warehouse
            .expect_append_rows()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, frame| Ok(frame.len() as u64));

        let inserted =
            insert_frame_with_retry(&mut warehouse, sample_frame(), "raw_Table", false, &[])
                .await
                .unwrap();
        assert_eq!(inserted, 2);
    }

    #[tokio::test]
    async fn non_transient_insert_failure_is_not_retried() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_known_columns()
            .times(1)
            .returning(|_| Ok(vec!["CampaignID".to_string()]));
        warehouse.expect_reconnect().times(0);
        warehouse.expect_append_rows().times(0);

        let err =
            insert_frame_with_retry(&mut warehouse, sample_frame(), "raw_Table", false, &[])
                .await
                .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn insert_frame_drops_configured_columns_tolerantly() {
        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_known_columns()
            .returning(|_| Ok(vec!["CampaignID".to_string()]));
        warehouse
            .expect_append_rows()
            .withf(|_, frame| frame.columns() == ["CampaignID"])
            .returning(|_, frame| Ok(frame.len() as u64));

        let drops = vec!["Impr ".to_string(), "NeverThere".to_string()];
        let inserted = insert_frame(&warehouse, sample_frame(), "raw_Table", false, &drops)
            .await
            .unwrap();
        assert_eq!(inserted, 2);
    }
}
