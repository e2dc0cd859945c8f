use crate::error::Error;
use crate::schema::sql_column_name;
use serde_json::{Map, Value};
use std::path::Path;

/// Tabular fetch result: ordered named columns over rows of JSON-typed cells.
/// Produced by a source fetcher for one date range, consumed once by the
/// orchestrator for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Frame { columns, rows }
    }

    pub fn empty() -> Self {
        Frame {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Builds a frame from JSON records. Column order is first-seen order;
    /// records missing a column get a null cell.
    pub fn from_records(records: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|c| record.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Frame { columns, rows }
    }

    /// Parses delimited text, dropping `skip_rows` leading lines and
    /// `skip_footer` trailing lines before treating the first remaining line
    /// as the header. Report-API downloads carry a fixed preamble and a
    /// grand-total trailer.
    pub fn from_csv_text(text: &str, skip_rows: usize, skip_footer: usize) -> Result<Self, Error> {
        let lines: Vec<&str> = text.lines().collect();
        let kept = lines.len().saturating_sub(skip_footer);
        // A file exhausted before the header line is a truncated download,
        // not an empty result.
        if skip_rows >= kept {
            return Err(Error::NoData {
                message: format!(
                    "{} line(s) of input leave no header after skipping {skip_rows} leading and {skip_footer} trailing line(s)",
                    lines.len()
                ),
            });
        }
        let body = lines[skip_rows..kept].join("\n");

        let mut reader = csv::Reader::from_reader(body.as_bytes());
        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(
                record
                    .iter()
                    .map(|cell| Value::String(cell.to_string()))
                    .collect(),
            );
        }

        Ok(Frame { columns, rows })
    }

    pub fn from_csv_path(
        path: &Path,
        skip_rows: usize,
        skip_footer: usize,
    ) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Frame::from_csv_text(&text, skip_rows, skip_footer)
    }

    /// Renames every column through the destination naming convention.
    /// Idempotent: cleaning an already-clean frame changes nothing.
    pub fn clean_column_names(&mut self) {
        for column in &mut self.columns {
            *column = sql_column_name(column);
        }
    }

    /// Drops the named columns, tolerating their absence.
    pub fn drop_columns(&mut self, names: &[String]) {
        let keep: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !names.iter().any(|n| n == *c))
            .map(|(i, _)| i)
            .collect();

        if keep.len() == self.columns.len() {
            return;
        }

        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let kept: Vec<Value> = keep.iter().map(|&i| row[i].take()).collect();
            *row = kept;
        }
    }

    /// Concatenates same-schema frames in order. Header drift between pages
    /// fails the whole concatenation.
    pub fn concat(frames: Vec<Frame>) -> Result<Self, Error> {
        let mut iter = frames.into_iter();
        let mut merged = match iter.next() {
            Some(first) => first,
            None => return Ok(Frame::empty()),
        };

        for frame in iter {
            if frame.columns != merged.columns {
                return Err(Error::PageSchemaMismatch {
                    expected: merged.columns,
                    found: frame.columns,
                });
            }
            merged.rows.extend(frame.rows);
        }

        Ok(merged)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(render_cell))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Forensic dump of partial data on the failure path. Not meant for
    /// automatic resumption.
    pub fn dump_json(&self, path: &Path) -> Result<(), Error> {
        let body = serde_json::json!({
            "columns": self.columns,
            "rows": self.rows,
        });
        std::fs::write(path, serde_json::to_vec_pretty(&body)?)?;
        Ok(())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_records_keeps_first_seen_column_order() {
        let frame = Frame::from_records(vec![
            record(&[("CampaignID", json!("c1")), ("Spend", json!(10.5))]),
            record(&[("Spend", json!(3.0)), ("Site", json!("display"))]),
        ]);
        assert_eq!(frame.columns(), ["CampaignID", "Spend", "Site"]);
        assert_eq!(frame.rows()[0][2], Value::Null);
        assert_eq!(frame.rows()[1][0], Value::Null);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn clean_column_names_is_idempotent() {
        let mut frame = Frame::new(
            vec!["Impr.".to_string(), "Cost: USD".to_string()],
            vec![vec![json!(1), json!(2.0)]],
        );
        frame.clean_column_names();
        assert_eq!(frame.columns(), ["Impr ", "Cost  USD"]);
        let cleaned_once = frame.columns().to_vec();
        frame.clean_column_names();
        assert_eq!(frame.columns(), cleaned_once.as_slice());
    }

    #[test]
    fn drop_columns_tolerates_absent_names() {
        let mut frame = Frame::from_records(vec![record(&[
            ("Keep", json!(1)),
            ("Drop", json!(2)),
        ])]);
        frame.drop_columns(&["Drop".to_string(), "NeverExisted".to_string()]);
        assert_eq!(frame.columns(), ["Keep"]);
        assert_eq!(frame.rows()[0], vec![json!(1)]);
    }

    #[test]
    fn concat_rejects_header_drift() {
        let a = Frame::new(vec!["x".to_string()], vec![vec![json!(1)]]);
        let b = Frame::new(vec!["y".to_string()], vec![vec![json!(2)]]);
        let err = Frame::concat(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::PageSchemaMismatch { .. }));
    }

    #[test]
    fn concat_merges_same_schema_pages() {
        let a = Frame::new(vec!["x".to_string()], vec![vec![json!(1)]]);
        let b = Frame::new(vec!["x".to_string()], vec![vec![json!(2)], vec![json!(3)]]);
        let merged = Frame::concat(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn csv_text_skips_preamble_and_trailer() {
        let text = "Report Name\nGenerated 2024-01-08\nDate,Clicks\n2024-01-01,10\n2024-01-02,12\nGrand Total,22\n";
        let frame = Frame::from_csv_text(text, 2, 1).unwrap();
        assert_eq!(frame.columns(), ["Date", "Clicks"]);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows()[1][1], json!("12"));
    }

    #[test]
    fn truncated_csv_text_fails_instead_of_parsing_empty() {
        let text = "Report Name\nGenerated 2024-01-08\npartial";
        assert!(matches!(
            Frame::from_csv_text(text, 12, 1).unwrap_err(),
            Error::NoData { .. }
        ));
    }

    #[test]
    fn csv_round_trips_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let frame = Frame::from_records(vec![record(&[
            ("Name", json!("banner")),
            ("Spend", json!(12.5)),
            ("Note", Value::Null),
        ])]);
        frame.write_csv(&path).unwrap();

        let loaded = Frame::from_csv_path(&path, 0, 0).unwrap();
        assert_eq!(loaded.columns(), ["Name", "Spend", "Note"]);
        assert_eq!(loaded.rows()[0][0], json!("banner"));
        assert_eq!(loaded.rows()[0][1], json!("12.5"));
    }

    #[test]
    fn dump_json_writes_partial_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("failed_dump");
        let frame = Frame::from_records(vec![record(&[("a", json!(1))])]);
        frame.dump_json(&path).unwrap();
        let dumped: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(dumped["columns"], json!(["a"]));
        assert_eq!(dumped["rows"], json!([[1]]));
    }
}
