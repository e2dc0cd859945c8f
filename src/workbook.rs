use crate::error::Error;
use crate::flagging::ReportSheets;
use crate::period::ReportingPeriod;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes trigger workbooks as one directory per report with a CSV per
/// sheet. A workbook is written once; an existing directory for the same
/// report is never overwritten.
pub struct WorkbookWriter {
    out_dir: PathBuf,
}

impl WorkbookWriter {
    pub fn new(out_dir: &Path) -> Self {
        WorkbookWriter {
            out_dir: out_dir.to_path_buf(),
        }
    }

    fn workbook_name(report: &ReportSheets, period: &ReportingPeriod) -> String {
        format!(
            "{}_triggers{}.{}-{}.{}",
            report.channel.label(),
            period.begin.format("%-m"),
            period.begin.format("%-d"),
            period.end.format("%-m"),
            period.end.format("%-d"),
        )
    }

    /// Saves every sheet and returns the workbook directory, in sheet order
    /// so the paths can be attached to the trigger email as-is.
    pub fn write(
        &self,
        report: &ReportSheets,
        period: &ReportingPeriod,
    ) -> Result<PathBuf, Error> {
        let workbook_dir = self.out_dir.join(Self::workbook_name(report, period));
        fs::create_dir_all(&self.out_dir)?;
        if workbook_dir.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("workbook {} already written", workbook_dir.display()),
            )));
        }
        fs::create_dir(&workbook_dir)?;

        for (sheet_name, frame) in &report.sheets {
            let sheet_path = workbook_dir.join(format!("{sheet_name}.csv"));
            frame.write_csv(&sheet_path)?;
            info!(
                "wrote sheet {} ({} rows) to {}",
                sheet_name,
                frame.len(),
                sheet_path.display()
            );
        }

        Ok(workbook_dir)
    }
}

/// Sheet files of a written workbook, in directory-listing order.
pub fn sheet_paths(workbook_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut paths: Vec<PathBuf> = fs::read_dir(workbook_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flagging::Channel;
    use crate::frame::Frame;
    use chrono::NaiveDate;
    use serde_json::json;

    fn period() -> ReportingPeriod {
        ReportingPeriod::explicit(
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap(),
        )
        .unwrap()
    }

    fn report() -> ReportSheets {
        ReportSheets {
            channel: Channel::Social,
            sheets: vec![
                (
                    "Campaign Summary".to_string(),
                    Frame::new(
                        vec!["Campaign".to_string(), "Spend".to_string()],
                        vec![vec![json!("Brand"), json!(120.5)]],
                    ),
                ),
                ("Social Top 5".to_string(), Frame::empty()),
            ],
        }
    }

    #[test]
    fn writes_one_csv_per_sheet_under_a_dated_directory() {
        let out = tempfile::tempdir().unwrap();
        let writer = WorkbookWriter::new(out.path());

        let dir = writer.write(&report(), &period()).unwrap();
        assert_eq!(
            dir.file_name().unwrap().to_str().unwrap(),
            "Social_triggers1.8-1.14"
        );

        let summary =
            std::fs::read_to_string(dir.join("Campaign Summary.csv")).unwrap();
        assert_eq!(summary, "Campaign,Spend\nBrand,120.5\n");
        assert!(dir.join("Social Top 5.csv").exists());
    }

    #[test]
    fn refuses_to_overwrite_an_existing_workbook() {
        let out = tempfile::tempdir().unwrap();
        let writer = WorkbookWriter::new(out.path());

        writer.write(&report(), &period()).unwrap();
        assert!(writer.write(&report(), &period()).is_err());
    }

    #[test]
    fn sheet_paths_lists_only_csv_files() {
        let out = tempfile::tempdir().unwrap();
        let writer = WorkbookWriter::new(out.path());
        let dir = writer.write(&report(), &period()).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignore me").unwrap();

        let paths = sheet_paths(&dir).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.extension().unwrap() == "csv"));
    }
}
