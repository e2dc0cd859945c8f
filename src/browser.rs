use crate::error::Error;
use crate::frame::Frame;
use crate::source::SourceFetcher;
use chrono::NaiveDate;
use log::info;
use std::path::PathBuf;

/// Browser-driven source variant. The UI workflow itself (login, date range,
/// pagination, per-page export) runs in an external browser session and is a
/// black box here; this fetcher consumes the same-schema CSV page exports the
/// session deposits into `export_dir` and concatenates them into one frame.
pub struct BrowserExportFetcher {
    export_dir: PathBuf,
}

impl BrowserExportFetcher {
    pub fn new(export_dir: &str) -> Self {
        BrowserExportFetcher {
            export_dir: PathBuf::from(export_dir),
        }
    }

    fn page_files(&self) -> Result<Vec<PathBuf>, Error> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.export_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        // Export order is page order.
        files.sort();
        Ok(files)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for BrowserExportFetcher {
    async fn setup(&mut self) -> Result<(), Error> {
        // The session is external; all a re-setup can verify is that the
        // export drop point is reachable.
        std::fs::metadata(&self.export_dir)?;
        Ok(())
    }

    async fn fetch(&mut self, _start: NaiveDate, _end: NaiveDate) -> Result<Frame, Error> {
        let files = self.page_files()?;
        if files.is_empty() {
            return Err(Error::NoData {
                message: format!(
                    "no page exports found in {}",
                    self.export_dir.display()
                ),
            });
        }

        info!("concatenating {} page export(s)", files.len());
        let mut pages = Vec::with_capacity(files.len());
        for file in &files {
            pages.push(Frame::from_csv_path(file, 0, 0)?);
        }
        Frame::concat(pages)
    }
}
