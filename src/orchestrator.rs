use crate::error::Error;
use crate::frame::Frame;
use crate::source::{Source, SourceFetcher};
use crate::warehouse::{insert_frame_with_retry, Warehouse};
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use std::path::PathBuf;

/// Explicit retry policy for the fetch step: on a transient connectivity
/// failure, re-setup the fetcher and retry the same call exactly once. A
/// second failure propagates. Nothing else is ever retried, and there is no
/// backoff.
#[derive(Debug, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub async fn run<F: SourceFetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Frame, Error> {
        match fetcher.fetch(start, end).await {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_transient() => {
                warn!("transient connection failure, refreshing session and retrying: {e}");
                fetcher.setup().await?;
                fetcher.fetch(start, end).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Drives one source through the download lifecycle:
/// setup -> fetch (with the one-shot retry policy) -> persist.
///
/// On success the fetched frame is written as CSV under the save root; on
/// failure, data held from an earlier attempt is dumped to a `failed_` path.
/// Both writes are a debugging aid, not a transactional guarantee.
pub struct Downloader<F: SourceFetcher> {
    source: Source,
    fetcher: F,
    save_dir: PathBuf,
    retry: RetryPolicy,
    last: Option<Frame>,
}

impl<F: SourceFetcher> Downloader<F> {
    pub fn new(source: Source, fetcher: F, save_dir: &str) -> Self {
        Downloader {
            source,
            fetcher,
            save_dir: PathBuf::from(save_dir),
            retry: RetryPolicy,
            last: None,
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    fn range_suffix(start: NaiveDate, end: NaiveDate) -> String {
        // Established save-file naming, kept as-is (the start month really
        // does appear twice).
        format!(
            "{}-{}.{}-{}",
            start.month(),
            start.month(),
            end.month(),
            end.day()
        )
    }

    fn save_path(&self, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.save_dir.join(format!(
            "{}_{}.csv",
            self.source.name,
            Self::range_suffix(start, end)
        ))
    }

    fn failed_path(&self, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.save_dir.join(format!(
            "failed_{}{}",
            self.source.name,
            Self::range_suffix(start, end)
        ))
    }

    fn wrap(&self, cause: Error) -> Error {
        Error::DownloadFailed {
            source: self.source.name.clone(),
            cause: Box::new(cause),
        }
    }

    /// Fetches the source for the inclusive `[start, end]` range and persists
    /// the result to disk. A reversed range is a usage error and is never
    /// retried; every fetch-lifecycle failure is wrapped in a download-failed
    /// error carrying the original cause.
    pub async fn run(&mut self, start: NaiveDate, end: NaiveDate) -> Result<Frame, Error> {
        if start > end {
            return Err(Error::StartDateAfterEndDate {
                start_date: start.to_string(),
                end_date: end.to_string(),
            });
        }

        if let Err(e) = self.fetcher.setup().await {
            return Err(self.wrap(e));
        }

        match self.retry.run(&mut self.fetcher, start, end).await {
            Ok(frame) => {
                let path = self.save_path(start, end);
                info!("saving source {} to {}", self.source.name, path.display());
                frame.write_csv(&path)?;
                self.last = Some(frame.clone());
                Ok(frame)
            }
            Err(cause) => {
                match &self.last {
                    Some(partial) => {
                        let path = self.failed_path(start, end);
                        warn!(
                            "unable to fetch source {}, dumping held data to {}",
                            self.source.name,
                            path.display()
                        );
                        // Forensic only; errors here must not mask the fetch
                        // failure.
                        if let Err(dump_err) = partial.dump_json(&path) {
                            warn!("failed to dump partial data: {dump_err}");
                        }
                    }
                    None => warn!("unable to fetch source {}, nothing to save", self.source.name),
                }
                Err(self.wrap(cause))
            }
        }
    }

    /// Fetch, persist to disk, then load into the warehouse with the
    /// source's truncate policy and drop set. A transient warehouse failure
    /// gets one reconnect-and-retry of the load.
    pub async fn run_and_insert<W: Warehouse + ?Sized>(
        &mut self,
        warehouse: &mut W,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<u64, Error> {
        let frame = self.run(start, end).await?;
        insert_frame_with_retry(
            warehouse,
            frame,
            &self.source.table,
            self.source.truncate,
            &self.source.drop_columns,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MockSourceFetcher, SourceKind};
    use crate::warehouse::MockWarehouse;
    use mockall::Sequence;
    use serde_json::{json, Map, Value};

    fn campaign_source() -> Source {
        Source::for_name("campaign details").unwrap()
    }

    fn january_range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        )
    }

    fn transient() -> Error {
        Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionAborted))
    }

    fn campaign_frame(rows: usize) -> Frame {
        let records: Vec<Map<String, Value>> = (0..rows)
            .map(|i| {
                let mut record = Map::new();
                record.insert("CampaignID".to_string(), json!(format!("c{i}")));
                record.insert("Spend".to_string(), json!(10.0 + i as f64));
                record.insert("CampaignAdvertiserCode".to_string(), json!("ADV"));
                record
            })
            .collect();
        Frame::from_records(records)
    }

    #[tokio::test]
    async fn reversed_range_is_a_usage_error_and_never_fetches() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_setup().times(0);
        fetcher.expect_fetch().times(0);

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        assert!(matches!(
            downloader.run(end, start).await.unwrap_err(),
            Error::StartDateAfterEndDate { .. }
        ));
    }

    #[tokio::test]
    async fn success_saves_csv_named_for_the_range() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_setup().times(1).returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_, _| Ok(campaign_frame(10)));

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        let frame = downloader.run(start, end).await.unwrap();

        assert_eq!(frame.len(), 10);
        let expected = dir.path().join("PrismaCampaignDetails_1-1.1-7.csv");
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn transient_failure_retries_once_after_resetup() {
        let mut fetcher = MockSourceFetcher::new();
        let mut seq = Sequence::new();
        fetcher
            .expect_setup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(transient()));
        fetcher
            .expect_setup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(campaign_frame(3)));

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        let frame = downloader.run(start, end).await.unwrap();
        assert_eq!(frame.len(), 3);
    }

    #[tokio::test]
    async fn second_transient_failure_is_unrecoverable() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_setup().times(2).returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(2)
            .returning(|_, _| Err(transient()));

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        let err = downloader.run(start, end).await.unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn non_transient_failure_is_wrapped_not_retried() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_setup().times(1).returning(|| Ok(()));
        fetcher.expect_fetch().times(1).returning(|_, _| {
            Err(Error::NoData {
                message: "empty envelope".to_string(),
            })
        });

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        match downloader.run(start, end).await.unwrap_err() {
            Error::DownloadFailed { source, cause } => {
                assert_eq!(source, "PrismaCampaignDetails");
                assert!(matches!(*cause, Error::NoData { .. }));
            }
            other => panic!("expected DownloadFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn failure_after_a_success_dumps_held_data() {
        let mut fetcher = MockSourceFetcher::new();
        let mut seq = Sequence::new();
        fetcher
            .expect_setup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(campaign_frame(2)));
        fetcher
            .expect_setup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Err(Error::NoData {
                    message: "gone".to_string(),
                })
            });

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        downloader.run(start, end).await.unwrap();
        downloader.run(start, end).await.unwrap_err();

        let dump = dir.path().join("failed_PrismaCampaignDetails1-1.1-7");
        assert!(dump.exists());
    }

    #[tokio::test]
    async fn fetch_and_insert_loads_validated_rows() {
        let mut fetcher = MockSourceFetcher::new();
        fetcher.expect_setup().returning(|| Ok(()));
        fetcher
            .expect_fetch()
            .returning(|_, _| Ok(campaign_frame(10)));

        let mut warehouse = MockWarehouse::new();
        warehouse
            .expect_known_columns()
            .withf(|table| table == "raw_PRISMACampaignDetails")
            .returning(|_| Ok(vec!["CampaignID".to_string(), "Spend".to_string()]));
        warehouse
            .expect_truncate_table()
            .times(1)
            .returning(|_| Ok(()));
        warehouse
            .expect_append_rows()
            .withf(|table, frame| {
                table == "raw_PRISMACampaignDetails"
                    && frame.columns() == ["CampaignID", "Spend"]
                    && frame.len() == 10
            })
            .returning(|_, frame| Ok(frame.len() as u64));

        let dir = tempfile::TempDir::new().unwrap();
        let mut downloader =
            Downloader::new(campaign_source(), fetcher, dir.path().to_str().unwrap());
        let (start, end) = january_range();
        let inserted = downloader
            .run_and_insert(&mut warehouse, start, end)
            .await
            .unwrap();

        assert_eq!(inserted, 10);
        assert!(dir.path().join("PrismaCampaignDetails_1-1.1-7.csv").exists());
    }

    #[test]
    fn descriptor_kind_drives_fetcher_choice() {
        assert!(matches!(
            campaign_source().kind,
            SourceKind::Marketplace { .. }
        ));
    }
}
