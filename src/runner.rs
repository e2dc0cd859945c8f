use crate::browser::BrowserExportFetcher;
use crate::config::Config;
use crate::error::Error;
use crate::flagging::{Channel, ChannelReportBuilder};
use crate::marketplace::MarketplaceFetcher;
use crate::notify::{HttpMailer, Mailer, TriggerEmail};
use crate::orchestrator::Downloader;
use crate::period::ReportingPeriod;
use crate::qa::{DateRangeQaTask, PivotSumQaTask, QaTask, TaskGroup};
use crate::report_api::{HttpReportService, ReportApiFetcher};
use crate::source::{Source, SourceFetcher, SourceKind};
use crate::warehouse::PgWarehouse;
use crate::workbook::{sheet_paths, WorkbookWriter};
use chrono::NaiveDate;
use log::info;
use std::path::Path;

/// Sources whose loaded date span is verified after every load pass.
const DATE_QA_SOURCES: [&str; 2] = ["DV360", "GA360"];
/// Pivot kinds the cross-sum check runs over.
const SUM_QA_PIVOTS: [&str; 4] = ["CTC", "VTC", "CTR", "VTR"];

async fn download<F: SourceFetcher>(
    config: &Config,
    source: Source,
    fetcher: F,
    start: NaiveDate,
    end: NaiveDate,
    insert: bool,
) -> Result<(), Error> {
    let mut downloader = Downloader::new(source, fetcher, &config.save_dir);
    if insert {
        let mut warehouse = PgWarehouse::connect(&config.warehouse).await?;
        let inserted = downloader.run_and_insert(&mut warehouse, start, end).await?;
        info!(
            "source {} fetched and loaded ({inserted} rows)",
            downloader.source().name
        );
    } else {
        let frame = downloader.run(start, end).await?;
        info!(
            "source {} fetched ({} rows), not loaded",
            downloader.source().name,
            frame.len()
        );
    }
    Ok(())
}

/// Fetches one named source for the inclusive date range, saving the result
/// to disk and optionally loading it into its destination table.
pub async fn fetch_source(
    config: Config,
    source_name: &str,
    start: NaiveDate,
    end: NaiveDate,
    insert: bool,
) -> Result<(), Error> {
    let source = Source::for_name(source_name)?;
    match source.kind.clone() {
        SourceKind::Marketplace { query } => {
            let fetcher = MarketplaceFetcher::new(
                &config.marketplace_url,
                &config.marketplace_token,
                &query,
            );
            download(&config, source, fetcher, start, end, insert).await
        }
        SourceKind::ReportApi { report_name } => {
            let service = HttpReportService::new(
                &config.report_api_url,
                Path::new(&config.report_credential_store),
            );
            let fetcher =
                ReportApiFetcher::new(service, &report_name, Path::new(&config.save_dir));
            download(&config, source, fetcher, start, end, insert).await
        }
        SourceKind::BrowserExport => {
            let fetcher = BrowserExportFetcher::new(&config.export_dir);
            download(&config, source, fetcher, start, end, insert).await
        }
    }
}

fn qa_tasks(start: NaiveDate, end: NaiveDate) -> Vec<Box<dyn QaTask>> {
    let mut tasks: Vec<Box<dyn QaTask>> = DATE_QA_SOURCES
        .iter()
        .map(|source| Box::new(DateRangeQaTask::new(source, start, end)) as Box<dyn QaTask>)
        .collect();
    tasks.extend(
        SUM_QA_PIVOTS
            .iter()
            .map(|pivot| Box::new(PivotSumQaTask::new(pivot)) as Box<dyn QaTask>),
    );
    tasks
}

/// Post-load verification pass, run separately from loading. Checks each
/// appended source's date span against the requested range, then every pivot
/// cross-sum. The first failure aborts the pass.
pub async fn run_qa(config: Config, start: NaiveDate, end: NaiveDate) -> Result<(), Error> {
    let warehouse = PgWarehouse::connect(&config.warehouse).await?;
    TaskGroup::new(qa_tasks(start, end)).run(&warehouse).await?;
    info!("all QA checks passed");
    Ok(())
}

/// Builds the weekly flagged report for a channel, writes the workbook, and
/// (when asked) mails it to the configured recipients.
pub async fn run_weekly_report(
    config: Config,
    channel_name: &str,
    period: ReportingPeriod,
    send: bool,
) -> Result<(), Error> {
    let channel = Channel::parse(channel_name)?;
    let warehouse = PgWarehouse::connect(&config.warehouse).await?;

    let report = ChannelReportBuilder::new(&warehouse, channel, period)
        .build()
        .await?;
    let workbook_dir =
        WorkbookWriter::new(Path::new(&config.workbook_dir)).write(&report, &period)?;
    info!("workbook written to {}", workbook_dir.display());

    if send {
        let email = TriggerEmail::new(
            channel,
            &period,
            &config.mail_from,
            config.recipients(),
            sheet_paths(&workbook_dir)?,
        );
        HttpMailer::new(&config.mail_endpoint).send(&email).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qa_pass_covers_appended_sources_and_every_pivot() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let names: Vec<String> = qa_tasks(start, end).iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            [
                "date range QA (DV360)",
                "date range QA (GA360)",
                "pivot sum QA (CTC)",
                "pivot sum QA (VTC)",
                "pivot sum QA (CTR)",
                "pivot sum QA (VTR)",
            ]
        );
    }
}
