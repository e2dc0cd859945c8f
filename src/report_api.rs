use crate::error::Error;
use crate::frame::Frame;
use crate::source::SourceFetcher;
use chrono::NaiveDate;
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const STATUS_AVAILABLE: &str = "REPORT_AVAILABLE";
const STATUS_PROCESSING: &str = "PROCESSING";

/// Downloads carry a fixed preamble and a grand-total trailer around the
/// actual delimited body.
const HEADER_LINES_TO_SKIP: usize = 12;
const FOOTER_LINES_TO_SKIP: usize = 1;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub name: String,
}

/// Wire protocol of the OAuth2 report API, one method per endpoint. Split out
/// of the fetcher so the polling lifecycle can be exercised without a network.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ReportService: Send + Sync {
    /// Refreshes the OAuth2 token from the cached credential store.
    async fn authenticate(&mut self) -> Result<(), Error>;

    /// Resolves the account's profile id (first profile on the account).
    async fn profile_id(&self) -> Result<String, Error>;

    async fn list_reports(&self, profile_id: &str) -> Result<Vec<ReportSummary>, Error>;

    /// Patches the report's date-range criteria to the requested interval.
    async fn patch_report_dates(
        &self,
        profile_id: &str,
        report_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), Error>;

    /// Triggers an asynchronous run; returns the file id to poll.
    async fn run_report(&self, profile_id: &str, report_id: &str) -> Result<String, Error>;

    async fn file_status(&self, report_id: &str, file_id: &str) -> Result<String, Error>;

    /// Streams the finished file to `dest` in fixed-size chunks.
    async fn download_file(
        &self,
        report_id: &str,
        file_id: &str,
        dest: &Path,
    ) -> Result<(), Error>;
}

/// Picks the id of the report whose name matches `name` exactly. Zero or more
/// than one match is a usage error, never retried.
pub fn find_report_id(reports: &[ReportSummary], name: &str) -> Result<String, Error> {
    let matches: Vec<&ReportSummary> = reports.iter().filter(|r| r.name == name).collect();
    match matches.as_slice() {
        [only] => Ok(only.id.clone()),
        [] => Err(Error::ReportNotFound {
            name: name.to_string(),
        }),
        many => Err(Error::AmbiguousReport {
            name: name.to_string(),
            count: many.len(),
        }),
    }
}

/// OAuth2 report-API source variant. Resolves the profile once per session,
/// then runs the fixed protocol: look up report by name, patch the date
/// range, trigger a run, poll until terminal, download and parse.
pub struct ReportApiFetcher<S: ReportService> {
    service: S,
    report_name: String,
    download_dir: PathBuf,
    poll_interval: Duration,
    profile_id: Option<String>,
}

impl<S: ReportService> ReportApiFetcher<S> {
    pub fn new(service: S, report_name: &str, download_dir: &Path) -> Self {
        ReportApiFetcher {
            service,
            report_name: report_name.to_string(),
            download_dir: download_dir.to_path_buf(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            profile_id: None,
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Polls the file status at a fixed interval. PROCESSING is the only
    /// state polling continues from; any status other than REPORT_AVAILABLE
    /// ends the run as a failure. No upper bound is enforced.
    async fn wait_until_available(&self, report_id: &str, file_id: &str) -> Result<(), Error> {
        loop {
            let status = self.service.file_status(report_id, file_id).await?;
            match status.as_str() {
                STATUS_AVAILABLE => return Ok(()),
                STATUS_PROCESSING => {
                    debug!("report {report_id} file {file_id} still processing");
                    tokio::time::sleep(self.poll_interval).await;
                }
                other => {
                    return Err(Error::ReportRunFailed {
                        status: other.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: ReportService> SourceFetcher for ReportApiFetcher<S> {
    async fn setup(&mut self) -> Result<(), Error> {
        self.service.authenticate().await?;
        self.profile_id = Some(self.service.profile_id().await?);
        Ok(())
    }

    async fn fetch(&mut self, start: NaiveDate, end: NaiveDate) -> Result<Frame, Error> {
        let profile_id = match &self.profile_id {
            Some(id) => id.clone(),
            None => {
                let id = self.service.profile_id().await?;
                self.profile_id = Some(id.clone());
                id
            }
        };

        let reports = self.service.list_reports(&profile_id).await?;
        let report_id = find_report_id(&reports, &self.report_name)?;

        self.service
            .patch_report_dates(&profile_id, &report_id, start, end)
            .await?;
        let file_id = self.service.run_report(&profile_id, &report_id).await?;
        info!(
            "report '{}' run triggered (report {report_id}, file {file_id})",
            self.report_name
        );

        self.wait_until_available(&report_id, &file_id).await?;

        let dest = self
            .download_dir
            .join(format!("{}_{}.csv", self.report_name, file_id));
        self.service
            .download_file(&report_id, &file_id, &dest)
            .await?;

        Frame::from_csv_path(&dest, HEADER_LINES_TO_SKIP, FOOTER_LINES_TO_SKIP)
    }
}

/// OAuth2 credentials cached to local storage between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
    pub refresh_token: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ProfileList {
    #[serde(default)]
    items: Vec<Profile>,
}

#[derive(Deserialize)]
struct Profile {
    #[serde(rename = "profileId")]
    profile_id: String,
}

#[derive(Deserialize)]
struct ReportList {
    #[serde(default)]
    items: Vec<ReportSummary>,
}

#[derive(Deserialize)]
struct RunResponse {
    id: String,
}

#[derive(Deserialize)]
struct FileResource {
    status: String,
}

/// reqwest-backed [`ReportService`] speaking the ad-reporting REST endpoints.
pub struct HttpReportService {
    client: Client,
    base_url: String,
    credential_store: PathBuf,
    access_token: Option<String>,
}

impl HttpReportService {
    pub fn new(base_url: &str, credential_store: &Path) -> Self {
        HttpReportService {
            client: Client::new(),
            base_url: base_url.to_string(),
            credential_store: credential_store.to_path_buf(),
            access_token: None,
        }
    }

    fn load_credentials(&self) -> Result<StoredCredentials, Error> {
        let text = std::fs::read_to_string(&self.credential_store)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save_credentials(&self, creds: &StoredCredentials) -> Result<(), Error> {
        std::fs::write(&self.credential_store, serde_json::to_vec_pretty(creds)?)?;
        Ok(())
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.as_deref().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ReportService for HttpReportService {
    async fn authenticate(&mut self) -> Result<(), Error> {
        let mut creds = self.load_credentials()?;
        let resp = self
            .client
            .post(&creds.token_uri)
            .form(&[
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", creds.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let token: TokenResponse = resp.json().await?;
        self.access_token = Some(token.access_token.clone());
        creds.access_token = Some(token.access_token);
        self.save_credentials(&creds)
    }

    async fn profile_id(&self) -> Result<String, Error> {
        let url = format!("{}/userprofiles", self.base_url);
        let profiles: ProfileList = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        profiles
            .items
            .into_iter()
            .next()
            .map(|p| p.profile_id)
            .ok_or(Error::NoData {
                message: "no user profiles on this account".to_string(),
            })
    }

    async fn list_reports(&self, profile_id: &str) -> Result<Vec<ReportSummary>, Error> {
        let url = format!("{}/userprofiles/{}/reports", self.base_url, profile_id);
        let reports: ReportList = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reports.items)
    }

    async fn patch_report_dates(
        &self,
        profile_id: &str,
        report_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), Error> {
        let url = format!(
            "{}/userprofiles/{}/reports/{}",
            self.base_url, profile_id, report_id
        );
        let body = serde_json::json!({
            "criteria": {
                "dateRange": {
                    "startDate": start.format("%Y-%m-%d").to_string(),
                    "endDate": end.format("%Y-%m-%d").to_string(),
                }
            },
            "format": "CSV",
        });
        self.client
            .patch(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn run_report(&self, profile_id: &str, report_id: &str) -> Result<String, Error> {
        let url = format!(
            "{}/userprofiles/{}/reports/{}/run",
            self.base_url, profile_id, report_id
        );
        let run: RunResponse = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(run.id)
    }

    async fn file_status(&self, report_id: &str, file_id: &str) -> Result<String, Error> {
        let url = format!("{}/reports/{}/files/{}", self.base_url, report_id, file_id);
        let file: FileResource = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(file.status)
    }

    async fn download_file(
        &self,
        report_id: &str,
        file_id: &str,
        dest: &Path,
    ) -> Result<(), Error> {
        let url = format!(
            "{}/reports/{}/files/{}?alt=media",
            self.base_url, report_id, file_id
        );
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?
            .error_for_status()?;

        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        Ok(())
    }
}
