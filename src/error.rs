use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'The date supplied {date} is invalid'")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Warehouse: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("Io: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{name}' is not a known source")]
    UnknownSource { name: String },

    #[error("column '{column}' not in {known_columns:?}")]
    SchemaMismatch {
        column: String,
        known_columns: Vec<String>,
    },

    #[error("page export headers differ: expected {expected:?}, found {found:?}")]
    PageSchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("download of source '{source}' failed: {cause}")]
    DownloadFailed {
        source: String,
        #[source]
        cause: Box<Error>,
    },

    #[error("no report named '{name}' found")]
    ReportNotFound { name: String },

    #[error("report name '{name}' matches {count} reports, expected exactly one")]
    AmbiguousReport { name: String, count: usize },

    #[error("report run ended with status '{status}'")]
    ReportRunFailed { status: String },

    #[error("date QA failed on source {source_name}: {detail}")]
    DateQaFailed { source_name: String, detail: String },

    #[error("sum QA failed: {left} != {right}")]
    SumQaFailed { left: String, right: String },

    #[error("channel must be 'Social' or 'Programmatic', got '{channel}'")]
    UnknownChannel { channel: String },

    #[error("{message}")]
    NoData { message: String },
}

impl Error {
    /// A transient connectivity failure: the only class of error the
    /// orchestrator re-setups and retries, exactly once.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ApiFailure(e) => e.is_connect() || e.is_timeout(),
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    pub fn is_qa_failure(&self) -> bool {
        matches!(self, Error::DateQaFailed { .. } | Error::SumQaFailed { .. })
    }
}
