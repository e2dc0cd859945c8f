use crate::error::Error;
use crate::frame::Frame;
use chrono::NaiveDate;

/// How a source's raw data is retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Single GET against a marketplace saved query.
    Marketplace { query: String },
    /// OAuth2 report API, report resolved by exact name.
    ReportApi { report_name: String },
    /// Page exports deposited by an external browser session.
    BrowserExport,
}

/// A named external data origin with its destination table, truncate policy
/// and column-drop set. Immutable for the duration of a fetch run.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub table: String,
    pub truncate: bool,
    pub drop_columns: Vec<String>,
    pub kind: SourceKind,
}

const CAMPAIGN_COLS_TO_DROP: [&str; 5] = [
    "CampaignAdvertiserCode",
    "CampaignAdvertiserName",
    "CampaignBudgetCurrencyCode",
    "IsBudgetFromAuthorizations",
    "LocationName",
];

const PLACEMENT_COLS_TO_DROP: [&str; 10] = [
    "SupplierCurrencyCode",
    "FeeBillableRate",
    "FeeDescription",
    "FeeSupplierName",
    "GrossBillable",
    "GrossPayable",
    "PlannedFees",
    "PublisherPaid",
    "SpecialRepCode",
    "ThirdPartyCostSource",
];

const MONTHLY_COLS_TO_DROP: [&str; 7] = [
    "FeeBillableRate",
    "FeeDescription",
    "FeeSupplierName",
    "PayableRate",
    "PlannedFeesBil",
    "PlannedNetPayable",
    "PlannedNetBillable",
];

impl Source {
    /// Resolves a user-facing source name to its descriptor. An unknown name
    /// fails fast; it is a usage error, never retried.
    pub fn for_name(name: &str) -> Result<Source, Error> {
        let descriptor = match name.to_lowercase().as_str() {
            "campaign details" => Source {
                name: "PrismaCampaignDetails".to_string(),
                table: "raw_PRISMACampaignDetails".to_string(),
                truncate: true,
                drop_columns: owned(&CAMPAIGN_COLS_TO_DROP),
                kind: SourceKind::Marketplace {
                    query: "campaign details".to_string(),
                },
            },
            "placement details" => Source {
                name: "PrismaPlacementDetails".to_string(),
                table: "raw_PRISMAPlacementDetails".to_string(),
                truncate: true,
                drop_columns: owned(&PLACEMENT_COLS_TO_DROP),
                kind: SourceKind::Marketplace {
                    query: "placement details".to_string(),
                },
            },
            "monthly delivery" => Source {
                name: "PrismaMonthlyDelivery".to_string(),
                table: "raw_PRISMAMonthlySpend".to_string(),
                truncate: true,
                drop_columns: owned(&MONTHLY_COLS_TO_DROP),
                kind: SourceKind::Marketplace {
                    query: "monthly delivery".to_string(),
                },
            },
            "dv360" => Source {
                name: "DV360".to_string(),
                table: "raw_DV360".to_string(),
                truncate: false,
                drop_columns: Vec::new(),
                kind: SourceKind::ReportApi {
                    report_name: "DV360".to_string(),
                },
            },
            "ga360" => Source {
                name: "GA360".to_string(),
                table: "raw_GA360".to_string(),
                truncate: false,
                drop_columns: Vec::new(),
                kind: SourceKind::BrowserExport,
            },
            _ => {
                return Err(Error::UnknownSource {
                    name: name.to_string(),
                })
            }
        };
        Ok(descriptor)
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Retrieval capability a source variant provides: a `setup` that produces a
/// usable session, and a `fetch` over an inclusive date range. The
/// orchestrator owns retries; implementations do not retry internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SourceFetcher: Send {
    /// (Re-)establishes whatever session or credential `fetch` needs. Called
    /// once before the first fetch, and once more if a transient connection
    /// failure is being retried.
    async fn setup(&mut self) -> Result<(), Error>;

    /// Retrieves raw tabular data for `[start, end]`, inclusive on both ends.
    async fn fetch(&mut self, start: NaiveDate, end: NaiveDate) -> Result<Frame, Error>;
}
