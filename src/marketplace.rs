use crate::error::Error;
use crate::frame::Frame;
use crate::source::SourceFetcher;
use chrono::NaiveDate;
use log::info;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Envelope the data marketplace wraps saved-query results in.
#[derive(Deserialize)]
struct MarketplaceEnvelope {
    #[serde(rename = "Data")]
    data: Vec<Map<String, Value>>,
}

/// REST source variant: one GET against a preconfigured saved-query URL.
/// The marketplace serves whole snapshots, so the requested date range does
/// not alter the request.
pub struct MarketplaceFetcher {
    client: Client,
    base_url: String,
    token: String,
    query: String,
}

impl MarketplaceFetcher {
    pub fn new(base_url: &str, token: &str, query: &str) -> Self {
        MarketplaceFetcher {
            client: Client::new(),
            base_url: base_url.to_string(),
            token: token.to_string(),
            query: query.to_string(),
        }
    }

    fn query_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .push(&self.query);
        url.query_pairs_mut()
            .append_pair("applicationtype", "DataMarketplace_API")
            .append_pair("applicationtoken", &self.token);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for MarketplaceFetcher {
    async fn setup(&mut self) -> Result<(), Error> {
        // Stateless HTTP pull; a fresh client is all a re-setup can mean here.
        self.client = Client::new();
        Ok(())
    }

    async fn fetch(&mut self, _start: NaiveDate, _end: NaiveDate) -> Result<Frame, Error> {
        let url = self.query_url()?;
        info!("pulling marketplace query '{}'", self.query);

        let resp = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let envelope = resp.json::<MarketplaceEnvelope>().await?;
        Ok(Frame::from_records(envelope.data))
    }
}
