/*!
 * # Item Ledger Client
 *
 * Pulls posted item ledger entries from the ERP's OData API. Sales history
 * imports use these entries as the source of daily demand.
 */

pub mod token;

use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::LedgerConfig;
use crate::errors::ServiceError;
pub use token::{AccessToken, TokenCache};

/// Guard against a server that keeps returning next links
const MAX_PAGES: usize = 1000;

/// Entry type of ledger rows that represent customer demand
pub const SALE_ENTRY_TYPE: &str = "Sale";

/// One posted item ledger entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub item_number: String,
    pub posting_date: NaiveDate,
    pub entry_type: String,
    /// Signed: outbound movements such as sales are negative
    pub quantity: f64,
}

impl LedgerEntry {
    pub fn is_sale(&self) -> bool {
        self.entry_type.eq_ignore_ascii_case(SALE_ENTRY_TYPE)
    }
}

#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    // a path default avoids a `T: Default` bound
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OData string literal with embedded quotes doubled
fn odata_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn entries_filter(item_number: &str, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "itemNumber eq {} and postingDate ge {} and postingDate le {}",
        odata_quote(item_number),
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
    )
}

/// HTTP client for the item ledger, authenticated with OAuth2 client credentials
pub struct LedgerClient {
    http: reqwest::Client,
    config: LedgerConfig,
    tokens: TokenCache,
}

impl LedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))?;
        let tokens = TokenCache::new(config.token_refresh_margin());

        Ok(Self {
            http,
            config,
            tokens,
        })
    }

    fn entries_url(&self) -> String {
        format!(
            "{}/v2.0/{}/api/v2.0/companies({})/itemLedgerEntries",
            self.config.base_url.trim_end_matches('/'),
            self.config.environment,
            self.config.company_id
        )
    }

    async fn fetch_token(&self) -> Result<AccessToken, ServiceError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Ledger token request rejected");
            return Err(ServiceError::UpstreamSource(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: TokenResponse = response.json().await?;
        Ok(AccessToken {
            value: body.access_token,
            expires_in: Duration::from_secs(body.expires_in),
        })
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    /// Ledger entries of one item posted within `[start, end]`, following
    /// server-side paging
    #[instrument(skip(self))]
    pub async fn item_ledger_entries(
        &self,
        item_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<LedgerEntry>, ServiceError> {
        let token = self.access_token().await?;
        let filter = entries_filter(item_number, start, end);

        let mut request = self
            .http
            .get(self.entries_url())
            .query(&[("$filter", filter.as_str())]);
        let mut entries = Vec::new();

        for page_no in 0..MAX_PAGES {
            let response = request.bearer_auth(&token).send().await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            if !status.is_success() {
                warn!(%status, item_number, "Ledger entries request failed");
                return Err(ServiceError::UpstreamSource(format!(
                    "item ledger returned {}",
                    status
                )));
            }

            let page: ODataPage<LedgerEntry> = response.json().await?;
            debug!(page_no, rows = page.value.len(), "Fetched ledger page");
            entries.extend(page.value);

            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => return Ok(entries),
            }
        }

        Err(ServiceError::UpstreamSource(format!(
            "item ledger paging exceeded {} pages",
            MAX_PAGES
        )))
    }
}
