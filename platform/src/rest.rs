//! Point query of the balance column.

use std::sync::Arc;

use wallet_types::{Decimal, UserId};

use crate::{AuthClient, BalanceSource, PlatformSettings, Result, ensure_success, parse_balance};

/// Ask for a single object instead of an array; zero or many rows is an error.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    settings: Arc<PlatformSettings>,
    auth: Arc<AuthClient>,
}

impl RestClient {
    pub fn new(http: reqwest::Client, settings: Arc<PlatformSettings>, auth: Arc<AuthClient>) -> Self {
        Self {
            http,
            settings,
            auth,
        }
    }

    fn balance_url(&self, user: &UserId) -> Result<url::Url> {
        let table = self.settings.table();
        let mut url = self.settings.rest_url()?;
        url.query_pairs_mut()
            .append_pair("select", &table.column)
            .append_pair(&table.id_column, &format!("eq.{user}"));
        Ok(url)
    }
}

impl BalanceSource for RestClient {
    async fn fetch_balance(&self, user: &UserId) -> Result<Decimal> {
        let url = self.balance_url(user)?;
        let token = self.auth.access_token().await?;
        let table = self.settings.table();

        tracing::debug!(user = %user, table = %table.table, "Fetching balance");
        let response = self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .header("Accept-Profile", table.schema.as_str())
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let row: serde_json::Value = response.json().await?;
        parse_balance(&row, &table.column)
    }
}
