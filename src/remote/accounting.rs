use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::AccountingConfig;
use crate::errors::{SyncError, SyncResult};
use crate::types::{Contact, Invoice, RequestLogEntry};

use super::{AuthStrategy, RemoteClient};

/// Revenue accounts live in the 8xxx range of the ledger chart.
const REVENUE_LEDGER_MIN: i64 = 8000;
const REVENUE_LEDGER_MAX: i64 = 9000;

/// Client for the external bookkeeping API. Speaks Dutch on the wire:
/// relations (`/relaties`), sales bookings (`/verkoopboekingen`), ledger
/// accounts (`/grootboekrekeningen`), countries (`/landen`).
pub struct AccountingClient {
    inner: RemoteClient,
    country_code: String,
    /// Resolved revenue ledger code, fetched once per process.
    ledger_cache: tokio::sync::Mutex<Option<String>>,
    /// Set once the configured country code has been checked against
    /// `/landen`.
    country_checked: tokio::sync::Mutex<bool>,
}

impl AccountingClient {
    pub fn new(config: &AccountingConfig) -> SyncResult<Self> {
        let auth = AuthStrategy::ClientCredentials {
            token_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            extra_header: Some((
                config.subscription_key_header.clone(),
                config.subscription_key.clone(),
            )),
        };
        let inner = RemoteClient::new(
            "accounting",
            &config.api_url,
            auth,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_extra_header(&config.subscription_key_header, &config.subscription_key);
        Ok(AccountingClient {
            inner,
            country_code: config.country_code.clone(),
            ledger_cache: tokio::sync::Mutex::new(None),
            country_checked: tokio::sync::Mutex::new(false),
        })
    }

    pub fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.inner.request_log()
    }

    /// Creates a relation for a contact; returns the remote relation id.
    pub async fn create_relation(&self, contact: &Contact) -> SyncResult<String> {
        self.check_country_code().await?;
        let name = contact
            .company
            .clone()
            .unwrap_or_else(|| contact.name.clone());
        let body = json!({
            "naam": name,
            "contactpersoon": contact.name,
            "email": contact.email,
            "telefoon": contact.phone,
            "adres": contact.address,
            "land": self.country_code,
        });
        let response = self.inner.post("/relaties", &body).await?;
        extract_id(&response)
            .ok_or_else(|| SyncError::Malformed("relation response without id".into()))
    }

    /// Books a paid invoice against a relation; returns the remote booking
    /// id.
    pub async fn create_sales_booking(
        &self,
        invoice: &Invoice,
        relation_id: &str,
    ) -> SyncResult<String> {
        let ledger = self.revenue_ledger().await?;
        let body = json!({
            "relatieId": relation_id,
            "factuurnummer": invoice.number,
            "factuurdatum": format_date(invoice.invoice_date),
            "omschrijving": invoice.description,
            "grootboekrekening": ledger,
            "bedragExclBtw": invoice.amount_excl_vat,
            "btwPercentage": invoice.vat_percentage,
            "btwBedrag": invoice.vat_amount,
            "bedragInclBtw": invoice.amount_incl_vat,
        });
        let response = self.inner.post("/verkoopboekingen", &body).await?;
        extract_id(&response)
            .ok_or_else(|| SyncError::Malformed("booking response without id".into()))
    }

    /// Picks the revenue ledger: the first account numbered in the 8xxx
    /// range. Cached for the process lifetime.
    pub async fn revenue_ledger(&self) -> SyncResult<String> {
        let mut cache = self.ledger_cache.lock().await;
        if let Some(code) = cache.as_ref() {
            return Ok(code.clone());
        }

        let response = self.inner.get("/grootboekrekeningen", &[]).await?;
        let accounts = match &response {
            serde_json::Value::Array(items) => items.as_slice(),
            serde_json::Value::Object(map) => match map.get("data") {
                Some(serde_json::Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        };

        for account in accounts {
            let number = account
                .get("nummer")
                .or_else(|| account.get("number"))
                .and_then(ledger_number);
            if let Some(number) = number {
                if (REVENUE_LEDGER_MIN..REVENUE_LEDGER_MAX).contains(&number) {
                    let code = number.to_string();
                    debug!(ledger = %code, "Selected revenue ledger account");
                    *cache = Some(code.clone());
                    return Ok(code);
                }
            }
        }
        Err(SyncError::Malformed(
            "ledger chart has no revenue account in the 8xxx range".into(),
        ))
    }

    /// Validates the configured country code against `/landen` the first
    /// time it is needed. An unknown code only warns; the bookkeeping API
    /// rejects it with a proper error if it truly is invalid.
    async fn check_country_code(&self) -> SyncResult<()> {
        let mut checked = self.country_checked.lock().await;
        if *checked {
            return Ok(());
        }
        let codes = self.countries().await?;
        if !codes.is_empty() && !codes.iter().any(|c| c == &self.country_code) {
            warn!(
                country = %self.country_code,
                "Configured country code is not in the remote country table"
            );
        }
        *checked = true;
        Ok(())
    }

    /// Country table as ISO codes.
    async fn countries(&self) -> SyncResult<Vec<String>> {
        let response = self.inner.get("/landen", &[]).await?;
        let items = match response {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut map) => match map.remove("data") {
                Some(serde_json::Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(items
            .into_iter()
            .filter_map(|item| {
                item.get("code")
                    .and_then(|c| c.as_str())
                    .map(str::to_string)
            })
            .collect())
    }
}

fn ledger_number(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Responses carry the new id either bare or under `data`.
fn extract_id(response: &serde_json::Value) -> Option<String> {
    let candidate = response.get("id").or_else(|| {
        response
            .get("data")
            .and_then(|data| data.get("id"))
    })?;
    match candidate {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn format_date(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}
