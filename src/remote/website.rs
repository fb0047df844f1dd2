use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use crate::config::WebsiteConfig;
use crate::errors::{SyncError, SyncResult};
use crate::store::TicketLocalUpdate;
use crate::types::RequestLogEntry;

use super::shapes::V1Envelope;
use super::{AuthStrategy, RemoteClient};

/// Typed facade over the website's two API generations. The v1 sync
/// endpoints are preferred; the legacy admin endpoints remain for payments,
/// work orders, forms, and as a ticket fallback.
pub struct WebsiteClient {
    inner: RemoteClient,
}

impl WebsiteClient {
    pub fn new(config: &WebsiteConfig) -> SyncResult<Self> {
        let inner = RemoteClient::new(
            "website",
            &config.base_url,
            AuthStrategy::Bearer {
                token: config.token.clone(),
            },
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(WebsiteClient { inner })
    }

    pub fn account_id(&self) -> &str {
        self.inner.account_id()
    }

    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.inner.request_log()
    }

    /// One page of customers from the v1 endpoint. `since` is an ISO-8601
    /// instant; the server returns records modified at or after it.
    pub async fn customers_page(
        &self,
        page: u32,
        limit: u32,
        since: Option<&str>,
    ) -> SyncResult<V1Envelope> {
        let mut query = vec![
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        let value = self.inner.get("/v1/sync/customers", &query).await?;
        parse_envelope("/v1/sync/customers", value)
    }

    pub async fn tickets_page(
        &self,
        page: u32,
        limit: u32,
        since: Option<&str>,
    ) -> SyncResult<V1Envelope> {
        let mut query = vec![
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }
        let value = self.inner.get("/v1/sync/tickets", &query).await?;
        parse_envelope("/v1/sync/tickets", value)
    }

    /// Legacy ticket feed, used when the v1 endpoint is absent.
    pub async fn unsynced_tickets_legacy(&self) -> SyncResult<Vec<serde_json::Value>> {
        let value = self
            .inner
            .get("/admin/tickets", &[("unsynced", "true".to_string())])
            .await?;
        Ok(item_list(value))
    }

    /// Pushes a local ticket edit back through the v1 endpoint.
    pub async fn push_ticket_update(&self, update: &TicketLocalUpdate) -> SyncResult<()> {
        let mut body = json!({
            "ticketId": update.ticket_number,
            "status": update.status.as_str(),
        });
        if let Some(resolution) = &update.resolution {
            body["resolution"] = json!(resolution);
        }
        if let Some(reply) = &update.reply {
            body["message"] = json!(reply);
        }
        self.inner.patch("/v1/sync/tickets", &body).await?;
        Ok(())
    }

    /// Legacy ticket ack; only flips the synced flag on the website side.
    pub async fn mark_ticket_synced_legacy(&self, ticket_number: &str) -> SyncResult<()> {
        let path = format!("/admin/tickets/{ticket_number}");
        self.inner
            .patch(&path, &json!({ "syncedToAdmin": true }))
            .await?;
        Ok(())
    }

    pub async fn unsynced_payments(&self) -> SyncResult<Vec<serde_json::Value>> {
        let value = self
            .inner
            .get("/admin/payments", &[("unsynced", "true".to_string())])
            .await?;
        Ok(item_list(value))
    }

    /// Acks ingested payments; `invoice_mapping` maps remote payment ids to
    /// the invoice numbers they produced.
    pub async fn ack_payments(
        &self,
        payment_ids: &[String],
        invoice_mapping: &HashMap<String, String>,
    ) -> SyncResult<()> {
        self.inner
            .post(
                "/admin/payments",
                &json!({
                    "paymentIds": payment_ids,
                    "invoiceMapping": invoice_mapping,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn unsynced_work_orders(&self) -> SyncResult<Vec<serde_json::Value>> {
        let value = self
            .inner
            .get("/admin/work-orders", &[("unsynced", "true".to_string())])
            .await?;
        Ok(item_list(value))
    }

    pub async fn ack_work_orders(
        &self,
        order_ids: &[String],
        form_mapping: &HashMap<String, i64>,
    ) -> SyncResult<()> {
        self.inner
            .post(
                "/admin/work-orders",
                &json!({
                    "orderIds": order_ids,
                    "formMapping": form_mapping,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn unsynced_forms(&self) -> SyncResult<Vec<serde_json::Value>> {
        let value = self
            .inner
            .get("/admin/forms", &[("unsynced", "true".to_string())])
            .await?;
        Ok(item_list(value))
    }

    pub async fn ack_forms(
        &self,
        submission_ids: &[String],
        form_mapping: &HashMap<String, i64>,
    ) -> SyncResult<()> {
        self.inner
            .post(
                "/admin/forms",
                &json!({
                    "submissionIds": submission_ids,
                    "formMapping": form_mapping,
                }),
            )
            .await?;
        Ok(())
    }
}

fn parse_envelope(path: &str, value: serde_json::Value) -> SyncResult<V1Envelope> {
    let envelope: V1Envelope = serde_json::from_value(value)
        .map_err(|e| SyncError::Malformed(format!("{path}: {e}")))?;
    if !envelope.success {
        return Err(SyncError::Malformed(format!(
            "{path}: server reported success=false"
        )));
    }
    Ok(envelope)
}

/// Legacy endpoints answer either a bare array or `{"data": [...]}`.
fn item_list(value: serde_json::Value) -> Vec<serde_json::Value> {
    match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
