//! Wire shapes for the website APIs and their pure normalizers.
//!
//! The v1 API speaks camelCase, the legacy admin API snake_case; both map
//! onto the same logical fields, so every DTO accepts both spellings via
//! serde aliases. Normalization is pure: DTO in, canonical record out.

use chrono::DateTime;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::errors::{SyncError, SyncResult};
use crate::store::{CustomerUpsert, FormImport, PaymentImport, RemoteTicket, RemoteTicketMessage};
use crate::types::{now_ts, ContactStatus, FormKind, TicketPriority, TicketSender, TicketStatus};

/// Success envelope of the v1 sync endpoints.
#[derive(Debug, Deserialize)]
pub struct V1Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub meta: Option<V1Meta>,
}

#[derive(Debug, Deserialize)]
pub struct V1Meta {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
}

/// Remote ids arrive as strings or numbers depending on the endpoint age.
fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("unexpected id shape: {other}"))),
    }
}

fn flexible_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parses an ISO-8601 instant to a unix timestamp.
pub fn parse_instant(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

#[derive(Debug, Deserialize)]
pub struct CustomerWire {
    pub name: Option<String>,
    #[serde(alias = "companyName", alias = "company_name")]
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: Option<String>,
}

pub fn normalize_customer(value: &serde_json::Value) -> SyncResult<CustomerUpsert> {
    let wire: CustomerWire = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Malformed(format!("customer: {e}")))?;
    let name = wire
        .name
        .or_else(|| wire.email.clone())
        .ok_or_else(|| SyncError::Malformed("customer without name or email".into()))?;
    Ok(CustomerUpsert {
        name,
        company: wire.company,
        email: wire.email,
        phone: wire.phone,
        address: wire.address,
        status: wire.status.as_deref().map(ContactStatus::parse),
    })
}

#[derive(Debug, Deserialize)]
pub struct TicketWire {
    #[serde(
        alias = "ticketNumber",
        alias = "ticket_number",
        alias = "ticketId",
        alias = "ticket_id",
        alias = "id",
        deserialize_with = "flexible_id"
    )]
    pub ticket_number: String,
    #[serde(
        default,
        alias = "customerId",
        alias = "customer_id",
        deserialize_with = "flexible_id_opt"
    )]
    pub customer_id: Option<String>,
    #[serde(alias = "customerName", alias = "customer_name")]
    pub customer_name: Option<String>,
    #[serde(alias = "customerEmail", alias = "customer_email")]
    pub customer_email: Option<String>,
    #[serde(alias = "customerPhone", alias = "customer_phone")]
    pub customer_phone: Option<String>,
    #[serde(alias = "customerCompany", alias = "customer_company")]
    pub customer_company: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "createdAt", alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub messages: Vec<TicketMessageWire>,
}

#[derive(Debug, Deserialize)]
pub struct TicketMessageWire {
    #[serde(default, alias = "messageId", alias = "message_id", deserialize_with = "flexible_id_opt")]
    pub id: Option<String>,
    #[serde(alias = "senderType", alias = "sender_type")]
    pub sender: Option<String>,
    #[serde(alias = "body", alias = "message")]
    pub body: Option<String>,
    #[serde(default, alias = "isInternal", alias = "is_internal")]
    pub internal: bool,
    #[serde(alias = "createdAt", alias = "created_at")]
    pub created_at: Option<String>,
}

pub fn normalize_ticket(value: &serde_json::Value) -> SyncResult<RemoteTicket> {
    let wire: TicketWire = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Malformed(format!("ticket: {e}")))?;
    let subject = wire
        .subject
        .ok_or_else(|| SyncError::Malformed("ticket without subject".into()))?;

    let messages = wire
        .messages
        .into_iter()
        .filter_map(|m| {
            let body = m.body?;
            Some(RemoteTicketMessage {
                remote_id: m.id,
                sender: m
                    .sender
                    .as_deref()
                    .map(TicketSender::parse)
                    .unwrap_or(TicketSender::Customer),
                body,
                internal: m.internal,
                created_at: m
                    .created_at
                    .as_deref()
                    .and_then(parse_instant)
                    .unwrap_or_else(now_ts),
            })
        })
        .collect();

    Ok(RemoteTicket {
        ticket_number: wire.ticket_number,
        customer_id: wire.customer_id,
        customer_name: wire.customer_name,
        customer_email: wire.customer_email,
        customer_phone: wire.customer_phone,
        customer_company: wire.customer_company,
        subject,
        description: wire.description,
        category: wire.category,
        priority: wire
            .priority
            .as_deref()
            .map(TicketPriority::parse)
            .unwrap_or(TicketPriority::Medium),
        status: wire
            .status
            .as_deref()
            .map(TicketStatus::parse)
            .unwrap_or(TicketStatus::Open),
        created_at: wire.created_at.as_deref().and_then(parse_instant),
        messages,
    })
}

#[derive(Debug, Deserialize)]
pub struct PaymentWire {
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(
        default,
        alias = "molliePaymentId",
        alias = "mollie_payment_id",
        deserialize_with = "flexible_id_opt"
    )]
    pub payment_reference: Option<String>,
    pub amount: f64,
    #[serde(alias = "vatPercentage", alias = "vat_percentage")]
    pub vat_percentage: Option<f64>,
    #[serde(alias = "customerEmail", alias = "customer_email")]
    pub customer_email: Option<String>,
    #[serde(alias = "paidAt", alias = "paid_at")]
    pub paid_at: Option<String>,
    #[serde(alias = "packageName", alias = "package_name")]
    pub package_name: Option<String>,
    #[serde(alias = "paymentType", alias = "payment_type")]
    pub payment_type: Option<String>,
}

/// The remote payment id is the pipeline's ack handle; the payment-provider
/// reference (when present) is the invoice idempotency key.
pub struct NormalizedPayment {
    pub remote_id: String,
    pub import: PaymentImport,
}

pub fn normalize_payment(value: &serde_json::Value) -> SyncResult<NormalizedPayment> {
    let wire: PaymentWire = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Malformed(format!("payment: {e}")))?;
    if !wire.amount.is_finite() || wire.amount <= 0.0 {
        return Err(SyncError::Malformed(format!(
            "payment {} with non-positive amount",
            wire.id
        )));
    }
    let reference = wire.payment_reference.unwrap_or_else(|| wire.id.clone());
    let description = match (&wire.package_name, &wire.payment_type) {
        (Some(package), Some(kind)) => format!("{package} ({kind})"),
        (Some(package), None) => package.clone(),
        _ => format!("Payment {reference}"),
    };
    Ok(NormalizedPayment {
        remote_id: wire.id,
        import: PaymentImport {
            reference,
            amount_incl_vat: wire.amount,
            vat_percentage: wire.vat_percentage.unwrap_or(21.0),
            customer_email: wire.customer_email,
            description,
            paid_at: wire.paid_at.as_deref().and_then(parse_instant).unwrap_or_else(now_ts),
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct FormWire {
    #[serde(default, deserialize_with = "flexible_id_opt")]
    pub id: Option<String>,
    #[serde(alias = "formType", alias = "form_type", alias = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    #[serde(alias = "submittedAt", alias = "submitted_at", alias = "createdAt", alias = "created_at")]
    pub submitted_at: Option<String>,
}

/// Normalizes a form payload. `remote_prefix` decides the idempotency key:
/// `form:` for contact/quote submissions, `order:` for work orders. A
/// payload without a remote id gets a NULL source (webhook ingress only).
pub fn normalize_form(
    value: &serde_json::Value,
    remote_prefix: &str,
    default_kind: FormKind,
) -> SyncResult<(Option<String>, FormImport)> {
    let wire: FormWire = serde_json::from_value(value.clone())
        .map_err(|e| SyncError::Malformed(format!("form: {e}")))?;
    if wire.email.is_none() && wire.name.is_none() {
        return Err(SyncError::Malformed("form without name or email".into()));
    }
    let source = wire.id.as_ref().map(|id| format!("{remote_prefix}{id}"));
    let kind = wire.kind.as_deref().map(FormKind::parse).unwrap_or(default_kind);
    Ok((
        wire.id.clone(),
        FormImport {
            kind,
            name: wire.name,
            email: wire.email,
            phone: wire.phone,
            company: wire.company,
            subject: wire.subject,
            message: wire.message,
            source,
            submitted_at: wire
                .submitted_at
                .as_deref()
                .and_then(parse_instant)
                .unwrap_or_else(now_ts),
        },
    ))
}
