use chrono::Utc;

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Per-item sync status for push kinds.
///
/// `unsynced -> pending -> synced` on success; `pending -> error` on failure;
/// `error -> pending` on the next attempt; an edit resets `synced -> pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Pending,
    Synced,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Unsynced => "unsynced",
            SyncState::Pending => "pending",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => SyncState::Pending,
            "synced" => SyncState::Synced,
            "error" => SyncState::Error,
            _ => SyncState::Unsynced,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactStatus {
    Prospect,
    Active,
    Inactive,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Prospect => "prospect",
            ContactStatus::Active => "active",
            ContactStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => ContactStatus::Active,
            "inactive" => ContactStatus::Inactive,
            _ => ContactStatus::Prospect,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: ContactStatus,
    pub accounting_id: Option<String>,
    pub accounting_sync: SyncState,
    pub sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Converted,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Converted => "converted",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "contacted" => LeadStatus::Contacted,
            "qualified" => LeadStatus::Qualified,
            "converted" => LeadStatus::Converted,
            "lost" => LeadStatus::Lost,
            _ => LeadStatus::New,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Lead {
    pub id: i64,
    pub business_name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub quality_score: u8,
    pub website_exists: bool,
    pub status: LeadStatus,
    pub contact_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormKind {
    Contact,
    Quote,
    WorkOrder,
}

impl FormKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormKind::Contact => "contact",
            FormKind::Quote => "quote",
            FormKind::WorkOrder => "work-order",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "quote" => FormKind::Quote,
            "work-order" | "work_order" | "order" => FormKind::WorkOrder,
            _ => FormKind::Contact,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormStatus {
    New,
    InProgress,
    Done,
    Archived,
}

impl FormStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormStatus::New => "new",
            FormStatus::InProgress => "in-progress",
            FormStatus::Done => "done",
            FormStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "in-progress" => FormStatus::InProgress,
            "done" => FormStatus::Done,
            "archived" => FormStatus::Archived,
            _ => FormStatus::New,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FormSubmission {
    pub id: i64,
    pub kind: FormKind,
    pub status: FormStatus,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    /// Idempotency key against remote re-ingestion:
    /// `form:<remote-id>` / `order:<remote-id>`, or NULL for anonymous
    /// webhook posts.
    pub source: Option<String>,
    pub submitted_at: i64,
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvoiceDirection {
    Outgoing,
    Incoming,
}

impl InvoiceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceDirection::Outgoing => "outgoing",
            InvoiceDirection::Incoming => "incoming",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "incoming" => InvoiceDirection::Incoming,
            _ => InvoiceDirection::Outgoing,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "overdue" => InvoiceStatus::Overdue,
            "cancelled" => InvoiceStatus::Cancelled,
            _ => InvoiceStatus::Draft,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Invoice {
    pub id: i64,
    pub direction: InvoiceDirection,
    pub status: InvoiceStatus,
    pub number: String,
    pub year: i32,
    pub contact_id: Option<i64>,
    pub company_name: Option<String>,
    pub description: Option<String>,
    pub amount_excl_vat: f64,
    pub vat_percentage: f64,
    pub vat_amount: f64,
    pub amount_incl_vat: f64,
    pub invoice_date: i64,
    pub due_date: Option<i64>,
    pub paid_at: Option<i64>,
    pub file_path: Option<String>,
    /// Remote payment id for invoices imported from payments.
    pub reference: Option<String>,
    pub accounting_id: Option<String>,
    pub accounting_sync: SyncState,
    pub sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Invoice {
    /// VAT invariant: incl == round(excl * (1 + pct/100), 2) and
    /// vat == round(incl - excl, 2).
    pub fn vat_consistent(&self) -> bool {
        let incl = round2(self.amount_excl_vat * (1.0 + self.vat_percentage / 100.0));
        let vat = round2(self.amount_incl_vat - self.amount_excl_vat);
        (incl - self.amount_incl_vat).abs() < 0.005 && (vat - self.vat_amount).abs() < 0.005
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "low" => TicketPriority::Low,
            "high" => TicketPriority::High,
            "urgent" => TicketPriority::Urgent,
            _ => TicketPriority::Medium,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketStatus {
    Open,
    InProgress,
    WaitingCustomer,
    AiProcessing,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in-progress",
            TicketStatus::WaitingCustomer => "waiting-customer",
            TicketStatus::AiProcessing => "ai-processing",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "in-progress" | "in_progress" => TicketStatus::InProgress,
            "waiting-customer" | "waiting_customer" => TicketStatus::WaitingCustomer,
            "ai-processing" | "ai_processing" => TicketStatus::AiProcessing,
            "resolved" => TicketStatus::Resolved,
            "closed" => TicketStatus::Closed,
            _ => TicketStatus::Open,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: i64,
    /// Opaque stable id from the remote; unique.
    pub ticket_number: String,
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_company: Option<String>,
    pub contact_id: Option<i64>,
    pub monitored_service_id: Option<String>,
    pub subject: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub assignee: Option<String>,
    pub ai_requested: bool,
    pub ai_summary: Option<String>,
    pub ai_suggested_reply: Option<String>,
    pub resolution: Option<String>,
    pub first_response_at: Option<i64>,
    pub resolved_at: Option<i64>,
    pub remote_sync: SyncState,
    pub sync_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketSender {
    Customer,
    Support,
    Ai,
    System,
}

impl TicketSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketSender::Customer => "customer",
            TicketSender::Support => "support",
            TicketSender::Ai => "ai",
            TicketSender::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "support" => TicketSender::Support,
            "ai" => TicketSender::Ai,
            "system" => TicketSender::System,
            _ => TicketSender::Customer,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mailbox {
    pub id: i64,
    pub host: String,
    pub imap_port: u16,
    pub smtp_port: u16,
    pub username: String,
    /// AES-GCM ciphertext, base64. Decrypted only into operation-local
    /// variables.
    pub password_enc: String,
    pub display_name: String,
    pub active: bool,
    pub last_sync: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug)]
pub struct MessageRecord {
    /// Globally unique; fabricated when the remote omits Message-ID.
    pub message_id: String,
    pub mailbox_id: i64,
    pub from_addr: Option<String>,
    pub from_name: Option<String>,
    pub to_addrs: Option<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sent_at: Option<i64>,
    pub folder: String,
    pub read: bool,
    pub starred: bool,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct AttachmentRecord {
    pub id: i64,
    pub message_id: String,
    pub file_name: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
}

/// Outcome of the most recent pipeline run, persisted on the cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Skipped,
    Failed,
    AuthHalted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Ok => "ok",
            RunOutcome::Skipped => "skipped",
            RunOutcome::Failed => "failed",
            RunOutcome::AuthHalted => "auth-halted",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ok" => RunOutcome::Ok,
            "skipped" => RunOutcome::Skipped,
            "auth-halted" => RunOutcome::AuthHalted,
            _ => RunOutcome::Failed,
        }
    }
}

/// Per-pipeline persistent bookmark.
#[derive(Clone, Debug)]
pub struct Cursor {
    pub pipeline: String,
    pub last_run: Option<i64>,
    pub last_watermark: Option<String>,
    pub last_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub auth_halted: bool,
}

impl Cursor {
    pub fn empty(pipeline: &str) -> Self {
        Cursor {
            pipeline: pipeline.to_string(),
            last_run: None,
            last_watermark: None,
            last_outcome: None,
            last_error: None,
            consecutive_failures: 0,
            auth_halted: false,
        }
    }
}

/// One entry of a RemoteClient's bounded request log.
#[derive(Clone, Debug)]
pub struct RequestLogEntry {
    pub method: String,
    pub endpoint: String,
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub timestamp: i64,
}
