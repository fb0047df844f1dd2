//! Mailbox pipelines and outbound mail.
//!
//! Each active mailbox gets its own pull pipeline: INBOX and Sent are
//! searched `SINCE` the last sync date and new messages land in the store,
//! deduplicated by Message-ID. Outbound mail goes through [`MailAgent`],
//! which records a synthetic copy in the sent folder.

pub mod imap;
pub mod smtp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::crypto::SecretBox;
use crate::errors::{SyncError, SyncResult};
use crate::pipeline::{iso_from_ts, Pipeline, RunContext, RunReport};
use crate::store::Store;
use crate::types::{now_ts, AttachmentRecord, Mailbox, MessageRecord};

/// IMAP folder name and the local folder label it maps to.
const FOLDERS: [(&str, &str); 2] = [("INBOX", "inbox"), ("Sent", "sent")];
/// Newest-first cap per folder per run.
const FETCH_CAP: usize = 200;
const FETCH_BATCH: usize = 50;

pub fn pipeline_name(mailbox_id: i64) -> String {
    format!("mail-pull-{mailbox_id}")
}

/// Pulls one mailbox over IMAP.
pub struct MailboxPull {
    store: Store,
    secrets: Arc<SecretBox>,
    mailbox_id: i64,
    name: String,
    account: String,
    cadence: Duration,
}

impl MailboxPull {
    pub fn new(store: Store, secrets: Arc<SecretBox>, mailbox_id: i64, cadence: Duration) -> Self {
        MailboxPull {
            store,
            secrets,
            mailbox_id,
            name: pipeline_name(mailbox_id),
            account: format!("mailbox-{mailbox_id}"),
            cadence,
        }
    }

    async fn pull_folder(
        &self,
        ctx: &RunContext,
        session: &mut imap::ImapSession,
        mailbox: &Mailbox,
        imap_folder: &str,
        local_folder: &str,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        session
            .select(imap_folder)
            .await
            .map_err(|e| SyncError::Transient(format!("selecting {imap_folder}: {e}")))?;

        let query = match mailbox.last_sync {
            Some(ts) => {
                let date = Utc
                    .timestamp_opt(ts, 0)
                    .single()
                    .unwrap_or_else(Utc::now)
                    .format("%d-%b-%Y");
                format!("SINCE {date}")
            }
            None => "ALL".to_string(),
        };

        let uid_set = session
            .uid_search(&query)
            .await
            .map_err(|e| SyncError::Transient(format!("UID SEARCH {query}: {e}")))?;
        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        uids.reverse();
        uids.truncate(FETCH_CAP);

        for chunk in uids.chunks(FETCH_BATCH) {
            if ctx.cancel.is_cancelled() {
                return Ok(());
            }
            let uid_seq = chunk
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(",");

            let mut fetched = Vec::new();
            {
                let mut stream = session
                    .uid_fetch(&uid_seq, "(UID FLAGS INTERNALDATE BODY.PEEK[])")
                    .await
                    .map_err(|e| SyncError::Transient(format!("UID FETCH: {e}")))?;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(fetch) => fetched.push(fetch),
                        Err(err) => {
                            warn!(pipeline = %self.name, error = %err, "Fetch item failed");
                            report.failed += 1;
                        }
                    }
                }
            }

            for fetch in fetched {
                report.fetched += 1;
                let uid = match fetch.uid {
                    Some(uid) => uid,
                    None => continue,
                };
                let raw = match fetch.body() {
                    Some(raw) => raw,
                    None => continue,
                };
                let seen = fetch
                    .flags()
                    .any(|f| matches!(f, async_imap::types::Flag::Seen));
                let internal_date = fetch.internal_date().map(|dt| dt.timestamp());

                match self
                    .ingest(mailbox, local_folder, uid, raw, seen, internal_date)
                    .await
                {
                    Ok(true) => report.applied += 1,
                    Ok(false) => {}
                    Err(err) if err.is_item_level() => {
                        warn!(pipeline = %self.name, uid, error = %err, "Skipping message");
                        report.failed += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    async fn ingest(
        &self,
        mailbox: &Mailbox,
        folder: &str,
        uid: u32,
        raw: &[u8],
        seen: bool,
        internal_date: Option<i64>,
    ) -> SyncResult<bool> {
        let parsed =
            mailparse::parse_mail(raw).map_err(|e| SyncError::Malformed(format!("uid {uid}: {e}")))?;
        let email = extract_email(&parsed);

        let message_id = email
            .message_id
            .unwrap_or_else(|| format!("{}:{}:{}", mailbox.id, folder, uid));
        if self
            .store
            .message_exists(&message_id)
            .await
            .map_err(SyncError::fatal)?
        {
            return Ok(false);
        }

        let mut attachments = Vec::new();
        for (file_name, mime_type, data) in &email.attachments {
            let path = self
                .save_attachment(&message_id, file_name, data)
                .await
                .map_err(SyncError::fatal)?;
            attachments.push(AttachmentRecord {
                id: 0,
                message_id: message_id.clone(),
                file_name: file_name.clone(),
                file_path: path,
                size_bytes: data.len() as i64,
                mime_type: mime_type.clone(),
            });
        }

        let record = MessageRecord {
            message_id,
            mailbox_id: mailbox.id,
            from_addr: email.from_addr,
            from_name: email.from_name,
            to_addrs: email.to_addrs,
            subject: email.subject,
            body_text: email.body_text,
            body_html: email.body_html,
            sent_at: internal_date.or(email.date),
            folder: folder.to_string(),
            read: seen || folder == "sent",
            starred: false,
            created_at: now_ts(),
        };
        self.store
            .insert_message(&record, &attachments)
            .await
            .map_err(SyncError::fatal)
    }

    async fn save_attachment(
        &self,
        message_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> anyhow::Result<String> {
        let dir = self
            .store
            .attachments_dir()
            .join(&hash8(message_id.as_bytes()));
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(sanitize_filename(file_name));
        tokio::fs::write(&path, data).await?;
        Ok(path.display().to_string())
    }
}

#[async_trait]
impl Pipeline for MailboxPull {
    fn name(&self) -> &str {
        &self.name
    }

    fn account(&self) -> &str {
        &self.account
    }

    fn cadence(&self) -> Duration {
        self.cadence
    }

    async fn run(&self, ctx: &RunContext) -> SyncResult<RunReport> {
        let run_started = now_ts();
        let mut report = RunReport::default();

        let mailbox = match self
            .store
            .get_mailbox(self.mailbox_id)
            .await
            .map_err(SyncError::fatal)?
        {
            Some(mailbox) if mailbox.active => mailbox,
            _ => return Ok(report),
        };

        // A future last_sync would make the SINCE search miss everything;
        // leave the watermark where it is and wait for the clock.
        if mailbox.last_sync.is_some_and(|ts| ts > run_started) {
            warn!(
                pipeline = %self.name,
                last_sync = mailbox.last_sync,
                "Mailbox watermark is in the future; skipping run"
            );
            return Ok(report);
        }

        // Decrypted credentials never outlive this run.
        let password = self
            .secrets
            .decrypt(&mailbox.password_enc)
            .map_err(SyncError::fatal)?;
        let mut session =
            imap::connect(&mailbox.host, mailbox.imap_port, &mailbox.username, &password).await?;

        for (imap_folder, local_folder) in FOLDERS {
            if ctx.cancel.is_cancelled() {
                break;
            }
            self.pull_folder(ctx, &mut session, &mailbox, imap_folder, local_folder, &mut report)
                .await?;
        }
        session.logout().await.ok();

        if !ctx.cancel.is_cancelled() {
            self.store
                .update_mailbox_last_sync(mailbox.id, run_started)
                .await
                .map_err(SyncError::fatal)?;
            report.watermark = Some(iso_from_ts(run_started));
        }

        info!(
            pipeline = %self.name,
            mailbox = %mailbox.username,
            fetched = report.fetched,
            stored = report.applied,
            failed = report.failed,
            "Mailbox pull complete"
        );
        Ok(report)
    }
}

/// Outbound mail, with a synthetic copy stored in the sent folder.
pub struct MailAgent {
    store: Store,
    secrets: Arc<SecretBox>,
}

impl MailAgent {
    pub fn new(store: Store, secrets: Arc<SecretBox>) -> Self {
        MailAgent { store, secrets }
    }

    pub async fn send(
        &self,
        mailbox_id: i64,
        to: &str,
        subject: &str,
        body: &str,
    ) -> SyncResult<()> {
        let mailbox = self
            .store
            .get_mailbox(mailbox_id)
            .await
            .map_err(SyncError::fatal)?
            .ok_or_else(|| SyncError::NotFound(format!("mailbox {mailbox_id}")))?;

        let password = self
            .secrets
            .decrypt(&mailbox.password_enc)
            .map_err(SyncError::fatal)?;
        smtp::send_plain(&mailbox, &password, to, subject, body).await?;

        let now = now_ts();
        let record = MessageRecord {
            message_id: format!("sent-{now}-{}", hash8(to.as_bytes())),
            mailbox_id: mailbox.id,
            from_addr: Some(mailbox.username.clone()),
            from_name: Some(mailbox.display_name.clone()),
            to_addrs: Some(to.to_string()),
            subject: Some(subject.to_string()),
            body_text: Some(body.to_string()),
            body_html: None,
            sent_at: Some(now),
            folder: "sent".to_string(),
            read: true,
            starred: false,
            created_at: now,
        };
        self.store
            .insert_message(&record, &[])
            .await
            .map_err(SyncError::fatal)?;

        info!(mailbox = %mailbox.username, to, "Message sent");
        Ok(())
    }
}

struct ExtractedEmail {
    message_id: Option<String>,
    from_addr: Option<String>,
    from_name: Option<String>,
    to_addrs: Option<String>,
    subject: Option<String>,
    date: Option<i64>,
    body_text: Option<String>,
    body_html: Option<String>,
    attachments: Vec<(String, Option<String>, Vec<u8>)>,
}

fn extract_email(parsed: &ParsedMail) -> ExtractedEmail {
    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|v| !v.is_empty());

    let (from_addr, from_name) = parsed
        .headers
        .get_first_value("From")
        .and_then(|raw| parse_single_address(&raw))
        .unwrap_or((None, None));

    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|raw| mailparse::dateparse(&raw).ok());

    let mut email = ExtractedEmail {
        message_id,
        from_addr,
        from_name,
        to_addrs: parsed.headers.get_first_value("To"),
        subject: parsed.headers.get_first_value("Subject"),
        date,
        body_text: None,
        body_html: None,
        attachments: Vec::new(),
    };
    walk_parts(parsed, &mut email);
    email
}

fn parse_single_address(raw: &str) -> Option<(Option<String>, Option<String>)> {
    let parsed = mailparse::addrparse(raw).ok()?;
    match parsed.into_inner().into_iter().next()? {
        mailparse::MailAddr::Single(info) => Some((Some(info.addr), info.display_name)),
        mailparse::MailAddr::Group(group) => group
            .addrs
            .into_iter()
            .next()
            .map(|info| (Some(info.addr), info.display_name)),
    }
}

/// First text/plain and text/html parts become the body; anything with an
/// attachment disposition is collected with its filename.
fn walk_parts(part: &ParsedMail, email: &mut ExtractedEmail) {
    if part.subparts.is_empty() {
        let disposition = part.get_content_disposition();
        if disposition.disposition == DispositionType::Attachment {
            let file_name = disposition
                .params
                .get("filename")
                .cloned()
                .unwrap_or_else(|| "attachment".to_string());
            let data = part.get_body_raw().unwrap_or_default();
            email
                .attachments
                .push((file_name, Some(part.ctype.mimetype.clone()), data));
            return;
        }
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        if mimetype == "text/plain" && email.body_text.is_none() {
            email.body_text = part.get_body().ok();
        } else if mimetype == "text/html" && email.body_html.is_none() {
            email.body_html = part.get_body().ok();
        }
        return;
    }
    for sub in &part.subparts {
        walk_parts(sub, email);
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

fn hash8(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    hex::encode(&digest[..4])
}
