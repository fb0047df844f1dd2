use mail_builder::MessageBuilder;
use mail_send::SmtpClientBuilder;

use crate::errors::{SyncError, SyncResult};
use crate::types::Mailbox;

/// Sends one plain-text message over SMTP with STARTTLS. Credentials come
/// in decrypted and stay in this stack frame.
pub async fn send_plain(
    mailbox: &Mailbox,
    password: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> SyncResult<()> {
    let message = MessageBuilder::new()
        .from((mailbox.display_name.as_str(), mailbox.username.as_str()))
        .to(to)
        .subject(subject)
        .text_body(body);

    let mut client = SmtpClientBuilder::new(mailbox.host.as_str(), mailbox.smtp_port)
        .implicit_tls(false)
        .credentials((mailbox.username.as_str(), password))
        .connect()
        .await
        .map_err(map_smtp_error)?;

    client.send(message).await.map_err(map_smtp_error)?;
    Ok(())
}

fn map_smtp_error(err: mail_send::Error) -> SyncError {
    match err {
        err @ mail_send::Error::AuthenticationFailed(_) => SyncError::AuthFailed(err.to_string()),
        other => SyncError::Transient(other.to_string()),
    }
}
