//! IMAP connector (LOGIN) using async-imap with tokio-rustls.

use std::sync::Arc;

use async_imap::{Client, Session};
use rustls_native_certs::load_native_certs;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::errors::{SyncError, SyncResult};

pub type ImapSession =
    Session<tokio_util::compat::Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

/// Opens a TLS IMAP session and logs in with mailbox credentials. TCP and
/// TLS problems are transient; a rejected login is an auth failure.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> SyncResult<ImapSession> {
    let mut root_store = RootCertStore::empty();
    for cert in load_native_certs().map_err(SyncError::fatal)? {
        root_store
            .add(&tokio_rustls::rustls::Certificate(cert.0))
            .map_err(SyncError::fatal)?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| SyncError::Transient(format!("connecting to {host}:{port}: {e}")))?;

    let server_name = ServerName::try_from(host)
        .map_err(|e| SyncError::Fatal(format!("invalid IMAP host {host}: {e}")))?;
    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| SyncError::Transient(format!("TLS handshake with {host}: {e}")))?;

    let mut client = Client::new(tls_stream.compat());
    client
        .read_response()
        .await
        .map_err(|e| SyncError::Transient(format!("reading IMAP greeting: {e}")))?
        .ok_or_else(|| SyncError::Transient("IMAP stream closed before greeting".into()))?;

    let session = client
        .login(username, password)
        .await
        .map_err(|(err, _client)| {
            SyncError::AuthFailed(format!("IMAP login rejected for {username}: {err}"))
        })?;

    Ok(session)
}
