use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::Config;
use crate::crypto::SecretBox;
use crate::mail::MailboxPull;
use crate::pipeline::accounting::AccountingPush;
use crate::pipeline::customers::CustomersPull;
use crate::pipeline::forms::FormsPull;
use crate::pipeline::payments::PaymentsPull;
use crate::pipeline::tickets::{TicketsPull, TicketsPush};
use crate::remote::accounting::AccountingClient;
use crate::remote::website::WebsiteClient;
use crate::scheduler::{Scheduler, SchedulerBuilder};
use crate::store::Store;
use crate::webhook;

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let root = config.data_dir()?;
    let store = Store::open(&root).await?;
    info!(path = %store.db_path().display(), "Using SQLite store");

    if cli.backup {
        let path = store.backup().await?;
        println!("Backup written to {}", path.display());
        return Ok(());
    }

    let secrets = Arc::new(SecretBox::open(store.root())?);

    // Credentials may have been fixed since the last run; halted pipelines
    // get one fresh chance.
    let cleared = store.clear_auth_halts().await?;
    if cleared > 0 {
        info!(cleared, "Lifted auth halts after restart");
    }

    let mut mailbox_ids = Vec::new();
    for mailbox in &config.mailboxes {
        let id = store.upsert_mailbox(mailbox, &secrets).await?;
        mailbox_ids.push(id);
    }

    let scheduler = build_scheduler(&config, &store, &secrets, &mailbox_ids)?;

    if cli.status {
        print_status(&scheduler).await?;
        return Ok(());
    }

    if let Some(name) = &cli.run_now {
        scheduler
            .run_pipeline(name)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        print_status(&scheduler).await?;
        return Ok(());
    }

    if cli.once {
        scheduler.run_all_once().await;
        print_status(&scheduler).await?;
        return Ok(());
    }

    let tick_handle = scheduler.start();

    let webhook_cancel = CancellationToken::new();
    let webhook_task = if config.webhook.enabled {
        let store = store.clone();
        let webhook_config = config.webhook.clone();
        let cancel = webhook_cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = webhook::serve(store, &webhook_config, cancel).await {
                error!(error = %err, "Webhook receiver failed");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    webhook_cancel.cancel();
    scheduler.stop().await;
    tick_handle.abort();
    if let Some(task) = webhook_task {
        task.await.ok();
    }
    Ok(())
}

fn build_scheduler(
    config: &Config,
    store: &Store,
    secrets: &Arc<SecretBox>,
    mailbox_ids: &[i64],
) -> Result<Scheduler> {
    let mut builder = SchedulerBuilder::new(store.clone(), config.scheduler.clone());
    let pull = config.scheduler.pull_cadence();
    let push = config.scheduler.push_cadence();
    let mail = config.scheduler.mail_cadence();

    if let Some(site) = &config.website {
        let website = Arc::new(WebsiteClient::new(site).context("building website client")?);
        // Registration order matters within the website account: ticket
        // pulls land before pushes, so a fresh remote edit is observed
        // before local state is pushed over it.
        builder = builder
            .register(Arc::new(CustomersPull::new(
                store.clone(),
                website.clone(),
                pull,
            )))
            .register(Arc::new(TicketsPull::new(
                store.clone(),
                website.clone(),
                pull,
            )))
            .register(Arc::new(TicketsPush::new(
                store.clone(),
                website.clone(),
                push,
            )))
            .register(Arc::new(PaymentsPull::new(
                store.clone(),
                website.clone(),
                pull,
            )))
            .register(Arc::new(FormsPull::new(store.clone(), website, pull)));
    }

    if let Some(accounting_config) = &config.accounting {
        let accounting = Arc::new(
            AccountingClient::new(accounting_config).context("building accounting client")?,
        );
        builder = builder.register(Arc::new(AccountingPush::new(
            store.clone(),
            accounting,
            push,
        )));
    }

    for id in mailbox_ids {
        builder = builder.register(Arc::new(MailboxPull::new(
            store.clone(),
            secrets.clone(),
            *id,
            mail,
        )));
    }

    let scheduler = builder.build();
    if scheduler.pipeline_names().is_empty() {
        warn!("No pipelines registered; check the configuration");
    }
    Ok(scheduler)
}

async fn print_status(scheduler: &Scheduler) -> Result<()> {
    let snapshot = scheduler.status().await?;
    println!(
        "{:<18} {:<12} {:<12} {:<20} {:>8}  {}",
        "PIPELINE", "ACCOUNT", "OUTCOME", "LAST RUN", "FAILURES", "WATERMARK"
    );
    for status in &snapshot.pipelines {
        let outcome = status
            .cursor
            .last_outcome
            .map(|o| o.as_str())
            .unwrap_or("never");
        let last_run = status
            .cursor
            .last_run
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = if status.running { "running" } else { outcome };
        println!(
            "{:<18} {:<12} {:<12} {:<20} {:>8}  {}",
            status.name,
            status.account,
            outcome,
            last_run,
            status.cursor.consecutive_failures,
            status.cursor.last_watermark.as_deref().unwrap_or("-")
        );
        if let Some(error) = &status.cursor.last_error {
            println!("  last error: {error}");
        }
    }
    Ok(())
}
