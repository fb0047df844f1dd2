use std::path::PathBuf;

use kantoor::config::MailboxConfig;
use kantoor::crypto::SecretBox;
use kantoor::store::Store;
use kantoor::types::{now_ts, AttachmentRecord, MessageRecord};

fn temp_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "kantoor-test-{tag}-{}-{}",
        std::process::id(),
        now_ts()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir");
    dir
}

fn mailbox_config(password: &str) -> MailboxConfig {
    MailboxConfig {
        host: "imap.example.com".into(),
        imap_port: 993,
        smtp_port: 587,
        username: "info@example.com".into(),
        password: password.into(),
        display_name: Some("Info".into()),
        active: true,
    }
}

#[tokio::test]
async fn mailbox_seeding_is_idempotent_and_encrypts_the_password() {
    let root = temp_root("mailbox-seed");
    let store = Store::open_in_memory().await.expect("store");
    let secrets = SecretBox::open(&root).expect("secrets");

    let id = store
        .upsert_mailbox(&mailbox_config("hunter2"), &secrets)
        .await
        .expect("seed");
    let again = store
        .upsert_mailbox(&mailbox_config("hunter3"), &secrets)
        .await
        .expect("re-seed");
    assert_eq!(id, again);

    let mailbox = store
        .get_mailbox(id)
        .await
        .expect("load")
        .expect("exists");
    // Only ciphertext reaches the database; the latest config wins.
    assert_ne!(mailbox.password_enc, "hunter3");
    assert_eq!(secrets.decrypt(&mailbox.password_enc).expect("decrypt"), "hunter3");
    assert_eq!(store.list_active_mailboxes().await.expect("list").len(), 1);

    let _ = std::fs::remove_dir_all(&root);
}

fn message(message_id: &str, mailbox_id: i64) -> MessageRecord {
    MessageRecord {
        message_id: message_id.to_string(),
        mailbox_id,
        from_addr: Some("klant@example.com".into()),
        from_name: Some("Klant".into()),
        to_addrs: Some("info@example.com".into()),
        subject: Some("Offerte".into()),
        body_text: Some("Graag een offerte.".into()),
        body_html: None,
        sent_at: Some(now_ts()),
        folder: "inbox".into(),
        read: false,
        starred: false,
        created_at: now_ts(),
    }
}

#[tokio::test]
async fn messages_deduplicate_by_message_id_and_keep_their_flags() {
    let root = temp_root("mailbox-msg");
    let store = Store::open_in_memory().await.expect("store");
    let secrets = SecretBox::open(&root).expect("secrets");
    let mailbox_id = store
        .upsert_mailbox(&mailbox_config("pw"), &secrets)
        .await
        .expect("seed");

    let msg = message("<abc@example.com>", mailbox_id);
    let attachment = AttachmentRecord {
        id: 0,
        message_id: msg.message_id.clone(),
        file_name: "offerte.pdf".into(),
        file_path: "/tmp/att/offerte.pdf".into(),
        size_bytes: 1024,
        mime_type: Some("application/pdf".into()),
    };

    assert!(store
        .insert_message(&msg, std::slice::from_ref(&attachment))
        .await
        .expect("insert"));
    assert!(store.message_exists(&msg.message_id).await.expect("exists"));
    // A second observation of the same Message-ID is a no-op.
    assert!(!store
        .insert_message(&msg, std::slice::from_ref(&attachment))
        .await
        .expect("dedupe"));

    store
        .set_message_flags(&msg.message_id, Some(true), None)
        .await
        .expect("mark read");
    store
        .set_message_flags(&msg.message_id, None, Some(true))
        .await
        .expect("star");

    let loaded = store
        .load_message(&msg.message_id)
        .await
        .expect("load")
        .expect("present");
    assert!(loaded.read);
    assert!(loaded.starred);
    assert_eq!(loaded.folder, "inbox");

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn last_sync_watermark_moves_forward() {
    let root = temp_root("mailbox-sync");
    let store = Store::open_in_memory().await.expect("store");
    let secrets = SecretBox::open(&root).expect("secrets");
    let id = store
        .upsert_mailbox(&mailbox_config("pw"), &secrets)
        .await
        .expect("seed");

    assert!(store
        .get_mailbox(id)
        .await
        .expect("load")
        .expect("exists")
        .last_sync
        .is_none());

    let mark = now_ts();
    store
        .update_mailbox_last_sync(id, mark)
        .await
        .expect("advance");
    let mailbox = store
        .get_mailbox(id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(mailbox.last_sync, Some(mark));

    let _ = std::fs::remove_dir_all(&root);
}
