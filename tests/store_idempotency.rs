use kantoor::store::{
    CustomerUpsert, FormImport, LeadImport, RemoteTicket, RemoteTicketMessage, Store,
};
use kantoor::types::{
    now_ts, ContactStatus, FormKind, RunOutcome, SyncState, TicketPriority, TicketSender,
    TicketStatus,
};

#[tokio::test]
async fn customer_upsert_is_idempotent_by_email() {
    let store = Store::open_in_memory().await.expect("store");

    let customer = CustomerUpsert {
        name: "Jan Jansen".into(),
        company: Some("Jansen BV".into()),
        email: Some("jan@example.com".into()),
        phone: Some("+31 6 1234 5678".into()),
        address: None,
        status: Some(ContactStatus::Active),
    };

    let (first_id, inserted) = store.upsert_customer(&customer).await.expect("insert");
    assert!(inserted);

    let mut updated = customer.clone();
    updated.phone = Some("+31 6 8765 4321".into());
    let (second_id, inserted) = store.upsert_customer(&updated).await.expect("update");
    assert!(!inserted);
    assert_eq!(first_id, second_id);

    let contact = store
        .get_contact(first_id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(contact.phone.as_deref(), Some("+31 6 8765 4321"));
}

#[tokio::test]
async fn customer_reobservation_preserves_local_accounting_state() {
    let store = Store::open_in_memory().await.expect("store");

    let customer = CustomerUpsert {
        name: "Piet".into(),
        email: Some("piet@example.com".into()),
        ..CustomerUpsert::default()
    };
    let (id, _) = store.upsert_customer(&customer).await.expect("insert");
    store
        .set_contact_accounting(id, SyncState::Synced, Some("REL-42"), None)
        .await
        .expect("mark synced");

    store.upsert_customer(&customer).await.expect("re-observe");

    let contact = store.get_contact(id).await.expect("load").expect("exists");
    assert_eq!(contact.accounting_sync, SyncState::Synced);
    assert_eq!(contact.accounting_id.as_deref(), Some("REL-42"));
}

#[tokio::test]
async fn selecting_a_push_batch_marks_contacts_pending() {
    let store = Store::open_in_memory().await.expect("store");
    let (id, _) = store
        .upsert_customer(&CustomerUpsert {
            name: "Saar".into(),
            email: Some("saar@example.com".into()),
            ..CustomerUpsert::default()
        })
        .await
        .expect("insert");

    let batch = store.contacts_for_accounting_push(10).await.expect("batch");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].accounting_sync, SyncState::Pending);

    let contact = store.get_contact(id).await.expect("load").expect("exists");
    assert_eq!(contact.accounting_sync, SyncState::Pending);

    // Pending rows stay selectable until the push lands.
    assert_eq!(
        store.contacts_for_accounting_push(10).await.expect("again").len(),
        1
    );
}

#[tokio::test]
async fn form_submission_deduplicates_on_source() {
    let store = Store::open_in_memory().await.expect("store");

    let form = FormImport {
        kind: FormKind::Quote,
        name: Some("Klaas".into()),
        email: Some("klaas@example.com".into()),
        phone: None,
        company: None,
        subject: Some("Quote request".into()),
        message: Some("Please call me".into()),
        source: Some("form:17".into()),
        submitted_at: now_ts(),
    };

    let (id, inserted) = store.insert_form_submission(&form).await.expect("insert");
    assert!(inserted);
    let (again, inserted) = store.insert_form_submission(&form).await.expect("dedupe");
    assert!(!inserted);
    assert_eq!(id, again);

    // Anonymous webhook posts carry no source and are never deduplicated.
    let anonymous = FormImport {
        source: None,
        ..form
    };
    let (a, _) = store.insert_form_submission(&anonymous).await.expect("a");
    let (b, _) = store.insert_form_submission(&anonymous).await.expect("b");
    assert_ne!(a, b);
}

#[tokio::test]
async fn lead_upsert_and_conversion() {
    let store = Store::open_in_memory().await.expect("store");

    let lead = LeadImport {
        business_name: "Bakkerij De Korst".into(),
        city: Some("Utrecht".into()),
        email: Some("info@dekorst.nl".into()),
        quality_score: 80,
        ..LeadImport::default()
    };

    let (id, inserted) = store.upsert_lead(&lead).await.expect("insert");
    assert!(inserted);
    let (again, inserted) = store.upsert_lead(&lead).await.expect("dedupe");
    assert!(!inserted);
    assert_eq!(id, again);

    let contact_id = store.convert_lead_to_contact(id).await.expect("convert");
    let contact = store
        .get_contact(contact_id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(contact.name, "Bakkerij De Korst");

    // Converting again hands back the same contact.
    let same = store.convert_lead_to_contact(id).await.expect("re-convert");
    assert_eq!(contact_id, same);
}

fn remote_ticket(number: &str) -> RemoteTicket {
    RemoteTicket {
        ticket_number: number.to_string(),
        customer_id: Some("c-1".into()),
        customer_name: Some("Annie".into()),
        customer_email: Some("annie@example.com".into()),
        customer_phone: None,
        customer_company: None,
        subject: "Printer offline".into(),
        description: Some("It beeps".into()),
        category: Some("hardware".into()),
        priority: TicketPriority::High,
        status: TicketStatus::Open,
        created_at: Some(now_ts()),
        messages: vec![RemoteTicketMessage {
            remote_id: Some("m-1".into()),
            sender: TicketSender::Customer,
            body: "It stopped working".into(),
            internal: false,
            created_at: now_ts(),
        }],
    }
}

#[tokio::test]
async fn ticket_upsert_dedupes_messages_and_flags_new_tickets() {
    let store = Store::open_in_memory().await.expect("store");

    let (id, inserted) = store.upsert_ticket(&remote_ticket("T-100")).await.expect("insert");
    assert!(inserted);
    let (again, inserted) = store.upsert_ticket(&remote_ticket("T-100")).await.expect("update");
    assert!(!inserted);
    assert_eq!(id, again);

    assert_eq!(store.count_ticket_messages(id).await.expect("count"), 1);

    let ticket = store
        .get_ticket_by_number("T-100")
        .await
        .expect("load")
        .expect("exists");
    assert!(ticket.ai_requested);
    assert_eq!(ticket.remote_sync, SyncState::Synced);
    // The customer block produced a contact placeholder.
    assert!(ticket.contact_id.is_some());
}

#[tokio::test]
async fn local_ticket_edit_queues_a_push() {
    let store = Store::open_in_memory().await.expect("store");
    let (id, _) = store.upsert_ticket(&remote_ticket("T-200")).await.expect("insert");

    store
        .update_ticket_local(id, TicketStatus::Resolved, Some("rob"), Some("Replaced cable"))
        .await
        .expect("edit");

    let pending = store.tickets_for_push(10).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].ticket_number, "T-200");
    assert_eq!(pending[0].status, TicketStatus::Resolved);

    let ticket = store
        .get_ticket_by_number("T-200")
        .await
        .expect("load")
        .expect("exists");
    assert!(ticket.resolved_at.is_some());

    // A remote re-observation must not clobber the local edit.
    store.upsert_ticket(&remote_ticket("T-200")).await.expect("re-observe");
    let ticket = store
        .get_ticket_by_number("T-200")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(ticket.status, TicketStatus::Resolved);
    assert_eq!(ticket.remote_sync, SyncState::Pending);

    store
        .set_ticket_sync(id, SyncState::Synced, None)
        .await
        .expect("synced");
    assert!(store.tickets_for_push(10).await.expect("drained").is_empty());
}

#[tokio::test]
async fn cursor_failure_streak_and_auth_halt() {
    let store = Store::open_in_memory().await.expect("store");

    let cursor = store.load_cursor("demo").await.expect("empty");
    assert_eq!(cursor.consecutive_failures, 0);
    assert!(cursor.last_outcome.is_none());

    store
        .cursor_failure("demo", "timeout", false)
        .await
        .expect("fail 1");
    store
        .cursor_failure("demo", "timeout", false)
        .await
        .expect("fail 2");
    let cursor = store.load_cursor("demo").await.expect("load");
    assert_eq!(cursor.consecutive_failures, 2);
    assert_eq!(cursor.last_outcome, Some(RunOutcome::Failed));

    store
        .cursor_success("demo", Some("2026-08-23T10:00:00Z"))
        .await
        .expect("success");
    let cursor = store.load_cursor("demo").await.expect("load");
    assert_eq!(cursor.consecutive_failures, 0);
    assert_eq!(cursor.last_outcome, Some(RunOutcome::Ok));
    assert_eq!(cursor.last_watermark.as_deref(), Some("2026-08-23T10:00:00Z"));

    // A success without a watermark keeps the previous one.
    store.cursor_success("demo", None).await.expect("success");
    let cursor = store.load_cursor("demo").await.expect("load");
    assert_eq!(cursor.last_watermark.as_deref(), Some("2026-08-23T10:00:00Z"));

    store
        .cursor_failure("demo", "401 rejected", true)
        .await
        .expect("auth fail");
    let cursor = store.load_cursor("demo").await.expect("load");
    assert!(cursor.auth_halted);
    assert_eq!(cursor.last_outcome, Some(RunOutcome::AuthHalted));

    let lifted = store.clear_auth_halts().await.expect("clear");
    assert_eq!(lifted, 1);
    assert!(!store.load_cursor("demo").await.expect("load").auth_halted);
}
