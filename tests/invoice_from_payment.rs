use chrono::{TimeZone, Utc};
use kantoor::store::{CustomerUpsert, PaymentImport, Store};
use kantoor::types::{InvoiceDirection, InvoiceStatus, SyncState};

fn payment(reference: &str, amount: f64, paid_at: i64) -> PaymentImport {
    PaymentImport {
        reference: reference.to_string(),
        amount_incl_vat: amount,
        vat_percentage: 21.0,
        customer_email: None,
        description: "Hosting (subscription)".to_string(),
        paid_at,
    }
}

fn ts(year: i32, month: u32, day: u32) -> i64 {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .unwrap()
        .timestamp()
}

#[tokio::test]
async fn payment_becomes_paid_invoice_with_consistent_vat() {
    let store = Store::open_in_memory().await.expect("store");

    let (id, inserted) = store
        .insert_invoice_from_payment(&payment("tr_abc", 121.0, ts(2026, 3, 15)))
        .await
        .expect("insert");
    assert!(inserted);

    let invoice = store.get_invoice(id).await.expect("load").expect("exists");
    assert_eq!(invoice.direction, InvoiceDirection::Outgoing);
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.number, "FAC-2026-0001");
    assert_eq!(invoice.amount_excl_vat, 100.0);
    assert_eq!(invoice.vat_amount, 21.0);
    assert_eq!(invoice.amount_incl_vat, 121.0);
    assert!(invoice.vat_consistent());
    assert_eq!(invoice.accounting_sync, SyncState::Unsynced);
}

#[tokio::test]
async fn awkward_amounts_still_satisfy_the_vat_invariant() {
    let store = Store::open_in_memory().await.expect("store");

    // 100.01 / 1.21 does not round-trip through naive multiplication; the
    // VAT amount must be derived from the rounded sides.
    let (id, _) = store
        .insert_invoice_from_payment(&payment("tr_edge", 100.01, ts(2026, 5, 1)))
        .await
        .expect("insert");

    let invoice = store.get_invoice(id).await.expect("load").expect("exists");
    assert_eq!(invoice.amount_excl_vat, 82.65);
    assert_eq!(invoice.vat_amount, 17.36);
    assert!(invoice.vat_consistent());
}

#[tokio::test]
async fn invoice_numbers_are_sequential_per_year() {
    let store = Store::open_in_memory().await.expect("store");

    let (a, _) = store
        .insert_invoice_from_payment(&payment("tr_1", 60.50, ts(2026, 1, 10)))
        .await
        .expect("first");
    let (b, _) = store
        .insert_invoice_from_payment(&payment("tr_2", 60.50, ts(2026, 2, 10)))
        .await
        .expect("second");
    let (c, _) = store
        .insert_invoice_from_payment(&payment("tr_3", 60.50, ts(2027, 1, 10)))
        .await
        .expect("next year");

    assert_eq!(store.get_invoice(a).await.unwrap().unwrap().number, "FAC-2026-0001");
    assert_eq!(store.get_invoice(b).await.unwrap().unwrap().number, "FAC-2026-0002");
    assert_eq!(store.get_invoice(c).await.unwrap().unwrap().number, "FAC-2027-0001");
}

#[tokio::test]
async fn deleted_invoice_numbers_are_not_reissued() {
    let store = Store::open_in_memory().await.expect("store");

    let (first, _) = store
        .insert_invoice_from_payment(&payment("tr_gap_1", 121.0, ts(2026, 1, 5)))
        .await
        .expect("first");
    store
        .insert_invoice_from_payment(&payment("tr_gap_2", 121.0, ts(2026, 1, 6)))
        .await
        .expect("second");
    assert!(store.delete_invoice(first).await.expect("delete"));

    // The gap stays a gap; allocation continues past the highest number.
    let (third, _) = store
        .insert_invoice_from_payment(&payment("tr_gap_3", 121.0, ts(2026, 1, 7)))
        .await
        .expect("third");
    assert_eq!(
        store.get_invoice(third).await.unwrap().unwrap().number,
        "FAC-2026-0003"
    );
}

#[tokio::test]
async fn push_selection_moves_invoices_to_pending() {
    let store = Store::open_in_memory().await.expect("store");
    let (id, _) = store
        .insert_invoice_from_payment(&payment("tr_push", 121.0, ts(2026, 4, 1)))
        .await
        .expect("insert");

    let batch = store.invoices_for_accounting_push(10).await.expect("batch");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].accounting_sync, SyncState::Pending);

    let invoice = store.get_invoice(id).await.expect("load").expect("exists");
    assert_eq!(invoice.accounting_sync, SyncState::Pending);

    // Pending rows stay selectable until the push lands.
    assert_eq!(
        store.invoices_for_accounting_push(10).await.expect("again").len(),
        1
    );
}

#[tokio::test]
async fn reobserved_payment_does_not_duplicate_the_invoice() {
    let store = Store::open_in_memory().await.expect("store");

    let pay = payment("tr_once", 121.0, ts(2026, 6, 1));
    let (first, inserted) = store.insert_invoice_from_payment(&pay).await.expect("a");
    assert!(inserted);
    let (second, inserted) = store.insert_invoice_from_payment(&pay).await.expect("b");
    assert!(!inserted);
    assert_eq!(first, second);
}

#[tokio::test]
async fn payment_links_to_contact_by_email() {
    let store = Store::open_in_memory().await.expect("store");

    let (contact_id, _) = store
        .upsert_customer(&CustomerUpsert {
            name: "Mila".into(),
            email: Some("mila@example.com".into()),
            ..CustomerUpsert::default()
        })
        .await
        .expect("contact");

    let mut pay = payment("tr_linked", 121.0, ts(2026, 7, 1));
    pay.customer_email = Some("mila@example.com".into());
    let (id, _) = store.insert_invoice_from_payment(&pay).await.expect("insert");

    let invoice = store.get_invoice(id).await.expect("load").expect("exists");
    assert_eq!(invoice.contact_id, Some(contact_id));
}
