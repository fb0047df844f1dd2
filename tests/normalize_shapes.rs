use kantoor::remote::shapes::{
    normalize_customer, normalize_form, normalize_payment, normalize_ticket,
};
use kantoor::types::{FormKind, TicketPriority, TicketSender, TicketStatus};
use serde_json::json;

#[test]
fn ticket_shapes_normalize_identically() {
    let v1 = json!({
        "ticketNumber": "T-1",
        "customerId": 77,
        "customerName": "Eva",
        "customerEmail": "eva@example.com",
        "subject": "Login broken",
        "priority": "high",
        "status": "in_progress",
        "createdAt": "2026-08-20T09:00:00Z",
        "messages": [
            { "id": "m1", "senderType": "customer", "body": "Help", "isInternal": false,
              "createdAt": "2026-08-20T09:00:00Z" }
        ]
    });
    let legacy = json!({
        "ticket_number": "T-1",
        "customer_id": "77",
        "customer_name": "Eva",
        "customer_email": "eva@example.com",
        "subject": "Login broken",
        "priority": "high",
        "status": "in-progress",
        "created_at": "2026-08-20T09:00:00Z",
        "messages": [
            { "message_id": "m1", "sender_type": "customer", "message": "Help",
              "is_internal": false, "created_at": "2026-08-20T09:00:00Z" }
        ]
    });

    let a = normalize_ticket(&v1).expect("v1");
    let b = normalize_ticket(&legacy).expect("legacy");

    assert_eq!(a.ticket_number, b.ticket_number);
    assert_eq!(a.customer_id, b.customer_id);
    assert_eq!(a.priority, TicketPriority::High);
    assert_eq!(b.status, TicketStatus::InProgress);
    assert_eq!(a.created_at, b.created_at);
    assert_eq!(a.messages.len(), 1);
    assert_eq!(a.messages[0].remote_id.as_deref(), Some("m1"));
    assert_eq!(a.messages[0].sender, TicketSender::Customer);
    assert_eq!(a.messages[0].body, b.messages[0].body);
}

#[test]
fn ticket_without_subject_is_rejected() {
    let bad = json!({ "ticketNumber": "T-2", "status": "open" });
    assert!(normalize_ticket(&bad).is_err());
}

#[test]
fn customer_falls_back_to_email_as_name() {
    let wire = json!({ "email": "shop@example.com", "companyName": "Shop BV" });
    let customer = normalize_customer(&wire).expect("normalize");
    assert_eq!(customer.name, "shop@example.com");
    assert_eq!(customer.company.as_deref(), Some("Shop BV"));
}

#[test]
fn payment_defaults_and_reference_selection() {
    let wire = json!({
        "id": 9001,
        "molliePaymentId": "tr_xyz",
        "amount": 121.0,
        "customerEmail": "eva@example.com",
        "packageName": "Hosting",
        "paymentType": "subscription",
        "paidAt": "2026-08-01T00:00:00Z"
    });
    let payment = normalize_payment(&wire).expect("normalize");
    assert_eq!(payment.remote_id, "9001");
    assert_eq!(payment.import.reference, "tr_xyz");
    assert_eq!(payment.import.vat_percentage, 21.0);
    assert_eq!(payment.import.description, "Hosting (subscription)");

    // Without a provider reference the remote id carries idempotency.
    let bare = json!({ "id": "42", "amount": 10.0 });
    let payment = normalize_payment(&bare).expect("normalize");
    assert_eq!(payment.import.reference, "42");
}

#[test]
fn non_positive_payment_amounts_are_malformed() {
    let zero = json!({ "id": 1, "amount": 0.0 });
    assert!(normalize_payment(&zero).is_err());
    let negative = json!({ "id": 2, "amount": -5.0 });
    assert!(normalize_payment(&negative).is_err());
}

#[test]
fn form_source_follows_the_remote_id() {
    let with_id = json!({ "id": 5, "name": "Tess", "formType": "quote" });
    let (remote_id, form) = normalize_form(&with_id, "form:", FormKind::Contact).expect("ok");
    assert_eq!(remote_id.as_deref(), Some("5"));
    assert_eq!(form.source.as_deref(), Some("form:5"));
    assert_eq!(form.kind, FormKind::Quote);

    let order = json!({ "id": "o-9", "email": "tess@example.com" });
    let (_, form) = normalize_form(&order, "order:", FormKind::WorkOrder).expect("ok");
    assert_eq!(form.source.as_deref(), Some("order:o-9"));
    assert_eq!(form.kind, FormKind::WorkOrder);

    // Anonymous webhook payload: no id, no source.
    let anonymous = json!({ "name": "Tess" });
    let (remote_id, form) = normalize_form(&anonymous, "form:", FormKind::Contact).expect("ok");
    assert!(remote_id.is_none());
    assert!(form.source.is_none());
}

#[test]
fn form_without_identity_is_rejected() {
    let empty = json!({ "message": "hello" });
    assert!(normalize_form(&empty, "form:", FormKind::Contact).is_err());
}
