use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use kantoor::config::WebhookConfig;
use kantoor::store::Store;
use kantoor::webhook;

fn config(secret: Option<&str>) -> WebhookConfig {
    WebhookConfig {
        port: 0,
        secret: secret.map(str::to_string),
        max_body_bytes: 1024 * 1024,
        enabled: true,
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("mac");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn post(uri: &str, body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-webhook-signature", signature);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

#[tokio::test]
async fn signed_form_submission_is_ingested() {
    let store = Store::open_in_memory().await.expect("store");
    let app = webhook::router(store.clone(), &config(Some("s3cret")));

    let body = r#"{"id":5,"name":"Tess","email":"tess@example.com"}"#;
    let signature = sign("s3cret", body.as_bytes());

    let response = app
        .oneshot(post("/webhook/form", body, Some(&signature)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let id = store
        .find_form_id_by_source("form:5")
        .await
        .expect("lookup");
    assert!(id.is_some());
}

#[tokio::test]
async fn bad_signature_is_rejected_before_parsing() {
    let store = Store::open_in_memory().await.expect("store");
    let app = webhook::router(store.clone(), &config(Some("s3cret")));

    let body = r#"{"id":6,"name":"Tess"}"#;
    let wrong = sign("other-secret", body.as_bytes());

    let response = app
        .clone()
        .oneshot(post("/webhook/form", body, Some(&wrong)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A missing signature is the same verification failure as a wrong one.
    let response = app
        .oneshot(post("/webhook/form", body, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(store
        .find_form_id_by_source("form:6")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn unsigned_receiver_accepts_plain_posts() {
    let store = Store::open_in_memory().await.expect("store");
    let app = webhook::router(store.clone(), &config(None));

    let body = r#"{"id":"o-3","name":"Karel","message":"fix the door"}"#;
    let response = app
        .oneshot(post("/webhook/order", body, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    assert!(store
        .find_form_id_by_source("order:o-3")
        .await
        .expect("lookup")
        .is_some());
}

#[tokio::test]
async fn unknown_kind_and_malformed_payload() {
    let store = Store::open_in_memory().await.expect("store");
    let app = webhook::router(store, &config(None));

    let response = app
        .clone()
        .oneshot(post("/webhook/nonsense", "{}", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(post("/webhook/form", "not json", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Parsed but without name or email.
    let response = app
        .oneshot(post("/webhook/form", r#"{"message":"hi"}"#, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_webhook_delivery_is_idempotent() {
    let store = Store::open_in_memory().await.expect("store");
    let app = webhook::router(store.clone(), &config(None));

    let body = r#"{"id":9,"name":"Tess"}"#;
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post("/webhook/form", body, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    // One row, observed twice.
    let id = store
        .find_form_id_by_source("form:9")
        .await
        .expect("lookup")
        .expect("present");
    let form = store
        .get_form_submission(id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(form.source.as_deref(), Some("form:9"));
}
