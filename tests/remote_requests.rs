use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kantoor::config::WebsiteConfig;
use kantoor::pipeline::tickets::{TicketsPull, TicketsPush};
use kantoor::pipeline::{Pipeline, RunContext};
use kantoor::remote::website::WebsiteClient;
use kantoor::remote::{AuthStrategy, RemoteClient};
use kantoor::store::{RemoteTicket, Store};
use kantoor::types::{SyncState, TicketPriority, TicketStatus};

/// Binds a throwaway listener and serves the router for the test's
/// lifetime.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    format!("http://{addr}")
}

fn website_config(base_url: &str) -> WebsiteConfig {
    WebsiteConfig {
        base_url: base_url.to_string(),
        token: "test-token".to_string(),
        request_timeout_secs: 5,
    }
}

fn remote_ticket(number: &str) -> RemoteTicket {
    RemoteTicket {
        ticket_number: number.to_string(),
        customer_id: None,
        customer_name: None,
        customer_email: None,
        customer_phone: None,
        customer_company: None,
        subject: "Printer offline".into(),
        description: None,
        category: None,
        priority: TicketPriority::Medium,
        status: TicketStatus::Open,
        created_at: None,
        messages: Vec::new(),
    }
}

struct WorkOrderLog {
    acks: Mutex<Vec<serde_json::Value>>,
}

async fn ack_work_orders(
    State(log): State<Arc<WorkOrderLog>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    log.acks.lock().expect("acks").push(body);
    Json(json!({ "success": true }))
}

#[tokio::test]
async fn work_orders_travel_the_legacy_admin_feed() {
    let log = Arc::new(WorkOrderLog {
        acks: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route(
            "/admin/work-orders",
            get(|| async {
                Json(json!([
                    { "id": "wo-1", "name": "Karel", "message": "replace the lock" }
                ]))
            })
            .post(ack_work_orders),
        )
        .with_state(log.clone());
    let base = serve(app).await;

    let client = WebsiteClient::new(&website_config(&base)).expect("client");

    let orders = client.unsynced_work_orders().await.expect("feed");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], "wo-1");

    let mapping = HashMap::from([("wo-1".to_string(), 3i64)]);
    client
        .ack_work_orders(&["wo-1".to_string()], &mapping)
        .await
        .expect("ack");

    let acks = log.acks.lock().expect("acks");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["orderIds"][0], "wo-1");
    assert_eq!(acks[0]["formMapping"]["wo-1"], 3);
}

struct AuthCounters {
    api_calls: AtomicUsize,
    token_calls: AtomicUsize,
}

async fn token(State(state): State<Arc<AuthCounters>>) -> Json<serde_json::Value> {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "access_token": "tok", "token_type": "Bearer", "expires_in": 3600 }))
}

async fn bookings(State(state): State<Arc<AuthCounters>>) -> Response {
    // The first bearer token is treated as stale.
    if state.api_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        StatusCode::UNAUTHORIZED.into_response()
    } else {
        Json(json!({ "id": "B-1" })).into_response()
    }
}

#[tokio::test]
async fn stale_token_is_dropped_and_the_request_retried_once() {
    let state = Arc::new(AuthCounters {
        api_calls: AtomicUsize::new(0),
        token_calls: AtomicUsize::new(0),
    });
    let app = Router::new()
        .route("/token", post(token))
        .route("/bookings", get(bookings))
        .with_state(state.clone());
    let base = serve(app).await;

    let client = RemoteClient::new(
        "accounting",
        &base,
        AuthStrategy::ClientCredentials {
            token_url: format!("{base}/token"),
            client_id: "id".into(),
            client_secret: "secret".into(),
            extra_header: None,
        },
        Duration::from_secs(5),
    )
    .expect("client");

    let value = client.get("/bookings", &[]).await.expect("retried");
    assert_eq!(value["id"], "B-1");

    // Exactly one retry, and both attempts land in the request log.
    let log = client.request_log();
    let attempts: Vec<Option<u16>> = log
        .iter()
        .filter(|entry| entry.endpoint == "/bookings")
        .map(|entry| entry.status)
        .collect();
    assert_eq!(attempts, vec![Some(401), Some(200)]);
    assert_eq!(state.token_calls.load(Ordering::SeqCst), 2);
}

struct TicketAcks {
    acked: Mutex<Vec<String>>,
}

async fn legacy_tickets() -> Json<serde_json::Value> {
    Json(json!([{
        "id": 7,
        "subject": "Printer offline",
        "status": "open",
        "customer_email": "annie@example.com",
        "messages": [],
    }]))
}

async fn legacy_ack(
    State(state): State<Arc<TicketAcks>>,
    Path(number): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    assert_eq!(body["syncedToAdmin"], true);
    state.acked.lock().expect("acked").push(number);
    Json(json!({ "success": true }))
}

#[tokio::test]
async fn absent_v1_tickets_endpoint_falls_back_to_the_legacy_feed() {
    let state = Arc::new(TicketAcks {
        acked: Mutex::new(Vec::new()),
    });
    // No /v1/sync/tickets route: the first page 404s.
    let app = Router::new()
        .route("/admin/tickets", get(legacy_tickets))
        .route("/admin/tickets/{number}", patch(legacy_ack))
        .with_state(state.clone());
    let base = serve(app).await;

    let store = Store::open_in_memory().await.expect("store");
    let website = Arc::new(WebsiteClient::new(&website_config(&base)).expect("client"));
    let pull = TicketsPull::new(store.clone(), website, Duration::from_secs(60));

    let report = pull
        .run(&RunContext::new(CancellationToken::new()))
        .await
        .expect("run");
    assert_eq!(report.fetched, 1);
    assert_eq!(report.applied, 1);

    let ticket = store
        .get_ticket_by_number("7")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(ticket.subject, "Printer offline");

    // The legacy ack went out in the same run.
    assert_eq!(
        state.acked.lock().expect("acked").as_slice(),
        ["7".to_string()]
    );
}

async fn push_ticket(
    State(state): State<Arc<TicketAcks>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let number = body["ticketId"].as_str().unwrap_or_default().to_string();
    if number == "T-500" {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    } else {
        state.acked.lock().expect("acked").push(number);
        Json(json!({ "success": true })).into_response()
    }
}

#[tokio::test]
async fn transient_push_failure_leaves_the_item_for_the_next_run() {
    let state = Arc::new(TicketAcks {
        acked: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/v1/sync/tickets", patch(push_ticket))
        .with_state(state.clone());
    let base = serve(app).await;

    let store = Store::open_in_memory().await.expect("store");
    for number in ["T-500", "T-501"] {
        let (id, _) = store.upsert_ticket(&remote_ticket(number)).await.expect("seed");
        store
            .update_ticket_local(id, TicketStatus::Resolved, None, None)
            .await
            .expect("edit");
    }

    let website = Arc::new(WebsiteClient::new(&website_config(&base)).expect("client"));
    let push = TicketsPush::new(store.clone(), website, Duration::from_secs(60));

    let report = push
        .run(&RunContext::new(CancellationToken::new()))
        .await
        .expect("run completes despite the 500");
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 1);

    // The failed ticket stays pending with no error recorded; the next run
    // selects it again.
    let failed = store
        .get_ticket_by_number("T-500")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(failed.remote_sync, SyncState::Pending);
    assert!(failed.sync_error.is_none());

    let pushed = store
        .get_ticket_by_number("T-501")
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(pushed.remote_sync, SyncState::Synced);
}
