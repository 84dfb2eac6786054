use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use fundguard_api::app::{build_app, AppServices};
use fundguard_auth::StaticApiKeys;
use fundguard_core::{AccountId, Clock, ManualClock, OwnerServiceId, UserId};
use fundguard_infra::balance::InMemoryBalanceEngine;

const KEY_A: &str = "service-a-key";
const KEY_B: &str = "service-b-key";

struct TestServer {
    base_url: String,
    engine: Arc<InMemoryBalanceEngine>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_clock(Arc::new(fundguard_core::SystemClock)).await
    }

    async fn spawn_with_clock(clock: Arc<dyn Clock>) -> Self {
        let engine = Arc::new(InMemoryBalanceEngine::with_clock(clock));
        let keys = StaticApiKeys::new()
            .with_key(KEY_A, OwnerServiceId::new(1))
            .with_key(KEY_B, OwnerServiceId::new(2));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(AppServices::new(engine.clone(), Arc::new(keys)));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            engine,
            handle,
        }
    }

    fn seed(&self, current: i64, max: i64) -> AccountId {
        self.engine
            .create_account(UserId::new(100), current, max)
            .unwrap()
            .id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn open(
    client: &reqwest::Client,
    srv: &TestServer,
    key: &str,
    account: AccountId,
    body: Value,
) -> reqwest::Response {
    client
        .post(srv.url(&format!("/accounts/{account}/reservation")))
        .header("X-API-Key", key)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn get_account(client: &reqwest::Client, srv: &TestServer, account: AccountId) -> Value {
    let res = client
        .get(srv.url(&format!("/accounts/{account}")))
        .header("X-API-Key", KEY_A)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn post_transition(
    client: &reqwest::Client,
    srv: &TestServer,
    key: &str,
    id: i64,
    action: &str,
) -> reqwest::Response {
    client
        .post(srv.url(&format!("/reservations/{id}/{action}")))
        .header("X-API-Key", key)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = client
        .get(srv.url("/whoami"))
        .header("X-API-Key", "nope")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let res = client.get(srv.url("/docs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn caller_identity_is_derived_from_api_key() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/whoami"))
        .header("api_key", KEY_B)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["service_id"], 2);
}

#[tokio::test]
async fn reservation_scenario_over_http() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let account = srv.seed(1000, 1000);

    let body = json!({"amount": 400, "idempotency_key": "k1", "timeout_seconds": 60});
    let res = open(&client, &srv, KEY_A, account, body.clone()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let first: Value = res.json().await.unwrap();
    assert_eq!(first["status"], "ACTIVE");
    assert_eq!(first["owner_service_id"], 1);
    assert_eq!(first["amount"], 400);

    let res = open(&client, &srv, KEY_A, account, body).await;
    assert_eq!(res.status(), StatusCode::OK);
    let replay: Value = res.json().await.unwrap();
    assert_eq!(replay["id"], first["id"]);
    assert_eq!(get_account(&client, &srv, account).await["reserved_amount"], 400);

    let id = first["id"].as_i64().unwrap();
    let res = post_transition(&client, &srv, KEY_A, id, "confirm").await;
    assert_eq!(res.status(), StatusCode::OK);

    let acc = get_account(&client, &srv, account).await;
    assert_eq!(acc["current_amount"], 600);
    assert_eq!(acc["reserved_amount"], 0);

    let res = post_transition(&client, &srv, KEY_A, id, "cancel").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn expired_reservation_over_http() {
    let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let srv = TestServer::spawn_with_clock(clock.clone()).await;
    let client = reqwest::Client::new();
    let account = srv.seed(500, 500);

    let res = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 200, "idempotency_key": "short", "timeout_seconds": 1}),
    )
    .await;
    let id = res.json::<Value>().await.unwrap()["id"].as_i64().unwrap();

    clock.advance(ChronoDuration::seconds(2));

    let res = post_transition(&client, &srv, KEY_A, id, "confirm").await;
    assert_eq!(res.status(), StatusCode::GONE);

    let res = post_transition(&client, &srv, KEY_A, id, "cancel").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(get_account(&client, &srv, account).await["reserved_amount"], 0);
}

#[tokio::test]
async fn business_errors_map_to_status_codes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let account = srv.seed(100, 100);

    let res = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 101, "idempotency_key": "big", "timeout_seconds": 60}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = open(
        &client,
        &srv,
        KEY_A,
        AccountId::new(9999),
        json!({"amount": 1, "idempotency_key": "ghost", "timeout_seconds": 60}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 0, "idempotency_key": "zero", "timeout_seconds": 60}),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/accounts/not-a-number"))
        .header("X-API-Key", KEY_A)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .put(srv.url(&format!("/accounts/{account}/balance")))
        .header("X-API-Key", KEY_A)
        .json(&json!({"delta": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = client
        .put(srv.url(&format!("/accounts/{account}/limit")))
        .header("X-API-Key", KEY_A)
        .json(&json!({"delta": 50}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(get_account(&client, &srv, account).await["max_amount"], 150);
}

#[tokio::test]
async fn reservations_are_scoped_to_their_owner() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let account = srv.seed(100, 100);

    let res = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 10, "idempotency_key": "mine", "timeout_seconds": 60}),
    )
    .await;
    let id = res.json::<Value>().await.unwrap()["id"].as_i64().unwrap();

    let res = post_transition(&client, &srv, KEY_B, id, "cancel").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // Acting for service 1 explicitly.
    let res = client
        .post(srv.url(&format!("/reservations/{id}/cancel")))
        .header("X-API-Key", KEY_B)
        .header("X-Owner-Service-ID", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_opens_over_http_cannot_overcommit() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let account = srv.seed(100, 100);

    let a = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 80, "idempotency_key": "a", "timeout_seconds": 60}),
    );
    let b = open(
        &client,
        &srv,
        KEY_A,
        account,
        json!({"amount": 80, "idempotency_key": "b", "timeout_seconds": 60}),
    );
    let (a, b) = tokio::join!(a, b);

    let mut statuses = [a.status(), b.status()];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNPROCESSABLE_ENTITY]);
    assert_eq!(get_account(&client, &srv, account).await["reserved_amount"], 80);
}
