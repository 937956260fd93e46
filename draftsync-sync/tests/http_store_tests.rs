use draftsync_sync::{
    DraftPatch, HttpDraftStore, HttpStoreConfig, NewDraft, RateLimitConfig, RateLimitGateConfig,
    ReadRetryPolicy, RemoteDraftStore, SyncError,
};
use draftsync_types::{DraftId, DraftKey};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_config(server: &MockServer) -> HttpStoreConfig {
    HttpStoreConfig {
        timeout_ms: 5_000,
        read_retry: ReadRetryPolicy {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        },
        ..HttpStoreConfig::new(server.uri())
    }
}

fn draft_json(id: &str, content: Value) -> Value {
    json!({
        "id": id,
        "key": "post-composer",
        "content": content,
        "metadata": null,
        "owner_id": null,
        "created_at": "2026-10-16T09:00:00Z",
        "updated_at": "2026-10-16T09:05:00Z"
    })
}

fn key() -> DraftKey {
    DraftKey::new("post-composer")
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let config = HttpStoreConfig::default();
    assert_eq!(config.timeout_ms, 30_000);
    assert_eq!(config.read_retry, ReadRetryPolicy::default());
    assert_eq!(config.read_retry.max_attempts, 3);
    assert_eq!(config.dedup.ttl_ms, 5_000);
    assert_eq!(
        config.rate_limits.endpoints.get("POST /drafts"),
        Some(&RateLimitConfig::per_minute(30))
    );
}

#[test]
fn read_retry_delays_double_and_cap() {
    let policy = ReadRetryPolicy::default();
    assert_eq!(policy.delay(0), Duration::from_millis(100));
    assert_eq!(policy.delay(1), Duration::from_millis(200));
    assert_eq!(policy.delay(10), Duration::from_secs(1));
    assert_eq!(ReadRetryPolicy::none().max_attempts, 1);
}

// ── CRUD ─────────────────────────────────────────────────────────

#[tokio::test]
async fn create_posts_draft() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .and(body_json(json!({
            "key": "post-composer",
            "content": {"text": "hi"},
            "owner_id": "user-7"
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(draft_json("d_1", json!({"text": "hi"}))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let request = NewDraft::new(key(), json!({"text": "hi"})).with_owner(Some("user-7".into()));
    let draft = store.create(request).await.unwrap();

    assert_eq!(draft.id, DraftId::new("d_1"));
    assert_eq!(draft.key, key());
    assert_eq!(draft.content, json!({"text": "hi"}));
}

#[tokio::test]
async fn update_patches_draft() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/drafts/d_1"))
        .and(body_json(json!({"content": "v2", "metadata": {"step": 2}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(draft_json("d_1", json!("v2"))))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let patch = DraftPatch {
        content: json!("v2"),
        metadata: Some(json!({"step": 2})),
    };
    let draft = store.update(&DraftId::new("d_1"), patch).await.unwrap();
    assert_eq!(draft.content, json!("v2"));
}

#[tokio::test]
async fn list_queries_by_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts"))
        .and(query_param("key", "post-composer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "drafts": [draft_json("d_1", json!("a")), draft_json("d_2", json!("b"))]
        })))
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let drafts = store.list(&key()).await.unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[1].id, DraftId::new("d_2"));
}

#[tokio::test]
async fn get_fetches_one_draft() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(draft_json("d_1", json!("a"))))
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    assert_eq!(store.get(&DraftId::new("d_1")).await.unwrap().content, json!("a"));
}

#[tokio::test]
async fn delete_succeeds_on_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    store.delete(&DraftId::new("d_1")).await.unwrap();
}

#[tokio::test]
async fn delete_treats_not_found_as_done() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/drafts/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    store.delete(&DraftId::new("gone")).await.unwrap();
}

// ── Error classification ─────────────────────────────────────────

#[tokio::test]
async fn too_many_requests_surfaces_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.create(NewDraft::new(key(), json!("a"))).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );
}

#[tokio::test]
async fn rejected_payload_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(422).set_body_string("content too large"))
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.create(NewDraft::new(key(), json!("a"))).await.unwrap_err();
    assert_eq!(
        err,
        SyncError::Client {
            status: 422,
            message: "content too large".into()
        }
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn writes_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.create(NewDraft::new(key(), json!("a"))).await.unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 503, .. }));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let config = HttpStoreConfig {
        timeout_ms: 1_000,
        read_retry: ReadRetryPolicy::none(),
        ..HttpStoreConfig::new("http://127.0.0.1:1")
    };
    let store = HttpDraftStore::new(config).unwrap();
    let err = store.get(&DraftId::new("d_1")).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert!(err.is_retryable());
}

// ── Read retry ───────────────────────────────────────────────────

#[tokio::test]
async fn reads_retry_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(draft_json("d_1", json!("a"))))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let draft = store.get(&DraftId::new("d_1")).await.unwrap();
    assert_eq!(draft.id, DraftId::new("d_1"));
}

#[tokio::test]
async fn reads_give_up_after_bounded_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(408))
        .expect(3)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.list(&key()).await.unwrap_err();
    assert!(matches!(err, SyncError::Server { status: 408, .. }));
}

#[tokio::test]
async fn reads_do_not_retry_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.get(&DraftId::new("missing")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn reads_give_up_when_server_asks_for_long_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let err = store.get(&DraftId::new("d_1")).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
}

// ── Dedup and rate limiting ──────────────────────────────────────

#[tokio::test]
async fn identical_concurrent_creates_reach_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(draft_json("d_1", json!("same")))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let (a, b) = tokio::join!(
        store.create(NewDraft::new(key(), json!("same"))),
        store.create(NewDraft::new(key(), json!("same"))),
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);
}

#[tokio::test]
async fn reverted_content_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(draft_json("d_1", json!("x"))))
        .expect(3)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let id = DraftId::new("d_1");
    for content in ["x", "y", "x"] {
        let patch = DraftPatch {
            content: json!(content),
            metadata: None,
        };
        store.update(&id, patch).await.unwrap();
    }

    let bodies: Vec<Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.body_json().unwrap())
        .collect();
    assert_eq!(
        bodies,
        vec![json!({"content": "x"}), json!({"content": "y"}), json!({"content": "x"})]
    );
}

#[tokio::test]
async fn recreating_deleted_draft_gets_new_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(draft_json("d_1", json!("same"))))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(draft_json("d_2", json!("same"))))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/drafts/d_1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = HttpDraftStore::new(mock_config(&server)).unwrap();
    let first = store.create(NewDraft::new(key(), json!("same"))).await.unwrap();
    store.delete(&first.id).await.unwrap();
    let second = store.create(NewDraft::new(key(), json!("same"))).await.unwrap();

    assert_eq!(first.id, DraftId::new("d_1"));
    assert_eq!(second.id, DraftId::new("d_2"));
}

#[tokio::test]
async fn local_rate_limit_rejects_before_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/drafts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(draft_json("d_1", json!("a"))))
        .expect(1)
        .mount(&server)
        .await;

    let mut endpoints = HashMap::new();
    endpoints.insert(
        "POST /drafts".to_string(),
        RateLimitConfig {
            max_requests: 1,
            window_ms: 60_000,
        },
    );
    let config = HttpStoreConfig {
        rate_limits: RateLimitGateConfig {
            global: RateLimitConfig::default(),
            endpoints,
        },
        ..mock_config(&server)
    };
    let store = HttpDraftStore::new(config).unwrap();

    store.create(NewDraft::new(key(), json!("a"))).await.unwrap();
    let err = store.create(NewDraft::new(key(), json!("b"))).await.unwrap_err();
    let retry_after = err.retry_after().unwrap();
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(60));
}
