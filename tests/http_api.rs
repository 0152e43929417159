use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use explore_llm::clients::{Completion, CompletionClient, CompletionError, CompletionRequest};
use explore_llm::config::{ApiKey, Config};
use explore_llm::http::{HttpState, router};
use explore_llm::operations::Operations;
use explore_llm::prompts::PromptRegistry;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

enum Behaviour {
    Reply(String),
    Hang,
    Status(u16),
}

struct FakeUpstream {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeUpstream {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn replying(text: &str) -> Arc<Self> {
        Self::new(Behaviour::Reply(text.to_string()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for FakeUpstream {
    async fn complete(
        &self,
        _request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Reply(text) => Ok(Completion {
                text: text.clone(),
                model: "fake-model".to_string(),
                latency_ms: 1,
            }),
            Behaviour::Hang => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(CompletionError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Err(CompletionError::EmptyResponse),
                }
            }
            Behaviour::Status(status) => Err(CompletionError::Http {
                status: *status,
                body: "secret upstream detail".to_string(),
            }),
        }
    }

    fn model(&self) -> &str {
        "fake-model"
    }
}

fn app_with(fake: Arc<FakeUpstream>, request_timeout_ms: u64, shutdown: CancellationToken) -> Router {
    let mut config = Config::default();
    config.runtime.api_key = ApiKey::new("sk-test");
    config.server.request_timeout_ms = request_timeout_ms;
    let operations = Operations::new(fake, PromptRegistry::new(), true);
    router(HttpState::new(
        Arc::new(config),
        Arc::new(operations),
        shutdown,
    ))
}

fn app(fake: Arc<FakeUpstream>) -> Router {
    app_with(fake, 5_000, CancellationToken::new())
}

async fn post_raw(app: Router, path: &str, body: String) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// A complete request body with empty personalization
fn request_body(text: &str) -> Value {
    json!({"text": text, "user_context": "", "selected_options": []})
}

async fn post_json(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, path, body.to_string()).await
}

async fn get(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn decompose_returns_sub_problems() {
    let fake = FakeUpstream::replying(r#"{"sub_problems":["Pick a date","Book a venue"]}"#);
    let (status, body) = post_json(
        app(fake.clone()),
        "/decompose",
        json!({"text": "Plan a wedding", "user_context": "small budget", "selected_options": []}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"sub_problems": ["Pick a date", "Book a venue"]}));
    assert_eq!(fake.calls(), 1);
}

#[tokio::test]
async fn options_fallback_text_is_normalized() {
    let fake = FakeUpstream::replying(
        "Recommended: Garden venue\n- Garden venue\n- Barn\n- Beach\n- Hotel ballroom\n- Family home",
    );
    let (status, body) = post_json(
        app(fake),
        "/options",
        json!({
            "text": "Book a venue",
            "context": "Plan a wedding",
            "user_context": "",
            "selected_options": ["outdoors"]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommended"], "Garden venue");
    assert_eq!(body["options"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn missing_user_context_is_validation_error_without_upstream_call() {
    let fake = FakeUpstream::replying(r#"{"summary":"Start with the guest list."}"#);
    let (status, body) = post_json(
        app(fake.clone()),
        "/summary",
        json!({"text": "Plan a wedding", "selected_options": []}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("user_context"));
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn missing_selected_options_is_validation_error() {
    let fake = FakeUpstream::replying("unused");
    let (status, body) = post_json(
        app(fake.clone()),
        "/decompose",
        json!({"text": "Plan a wedding", "user_context": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn options_context_may_be_omitted() {
    let fake = FakeUpstream::replying(r#"{"recommended":"A","options":["A","B","C","D","E"]}"#);
    let (status, body) = post_json(app(fake), "/options", request_body("Book a venue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recommended"], "A");
}

#[tokio::test]
async fn json_of_the_wrong_shape_is_parse_error() {
    let fake = FakeUpstream::replying(r#"{"steps": ["Find a gym", "Plan meals"]}"#);
    let (status, body) = post_json(app(fake), "/decompose", request_body("Get fit")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "parse_error");
    assert!(body.get("sub_problems").is_none());
}

#[tokio::test]
async fn missing_text_is_validation_error_without_upstream_call() {
    let fake = FakeUpstream::replying("unused");
    let (status, body) = post_json(
        app(fake.clone()),
        "/decompose",
        json!({"user_context": "x", "selected_options": []}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn blank_text_is_validation_error() {
    let fake = FakeUpstream::replying("unused");
    let (status, body) = post_json(app(fake.clone()), "/summary", request_body("  ")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    assert_eq!(body["error"]["message"], "text must not be empty");
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn malformed_json_body_is_validation_error() {
    let fake = FakeUpstream::replying("unused");
    let (status, body) = post_raw(app(fake.clone()), "/options", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation_error");
    assert_eq!(fake.calls(), 0);
}

#[tokio::test]
async fn too_few_options_is_parse_error() {
    let fake = FakeUpstream::replying(r#"{"recommended":"A","options":["A","B"]}"#);
    let (status, body) = post_json(app(fake), "/options", request_body("Choose")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "parse_error");
    assert!(body.get("options").is_none());
}

#[tokio::test]
async fn upstream_rejection_is_generic_upstream_error() {
    let fake = FakeUpstream::new(Behaviour::Status(401));
    let (status, body) = post_json(app(fake), "/decompose", request_body("x")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "upstream_error");
    assert!(!body["error"]["message"].as_str().unwrap().contains("secret"));
}

#[tokio::test]
async fn hanging_upstream_hits_request_deadline() {
    let fake = FakeUpstream::new(Behaviour::Hang);
    let started = std::time::Instant::now();
    let (status, body) = post_json(
        app_with(fake, 50, CancellationToken::new()),
        "/summary",
        request_body("x"),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["kind"], "upstream_error");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn shutdown_cancels_in_flight_calls() {
    let fake = FakeUpstream::new(Behaviour::Hang);
    let shutdown = CancellationToken::new();
    let app = app_with(fake, 60_000, shutdown.clone());

    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let (status, body) = post_json(app, "/decompose", request_body("x")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "upstream_error");
}

#[tokio::test]
async fn root_health_and_info() {
    let fake = FakeUpstream::replying("unused");
    let app = app(fake);

    let (status, body) = get(app.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"status": "ok"}));

    let (status, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let (status, body) = get(app, "/info").await;
    assert_eq!(status, StatusCode::OK);
    let info: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(info["completion"]["model"], "fake-model");
    assert_eq!(info["completion"]["structured_output"], true);
    let ids: Vec<&str> = info["prompts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["decompose-v1", "options-v1", "summary-v1"]);
}

#[tokio::test]
async fn metrics_count_operations_and_errors() {
    let fake = FakeUpstream::replying(r#"{"sub_problems":["a"]}"#);
    let app = app(fake);

    post_json(app.clone(), "/decompose", request_body("x")).await;
    post_json(app.clone(), "/decompose", request_body("")).await;

    let (_, body) = get(app, "/metrics").await;
    let metrics: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(metrics["total_requests"], 2);
    assert_eq!(metrics["errors_total"], 1);
    assert_eq!(metrics["operations"]["decompose"], 2);
}

#[tokio::test]
async fn responses_carry_request_id() {
    let fake = FakeUpstream::replying("unused");
    let resp = app(fake)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let id = resp.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn cors_allows_configured_frontend_origin() {
    let fake = FakeUpstream::replying("unused");
    let app = app(fake);

    let preflight = |origin: &str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/decompose")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap()
    };

    let resp = app.clone().oneshot(preflight("http://localhost:3000")).await.unwrap();
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        resp.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );

    let resp = app.oneshot(preflight("http://evil.example")).await.unwrap();
    assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}
