use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use actix_http::Request;
use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceResponse},
    http::{header, Method, StatusCode},
    test, web, App, Error,
};
use chrono::Utc;
use regex::Regex;
use relay_auth::CredentialStore;
use relay_server::{
    app_config,
    middleware::TracingMiddleware,
    server::{cors, default_headers},
    AppState, ServerConfig,
};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use wiremock::{
    matchers::{any, body_string_contains, header as header_is, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const GITHUB_TOKEN: &str = "gho_integrationtoken000000000001";
const API_TOKEN: &str = "tid=relaytest;exp=4102444800;sku=free";
const DEVICE_CODE: &str = "3584d83530557fdd1f46af8289938c8ef79f9dc5";

struct Fixture {
    mock: MockServer,
    dir: TempDir,
    store: Arc<CredentialStore>,
    state: web::Data<AppState>,
}

async fn fixture(token: Option<&str>) -> Fixture {
    let mock = MockServer::start().await;
    fixture_with(mock, token, |_| {}).await
}

async fn fixture_with(
    mock: MockServer,
    token: Option<&str>,
    tweak: impl FnOnce(&mut ServerConfig),
) -> Fixture {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(CredentialStore::load(dir.path().join("config.json")).expect("load"));
    if let Some(token) = token {
        store.set_github_token(token);
    }

    let mut config = ServerConfig {
        source_dir: dir.path().to_path_buf(),
        github_base_url: mock.uri(),
        github_api_url: mock.uri(),
        copilot_api_url: mock.uri(),
        ..ServerConfig::default()
    };
    tweak(&mut config);

    let state = web::Data::new(AppState::new(&config, Arc::clone(&store)));
    Fixture {
        mock,
        dir,
        store,
        state,
    }
}

async fn init_app(
    state: web::Data<AppState>,
) -> impl Service<Request, Response = ServiceResponse<impl MessageBody>, Error = Error> {
    test::init_service(
        App::new()
            .app_data(state)
            .wrap(TracingMiddleware)
            .wrap(default_headers())
            .wrap(cors())
            .configure(app_config),
    )
    .await
}

async fn mount_token_exchange(mock: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/copilot_internal/v2/token"))
        .and(header_is("authorization", format!("token {GITHUB_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": API_TOKEN,
            "expires_at": Utc::now().timestamp() + 1800,
            "refresh_in": 1500
        })))
        .expect(expected_calls)
        .mount(mock)
        .await;
}

async fn get_json<S, B>(app: &S, uri: &str) -> Value
where
    S: Service<Request, Response = ServiceResponse<B>, Error = Error>,
    B: MessageBody,
{
    test::call_and_read_body_json(app, test::TestRequest::get().uri(uri).to_request()).await
}

#[actix_web::test]
async fn health_before_authentication() {
    let fx = fixture(None).await;
    let app = init_app(fx.state.clone()).await;

    let body = get_json(&app, "/health").await;
    assert_eq!(
        body,
        json!({
            "status": "ok",
            "authenticated": false,
            "requests": 0,
            "premium_requests_used": 0.0
        })
    );

    let root = get_json(&app, "/").await;
    assert_eq!(root["status"], "ok");

    let status = get_json(&app, "/auth/status").await;
    assert_eq!(status["authenticated"], false);
    assert!(status["message"].as_str().unwrap().contains("/auth/device"));
}

#[actix_web::test]
async fn stats_report_uptime_and_counters() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    let app = init_app(fx.state.clone()).await;

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 0);
    assert_eq!(stats["authenticated"], true);
    assert!(stats["uptime"].as_u64().is_some());
}

#[actix_web::test]
async fn device_flow_pending_then_success_persists_credential() {
    let fx = fixture(None).await;

    Mock::given(method("POST"))
        .and(path("/login/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": DEVICE_CODE,
            "user_code": "WDJB-MJHT",
            "verification_uri": "https://github.com/login/device",
            "expires_in": 900,
            "interval": 5
        })))
        .expect(1)
        .mount(&fx.mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .and(body_string_contains(DEVICE_CODE))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": "authorization_pending"})),
        )
        .up_to_n_times(1)
        .mount(&fx.mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": GITHUB_TOKEN,
            "token_type": "bearer",
            "scope": "read:user"
        })))
        .mount(&fx.mock)
        .await;

    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post().uri("/auth/device").to_request();
    let raw = test::call_and_read_body(&app, req).await;
    let raw_text = String::from_utf8(raw.to_vec()).unwrap();
    assert!(!raw_text.contains(DEVICE_CODE));
    let started: Value = serde_json::from_str(&raw_text).unwrap();
    assert_eq!(started["success"], true);
    assert!(Regex::new(r"^[A-Z0-9]{4}-[A-Z0-9]{4}$")
        .unwrap()
        .is_match(started["user_code"].as_str().unwrap()));
    let flow_id = started["flow_id"].as_str().unwrap().to_string();
    let uuid_v4 =
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .unwrap();
    assert!(uuid_v4.is_match(&flow_id));

    let poll = |flow_id: String| {
        test::TestRequest::post()
            .uri("/auth/poll")
            .set_json(json!({ "flow_id": flow_id }))
            .to_request()
    };

    let raw = test::call_and_read_body(&app, poll(flow_id.clone())).await;
    assert!(!String::from_utf8_lossy(&raw).contains(DEVICE_CODE));
    let pending: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["interval"], 5);

    let raw = test::call_and_read_body(&app, poll(flow_id.clone())).await;
    assert!(!String::from_utf8_lossy(&raw).contains(DEVICE_CODE));
    let done: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(done["status"], "success");

    let on_disk = fs::read_to_string(fx.store.path()).unwrap();
    assert!(on_disk.contains(GITHUB_TOKEN));
    assert!(!fx.state.device_flow.is_tracked(&flow_id));

    let status = get_json(&app, "/auth/status").await;
    assert_eq!(status["authenticated"], true);
}

#[actix_web::test]
async fn device_flow_upstream_failure_is_reported() {
    let fx = fixture(None).await;
    Mock::given(method("POST"))
        .and(path("/login/device/code"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let resp =
        test::call_service(&app, test::TestRequest::post().uri("/auth/device").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[actix_web::test]
async fn poll_unknown_flow_and_malformed_body() {
    let fx = fixture(None).await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/auth/poll")
        .set_json(json!({"flow_id": "00000000-0000-4000-8000-000000000000"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "error");

    let req = test::TestRequest::post()
        .uri("/auth/poll")
        .set_json(json!({"flow": "missing"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[actix_web::test]
async fn device_page_is_html() {
    let fx = fixture(None).await;
    let app = init_app(fx.state.clone()).await;

    let resp =
        test::call_service(&app, test::TestRequest::get().uri("/auth/device").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains("/auth/poll"));
}

#[actix_web::test]
async fn chat_completion_is_proxied_and_accounted() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 1).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_is("authorization", format!("Bearer {API_TOKEN}").as_str()))
        .and(header_is("copilot-integration-id", "vscode-chat"))
        .and(header_is("x-initiator", "user"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "_session=abc; Path=/")
                .insert_header("x-request-id", "req-1")
                .set_body_json(json!({"id": "chatcmpl-1", "choices": []})),
        )
        .expect(2)
        .mount(&fx.mock)
        .await;

    let app = init_app(fx.state.clone()).await;

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/v1/chat/completions")
            .insert_header(("Authorization", "Bearer caller-supplied-key"))
            .set_json(json!({
                "model": "claude-opus-4.5",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(resp.headers().get("x-request-id").unwrap(), "req-1");
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], "chatcmpl-1");
    }

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 2);
    assert_eq!(stats["premium_requests_used"], 6.0);
}

#[actix_web::test]
async fn provider_prefixed_model_counts_the_same() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 1).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header_is("x-initiator", "agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({
            "model": "github-copilot/claude-opus-4.5",
            "messages": [{"role": "user"}, {"role": "assistant"}, {"role": "tool"}]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let health = get_json(&app, "/health").await;
    assert_eq!(health["requests"], 1);
    assert_eq!(health["premium_requests_used"], 3.0);
}

#[actix_web::test]
async fn streamed_completion_passes_through_verbatim() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 1).await;
    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
               data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
               data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-4.1", "stream": true, "messages": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    let body = test::read_body(resp).await;
    assert_eq!(body, sse.as_bytes());

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["premium_requests_used"], 0.0);
}

#[actix_web::test]
async fn bodyless_and_legacy_paths_are_forwarded() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 1).await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(query_param("filter", "chat models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(2)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    for uri in ["/v1/models?filter=chat%20models", "/models?filter=chat%20models"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
    }

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 2);
    assert_eq!(stats["premium_requests_used"], 0.0);
}

#[actix_web::test]
async fn non_json_body_counts_as_unknown_model() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 1).await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/embeddings")
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload("not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 1);
    assert_eq!(stats["premium_requests_used"], 1.0);
}

#[actix_web::test]
async fn unauthenticated_call_is_rejected_without_network() {
    let fx = fixture(None).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-4o", "messages": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("/auth/device"));

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 0);
}

#[actix_web::test]
async fn traversal_and_unknown_paths_are_forbidden() {
    for token in [Some(GITHUB_TOKEN), None] {
        let fx = fixture(token).await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&fx.mock)
            .await;
        let app = init_app(fx.state.clone()).await;

        for uri in [
            "/v1/../admin",
            "/v1//chat/completions",
            "/v1/%2e%2e/admin",
            "/admin",
            "/chat/completions/../../etc/passwd",
        ] {
            let req = test::TestRequest::post()
                .uri(uri)
                .set_json(json!({"model": "gpt-4o"}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
        }

        let stats = get_json(&app, "/stats").await;
        assert_eq!(stats["requests"], 0);
    }
}

#[actix_web::test]
async fn upstream_transport_failure_is_a_generic_502() {
    let mock = MockServer::start().await;
    let fx = fixture_with(mock, Some(GITHUB_TOKEN), |config| {
        config.copilot_api_url = "http://127.0.0.1:9".to_string();
    })
    .await;
    mount_token_exchange(&fx.mock, 1).await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-5", "messages": []}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let raw = test::read_body(resp).await;
    let text = String::from_utf8_lossy(&raw);
    assert!(!text.contains(API_TOKEN));
    assert!(!text.contains(GITHUB_TOKEN));
    let body: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(body["error"]["message"], "Upstream request failed");

    let stats = get_json(&app, "/stats").await;
    assert_eq!(stats["requests"], 1);
}

#[actix_web::test]
async fn stalled_token_exchange_is_a_502_not_a_hang() {
    let mock = MockServer::start().await;
    let fx = fixture_with(mock, Some(GITHUB_TOKEN), |config| {
        config.upstream_timeout = std::time::Duration::from_millis(300);
    })
    .await;
    Mock::given(method("GET"))
        .and(path("/copilot_internal/v2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "token": API_TOKEN,
                    "expires_at": Utc::now().timestamp() + 1800
                }))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .expect(1)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-4o"}))
        .to_request();
    let resp = tokio::time::timeout(
        std::time::Duration::from_secs(3),
        test::call_service(&app, req),
    )
    .await
    .expect("relay must answer once the exchange times out");
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert!(fx.store.has_credential());
}

#[actix_web::test]
async fn rejected_credential_is_cleared() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    Mock::given(method("GET"))
        .and(path("/copilot_internal/v2/token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-4o"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(!fx.store.has_credential());

    let health = get_json(&app, "/health").await;
    assert_eq!(health["authenticated"], false);
}

#[actix_web::test]
async fn upstream_401_forces_a_token_refresh() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    mount_token_exchange(&fx.mock, 2).await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "expired"})))
        .expect(2)
        .mount(&fx.mock)
        .await;
    let app = init_app(fx.state.clone()).await;

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/v1/chat/completions")
            .set_json(json!({"model": "gpt-4o"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
    assert!(fx.store.has_credential());
}

#[actix_web::test]
async fn announced_api_endpoint_is_used() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    let announced = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/copilot_internal/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": API_TOKEN,
            "expires_at": Utc::now().timestamp() + 1800,
            "endpoints": { "api": format!("{}/", announced.uri()) }
        })))
        .mount(&fx.mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"from": "announced"})))
        .expect(1)
        .mount(&announced)
        .await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::post()
        .uri("/v1/chat/completions")
        .set_json(json!({"model": "gpt-4o"}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["from"], "announced");
}

#[actix_web::test]
async fn logout_clears_credential() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    let app = init_app(fx.state.clone()).await;

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::post().uri("/auth/logout").to_request(),
    )
    .await;
    assert_eq!(body["success"], true);

    let status = get_json(&app, "/auth/status").await;
    assert_eq!(status["authenticated"], false);
    assert!(!fs::read_to_string(fx.store.path())
        .unwrap()
        .contains(GITHUB_TOKEN));
}

#[actix_web::test]
async fn cors_preflight_is_answered() {
    let fx = fixture(None).await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::default()
        .method(Method::OPTIONS)
        .uri("/v1/chat/completions")
        .insert_header((header::ORIGIN, "http://localhost:3000"))
        .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[actix_web::test]
async fn setup_script_points_at_the_relay() {
    let fx = fixture(None).await;
    let app = init_app(fx.state.clone()).await;

    let req = test::TestRequest::get()
        .uri("/setup")
        .insert_header((header::HOST, "relay.test:8080"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/x-shellscript"
    );
    let body = test::read_body(resp).await;
    let script = String::from_utf8_lossy(&body);
    assert!(script.contains("http://relay.test:8080"));
    assert!(script.contains("/bundle.tar.gz"));
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let target = root.join(relative);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(target, contents).unwrap();
}

#[actix_web::test]
async fn bundle_never_contains_the_credential_file() {
    let fx = fixture(Some(GITHUB_TOKEN)).await;
    let root = fx.dir.path();
    write_file(root, "README.md", "relay");
    write_file(root, "src/main.rs", "fn main() {}");
    write_file(root, "nested/config.json", "{\"github_token\": \"copy\"}");
    write_file(root, ".env", "GITHUB_TOKEN=secret");
    write_file(root, ".env.local", "GITHUB_TOKEN=secret");
    write_file(root, "node_modules/pkg/index.js", "module.exports = 1");
    write_file(root, "logs/relay.log", "log line");
    write_file(root, "debug.log", "log line");
    let app = init_app(fx.state.clone()).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/bundle.tar.gz").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/gzip"
    );
    let archive = test::read_body(resp).await;

    let out = tempdir().unwrap();
    let archive_path = out.path().join("bundle.tar.gz");
    fs::write(&archive_path, &archive).unwrap();
    let listing = Command::new("tar")
        .arg("-tzf")
        .arg(&archive_path)
        .output()
        .expect("run tar");
    assert!(listing.status.success());
    let entries: Vec<String> = String::from_utf8_lossy(&listing.stdout)
        .lines()
        .map(|line| line.trim_end_matches('/').to_string())
        .collect();

    assert!(entries.iter().any(|e| e.ends_with("src/main.rs")));
    assert!(entries.iter().any(|e| e.ends_with("README.md")));
    for entry in &entries {
        let name = entry.rsplit('/').next().unwrap_or(entry);
        assert_ne!(name, "config.json", "credential file leaked: {entry}");
        assert!(!name.starts_with(".env"), "env file leaked: {entry}");
        assert!(!name.ends_with(".log"), "log file leaked: {entry}");
        assert!(!entry.contains("node_modules"), "dependency cache leaked: {entry}");
    }
}

#[actix_web::test]
async fn bundle_of_missing_tree_is_a_500() {
    let mock = MockServer::start().await;
    let fx = fixture_with(mock, None, |config| {
        config.source_dir = "/nonexistent/relay/source".into();
    })
    .await;
    let app = init_app(fx.state.clone()).await;

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/bundle.tar.gz").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
