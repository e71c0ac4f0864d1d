//! End-to-end flows over the polling API with a scripted fake browser.
//!
//! The real Chromium launcher is swapped for fakes at the capability seam,
//! so these tests exercise the whole pipeline (job store, session task, 2FA
//! checkpoint, scroller, extractor, handlers) without a browser process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use group_scout::api;
use group_scout::browser::{BrowserDriver, BrowserLauncher, DriverError};
use group_scout::core::config::HarvesterConfig;
use group_scout::AppState;

const LISTING_FIXTURE: &str = r#"<html><body>
<a href="https://www.facebook.com/groups/rustaceans?ref=bookmark">Rustaceans<span>12K members</span></a>
<a href="https://www.facebook.com/groups/rustaceans">Rustaceans</a>
<a href="https://www.facebook.com/groups/feed">See your feed</a>
<a href="https://www.facebook.com/groups/embedded-rs"><span>Embedded Rust</span></a>
</body></html>"#;

// ── Fakes at the capability seam ─────────────────────────────────────────────

#[derive(Default)]
struct FakeBrowser {
    html: String,
    visited: Mutex<Vec<String>>,
    posts_clicked: AtomicUsize,
    closed: AtomicBool,
}

struct FakeDriver(Arc<FakeBrowser>);

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.0.visited.lock().unwrap().push(url.to_string());
        Ok(())
    }
    async fn type_text(&self, _selector: &str, _text: &str) -> Result<(), DriverError> {
        Ok(())
    }
    async fn click(&self, _selector: &str) -> Result<(), DriverError> {
        Ok(())
    }
    async fn wait_for_selector(
        &self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<bool, DriverError> {
        Ok(true)
    }
    async fn count_matches(&self, _selector: &str) -> Result<usize, DriverError> {
        Ok(4)
    }
    async fn scroll_by_viewport(&self) -> Result<(), DriverError> {
        Ok(())
    }
    async fn click_by_label_contains(&self, _needle: &str) -> Result<bool, DriverError> {
        Ok(false)
    }
    async fn click_by_text(&self, _text: &str) -> Result<bool, DriverError> {
        self.0.posts_clicked.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
    async fn content(&self) -> Result<String, DriverError> {
        Ok(self.0.html.clone())
    }
    async fn current_url(&self) -> Result<String, DriverError> {
        Ok("https://www.facebook.com/home".to_string())
    }
    async fn close(&self) -> Result<(), DriverError> {
        self.0.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeLauncher(Arc<FakeBrowser>);

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        Ok(Box::new(FakeDriver(self.0.clone())))
    }
}

/// A launcher that never finishes launching: the run stays pinned in
/// `running` for as long as a test needs it there.
struct ParkedLauncher;

#[async_trait]
impl BrowserLauncher for ParkedLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        futures::future::pending().await
    }
}

// ── Harness helpers ──────────────────────────────────────────────────────────

fn test_config() -> HarvesterConfig {
    HarvesterConfig {
        account_email: Some("ops@example.com".into()),
        account_password: Some("hunter2".into()),
        settle_interval_ms: Some(1),
        nav_settle_ms: Some(1),
        post_message: Some("Hello from the ops side".into()),
        ..Default::default()
    }
}

fn app_with(launcher: Arc<dyn BrowserLauncher>, config: HarvesterConfig) -> Router {
    let state = Arc::new(AppState::new(config).with_launcher(launcher));
    api::router(state)
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn wait_for_status(app: &Router, wanted: &str) -> serde_json::Value {
    for _ in 0..500 {
        let (code, body) = call(app, "GET", "/status", None).await;
        assert_eq!(code, StatusCode::OK);
        if body["status"] == wanted {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("status never reached {wanted}");
}

// ── Flows ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_harvest_flow_with_2fa_continue() {
    let browser = Arc::new(FakeBrowser {
        html: LISTING_FIXTURE.to_string(),
        ..Default::default()
    });
    let app = app_with(Arc::new(FakeLauncher(browser.clone())), test_config());

    let (code, body) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["message"].as_str().unwrap().contains("started"));

    // The session parks at the 2FA checkpoint until we continue it.
    let body = wait_for_status(&app, "waiting-2fa").await;
    assert!(body["isRunning"].as_bool().unwrap());

    let (code, body) = call(&app, "POST", "/continue", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let body = wait_for_status(&app, "completed").await;
    assert!(!body["isRunning"].as_bool().unwrap());
    assert!(body["output"].as_str().unwrap().contains("harvest complete"));
    assert!(browser.closed.load(Ordering::SeqCst));

    // Dedup + denylist: 4 anchors in the fixture boil down to 2 records.
    let (code, body) = call(&app, "GET", "/groups", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["success"], true);
    let groups = body["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["id"], "rustaceans");
    assert_eq!(groups[0]["url"], "https://www.facebook.com/groups/rustaceans");
    assert_eq!(groups[0]["memberCount"], "12K members");
    assert_eq!(groups[1]["name"], "Embedded Rust");
    assert!(groups.iter().all(|g| !g["url"].as_str().unwrap().contains('?')));
}

#[tokio::test]
async fn test_second_start_is_rejected_with_live_state_echoed() {
    let app = app_with(Arc::new(ParkedLauncher), test_config());

    let (code, first) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(first["status"], "running");

    let (code, second) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(second["error"].as_str().unwrap().contains("already running"));
    assert_eq!(second["status"], "running");
    // The rejection must not disturb the live run's output.
    assert_eq!(second["output"], first["output"]);
}

#[tokio::test]
async fn test_continue_without_pending_session_is_rejected() {
    let app = app_with(Arc::new(ParkedLauncher), test_config());

    let (code, body) = call(&app, "POST", "/continue", None).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "idle");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("no session is waiting"));

    // A running (not suspended) session is just as ineligible.
    let (code, _) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::OK);
    let (code, body) = call(&app, "POST", "/continue", None).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn test_reset_yields_idle_and_stale_run_cannot_resurface() {
    let browser = Arc::new(FakeBrowser {
        html: LISTING_FIXTURE.to_string(),
        ..Default::default()
    });
    let app = app_with(Arc::new(FakeLauncher(browser)), test_config());

    let (code, _) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::OK);
    wait_for_status(&app, "waiting-2fa").await;

    let (code, body) = call(&app, "POST", "/reset", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["output"], "");
    assert_eq!(body["isRunning"], false);

    // The aborted task must not write back into the fresh state.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "idle");
    assert_eq!(body["output"], "");
}

#[tokio::test]
async fn test_post_flow_posts_to_each_selected_group() {
    let browser = Arc::new(FakeBrowser {
        html: LISTING_FIXTURE.to_string(),
        ..Default::default()
    });
    let app = app_with(Arc::new(FakeLauncher(browser.clone())), test_config());

    let targets = serde_json::json!({
        "groups": [
            "https://www.facebook.com/groups/rustaceans",
            "https://www.facebook.com/groups/embedded-rs"
        ],
        "message": "Ship it"
    });
    let (code, body) = call(&app, "POST", "/post", Some(targets)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "running");

    wait_for_status(&app, "waiting-2fa").await;
    let (code, _) = call(&app, "POST", "/continue", None).await;
    assert_eq!(code, StatusCode::OK);

    let body = wait_for_status(&app, "completed").await;
    assert!(body["output"]
        .as_str()
        .unwrap()
        .contains("posting complete — 2 of 2"));
    assert_eq!(browser.posts_clicked.load(Ordering::SeqCst), 2);

    let visited = browser.visited.lock().unwrap();
    assert!(visited.contains(&"https://www.facebook.com/groups/rustaceans".to_string()));
    assert!(visited.contains(&"https://www.facebook.com/groups/embedded-rs".to_string()));
}

#[tokio::test]
async fn test_post_without_targets_or_harvest_is_rejected() {
    let app = app_with(Arc::new(ParkedLauncher), test_config());
    let (code, body) = call(&app, "POST", "/post", Some(serde_json::json!({}))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("no groups"));
}

#[tokio::test]
async fn test_start_without_credentials_fails_kickoff() {
    // Only meaningful when the env fallback is absent too.
    if std::env::var("GROUP_SCOUT_EMAIL").is_ok() {
        return;
    }
    let app = app_with(Arc::new(ParkedLauncher), HarvesterConfig::default());

    let (code, body) = call(&app, "POST", "/start", None).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("credentials are not configured"));

    // Kickoff failure leaves the store untouched.
    let (_, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(body["status"], "idle");
}

#[tokio::test]
async fn test_wrong_methods_get_405() {
    let app = app_with(Arc::new(ParkedLauncher), test_config());

    let (code, _) = call(&app, "GET", "/start", None).await;
    assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);

    let (code, _) = call(&app, "POST", "/status", None).await;
    assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);

    let (code, _) = call(&app, "GET", "/continue", None).await;
    assert_eq!(code, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_status_shape_and_timestamp() {
    let app = app_with(Arc::new(ParkedLauncher), test_config());
    let (code, body) = call(&app, "GET", "/status", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["output"], "");
    assert_eq!(body["isRunning"], false);
    // RFC 3339 timestamp.
    let ts = body["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
}
