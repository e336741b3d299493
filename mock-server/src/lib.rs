//! Test fixture server for the request client.
//!
//! # Design
//! Every endpoint exists to make one client behavior observable over real
//! HTTP: `/echo` reflects what the server received, `/delay/{ms}` holds a
//! request open and records how many were held at once, and the remaining
//! routes produce specific statuses, redirects, cookies and JSON bodies.
//! State is per-`app()` so each test gets an isolated server.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

/// What the server saw for one request to `/echo`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub id: Uuid,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lowercased header names, values in arrival order.
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: String,
}

impl Echo {
    /// First value received for `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Concurrency counters for `/delay/{ms}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub in_flight: usize,
    pub peak: usize,
    pub hits: usize,
}

#[derive(Debug, Default)]
pub struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    hits: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            hits: self.hits.load(Ordering::SeqCst),
        }
    }
}

/// Decrements the gauge even when the client aborts mid-delay and axum drops
/// the handler future.
struct Held<'a>(&'a Gauge);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

pub type SharedGauge = Arc<Gauge>;

pub fn app() -> Router {
    let gauge: SharedGauge = Arc::new(Gauge::default());
    Router::new()
        .route("/echo", any(echo))
        .route("/echo/{*rest}", any(echo))
        .route("/delay/{ms}", get(delay))
        .route("/stats", get(stats))
        .route("/status/{code}", any(status))
        .route("/redirect", get(redirect))
        .route("/cookies/set/{name}/{value}", get(set_cookie))
        .route("/json/sample", get(json_sample))
        .route("/json/malformed", get(json_malformed))
        .with_state(gauge)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let mut collected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        collected
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    Json(Echo {
        id: Uuid::new_v4(),
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: collected,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn delay(State(gauge): State<SharedGauge>, Path(ms): Path<u64>) -> &'static str {
    gauge.enter();
    let _held = Held(&gauge);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn stats(State(gauge): State<SharedGauge>) -> Json<Stats> {
    Json(gauge.snapshot())
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn redirect() -> Redirect {
    Redirect::to("/echo")
}

async fn set_cookie(Path((name, value)): Path<(String, String)>) -> Response {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, format!("{name}={value}; Path=/"))],
        "cookie set",
    )
        .into_response()
}

async fn json_sample() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "a": 1, "tags": ["x", "y"] }))
}

async fn json_malformed() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"a": 1,"#,
    )
        .into_response()
}
