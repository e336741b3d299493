//! End-to-end behavior against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on an ephemeral port so concurrency
//! counters are isolated, then drives the public client API over real HTTP.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mock_server::{Echo, Stats};
use req_core::{
    Cancellation, Client, ClientBuilder, Context, ErrorKind, Jar, Method, Policy, RequestOptions, StatusCode, Transport,
    Values, CONTENT_TYPE_FORM, CONTENT_TYPE_JSON,
};
use serde::Deserialize;

async fn start_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));
    format!("http://{addr}")
}

/// Direct connections only, so a proxy in the environment cannot interfere.
fn builder(base: &str) -> ClientBuilder {
    Client::builder().base_url(base).transport(Transport {
        proxy_from_env: false,
        ..Transport::default()
    })
}

fn client(base: &str) -> Client {
    builder(base).build().unwrap()
}

async fn echo_of(resp: req_core::Result<req_core::Response>) -> Echo {
    let mut resp = resp.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    resp.json().await.unwrap()
}

async fn server_stats(client: &Client) -> Stats {
    let mut resp = client
        .get(&Context::background(), "/stats", None, RequestOptions::new())
        .await
        .unwrap();
    resp.json().await.unwrap()
}

/// Poll the server until no `/delay` handler is running or `within` elapses.
async fn server_in_flight_settles(client: &Client, within: Duration) -> usize {
    let deadline = Instant::now() + within;
    loop {
        let stats = server_stats(client).await;
        if stats.in_flight == 0 || Instant::now() >= deadline {
            return stats.in_flight;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// --- configuration merge over the wire ---

#[tokio::test]
async fn get_joins_base_url_and_appends_query() {
    let base = start_server().await;
    let client = client(&format!("{base}/"));
    let query: Values = [("a", "1"), ("a", "2"), ("b", "x y")].into_iter().collect();

    let echo = echo_of(client.get(&Context::background(), "/echo/items", Some(&query), RequestOptions::new()).await).await;

    assert_eq!(echo.method, "GET");
    assert_eq!(echo.path, "/echo/items");
    assert_eq!(echo.query.as_deref(), Some("a=1&a=2&b=x+y"));
}

#[tokio::test]
async fn query_extends_existing_query_string() {
    let base = start_server().await;
    let client = client(&base);
    let query: Values = [("page", "2")].into_iter().collect();

    let echo = echo_of(client.get(&Context::background(), "echo?sort=asc", Some(&query), RequestOptions::new()).await).await;

    assert_eq!(echo.query.as_deref(), Some("sort=asc&page=2"));
}

#[tokio::test]
async fn empty_base_url_uses_path_verbatim() {
    let base = start_server().await;
    let client = client("");

    let echo = echo_of(client.get(&Context::background(), &format!("{base}/echo"), None, RequestOptions::new()).await).await;

    assert_eq!(echo.path, "/echo");
}

#[tokio::test]
async fn call_headers_replace_defaults_and_auth_is_sent() {
    let base = start_server().await;
    let client = builder(&base)
        .default_header("x-env", "prod")
        .default_header("x-team", "core")
        .build()
        .unwrap();

    let options = RequestOptions::new()
        .header("X-Env", "staging")
        .basic_auth("user", Some("pass"));
    let echo = echo_of(client.delete(&Context::background(), "/echo", None, options).await).await;

    assert_eq!(echo.method, "DELETE");
    assert_eq!(echo.headers["x-env"], vec!["staging"]);
    assert_eq!(echo.header("x-team"), Some("core"));
    assert_eq!(echo.header("authorization"), Some("Basic dXNlcjpwYXNz"));
}

#[tokio::test]
async fn hook_can_rewrite_request() {
    let base = start_server().await;
    let client = client(&base);

    let options = RequestOptions::new().hook(|mut req| {
        *req.method_mut() = Method::PUT;
        req.headers_mut().insert("x-signed", "yes".parse()?);
        Ok(req)
    });
    let echo = echo_of(client.get(&Context::background(), "/echo", None, options).await).await;

    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.header("x-signed"), Some("yes"));
}

#[tokio::test]
async fn hook_failure_aborts_before_dispatch() {
    let base = start_server().await;
    let client = client(&base);

    let options = RequestOptions::new().hook(|_| Err("no credentials".into()));
    let err = client
        .get(&Context::background(), "/echo", None, options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Build);
    assert_eq!(client.stats().completed, 0);
}

// --- bodies ---

#[tokio::test]
async fn post_json_sets_content_type_and_roundtrips() {
    let base = start_server().await;
    let client = client(&base);
    let value = serde_json::json!({ "a": 1 });

    let echo = echo_of(client.post_json(&Context::background(), "/echo", &value, RequestOptions::new()).await).await;

    assert_eq!(echo.method, "POST");
    assert_eq!(echo.header("content-type"), Some(CONTENT_TYPE_JSON));
    let back: serde_json::Value = serde_json::from_str(&echo.body).unwrap();
    assert_eq!(back, value);
}

#[tokio::test]
async fn put_json_uses_put() {
    let base = start_server().await;
    let client = client(&base);

    let echo = echo_of(client.put_json(&Context::background(), "/echo", &[1, 2, 3], RequestOptions::new()).await).await;

    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.body, "[1,2,3]");
}

#[tokio::test]
async fn post_form_encodes_multimap() {
    let base = start_server().await;
    let client = client(&base);
    let form: Values = [("a", "1"), ("a", "2")].into_iter().collect();

    let echo = echo_of(client.post_form(&Context::background(), "/echo", &form, RequestOptions::new()).await).await;

    assert_eq!(echo.header("content-type"), Some(CONTENT_TYPE_FORM));
    assert_eq!(echo.body, "a=1&a=2");
}

#[tokio::test]
async fn put_form_respects_caller_content_type() {
    let base = start_server().await;
    let client = client(&base);
    let form: Values = [("k", "v")].into_iter().collect();

    let options = RequestOptions::new().header("Content-Type", "text/plain");
    let echo = echo_of(client.put_form(&Context::background(), "/echo", &form, options).await).await;

    assert_eq!(echo.method, "PUT");
    assert_eq!(echo.headers["content-type"], vec!["text/plain"]);
}

#[tokio::test]
async fn raw_post_and_send_carry_body() {
    let base = start_server().await;
    let client = client(&base);

    let echo = echo_of(client.post(&Context::background(), "/echo", "raw bytes", RequestOptions::new()).await).await;
    assert_eq!(echo.body, "raw bytes");

    let echo = echo_of(
        client
            .send(&Context::background(), "/echo", Method::OPTIONS, None, RequestOptions::new())
            .await,
    )
    .await;
    assert_eq!(echo.method, "OPTIONS");
}

#[tokio::test]
async fn head_and_patch_reach_server() {
    let base = start_server().await;
    let client = client(&base);

    let resp = client
        .head(&Context::background(), "/echo", None, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let echo = echo_of(client.patch(&Context::background(), "/echo", None, RequestOptions::new()).await).await;
    assert_eq!(echo.method, "PATCH");
}

// --- response wrapper ---

#[derive(Debug, Deserialize)]
struct Sample {
    a: i64,
    tags: Vec<String>,
}

#[tokio::test]
async fn json_decodes_and_second_read_errors() {
    let base = start_server().await;
    let client = client(&base);

    let mut resp = client
        .get(&Context::background(), "/json/sample", None, RequestOptions::new())
        .await
        .unwrap();
    let sample: Sample = resp.json().await.unwrap();
    assert_eq!(sample.a, 1);
    assert_eq!(sample.tags, ["x", "y"]);

    let err = resp.text().await.unwrap_err();
    assert!(matches!(err, req_core::Error::BodyConsumed));
}

#[tokio::test]
async fn malformed_json_is_decode_error_not_request_error() {
    let base = start_server().await;
    let client = client(&base);

    let mut resp = client
        .get(&Context::background(), "/json/malformed", None, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let err = resp.json::<Sample>().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
}

#[tokio::test]
async fn error_statuses_are_responses() {
    let base = start_server().await;
    let client = client(&base);

    let resp = client
        .get(&Context::background(), "/status/503", None, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// --- transport policy pass-through ---

#[tokio::test]
async fn redirect_policy_is_honored() {
    let base = start_server().await;

    let following = client(&base);
    let resp = following
        .get(&Context::background(), "/redirect", None, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.url().path(), "/echo");

    let pinned = builder(&base).redirect(Policy::none()).build().unwrap();
    let resp = pinned
        .get(&Context::background(), "/redirect", None, RequestOptions::new())
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
}

#[tokio::test]
async fn cookie_store_persists_between_calls() {
    let base = start_server().await;
    let jar = Arc::new(Jar::default());
    let client = builder(&base).cookie_store(jar).build().unwrap();

    client
        .get(&Context::background(), "/cookies/set/session/abc", None, RequestOptions::new())
        .await
        .unwrap();
    let echo = echo_of(client.get(&Context::background(), "/echo", None, RequestOptions::new()).await).await;

    assert_eq!(echo.header("cookie"), Some("session=abc"));
}

#[tokio::test]
async fn transport_timeout_is_network_error_not_cancellation() {
    let base = start_server().await;
    let client = client(&base);

    let options = RequestOptions::new().timeout(Duration::from_millis(50));
    let err = client
        .get(&Context::background(), "/delay/2000", None, options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn refused_connection_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(&format!("http://{addr}"));

    let err = client
        .get(&Context::background(), "/", None, RequestOptions::new())
        .await
        .unwrap_err();

    assert!(err.is_network());
}

// --- cancellation ---

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_flight_returns_promptly_and_releases() {
    let base = start_server().await;
    let client = client(&base);
    let (ctx, cancel) = Context::background().with_cancel();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let err = client
        .get(&ctx, "/delay/5000", None, RequestOptions::new())
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.cancellation(), Some(Cancellation::Canceled));
    assert!(started.elapsed() < Duration::from_secs(2));
    let stats = client.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.cancelled, 1);
    // The aborted connection is closed, so the server drops the handler long
    // before its 5s delay ends.
    assert_eq!(server_in_flight_settles(&client, Duration::from_secs(1)).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_reports_deadline_exceeded() {
    let base = start_server().await;
    let client = client(&base);
    let ctx = Context::background().with_timeout(Duration::from_millis(100));

    let err = client
        .get(&ctx, "/delay/5000", None, RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(err.cancellation(), Some(Cancellation::DeadlineExceeded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_cancel_cycles_leave_nothing_in_flight() {
    let base = start_server().await;
    let client = builder(&base).max_worker(2).max_queue(2).build().unwrap();

    for _ in 0..10 {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        let err = client
            .get(&ctx, "/delay/1000", None, RequestOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    let stats = client.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.cancelled, 10);
    assert!(stats.slots <= 4, "slots grew to {}", stats.slots);
    assert_eq!(server_in_flight_settles(&client, Duration::from_millis(500)).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_call_cancels_without_waiting_for_worker() {
    let base = start_server().await;
    let client = builder(&base).max_worker(1).max_queue(4).build().unwrap();

    let blocker = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .get(&Context::background(), "/delay/1000", None, RequestOptions::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let err = client
        .get(&ctx, "/echo", None, RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.cancellation(), Some(Cancellation::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_millis(800));
    assert!(blocker.await.unwrap().is_ok());
}

// --- dispatcher bound and backpressure ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_than_max_worker_in_flight() {
    let base = start_server().await;
    let client = builder(&base).max_worker(3).max_queue(16).build().unwrap();

    let calls: Vec<_> = (0..12)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .get(&Context::background(), "/delay/50", None, RequestOptions::new())
                    .await
            })
        })
        .collect();
    for call in calls {
        assert_eq!(call.await.unwrap().unwrap().status(), StatusCode::OK);
    }

    let stats = client.stats();
    assert!(stats.peak_in_flight <= 3, "client peak {}", stats.peak_in_flight);
    assert_eq!(stats.completed, 12);

    let server = server_stats(&client).await;
    assert!(server.peak <= 3, "server peak {}", server.peak);
    assert_eq!(server.hits, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overflowing_queue_delays_but_never_drops() {
    let base = start_server().await;
    let client = builder(&base).max_worker(2).max_queue(1).build().unwrap();

    let calls: Vec<_> = (0..20)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let query: Values = [("i", i.to_string())].into_iter().collect();
                let mut resp = client
                    .get(&Context::background(), "/echo", Some(&query), RequestOptions::new())
                    .await?;
                let echo: Echo = resp.json().await?;
                Ok::<_, req_core::Error>(echo.query)
            })
        })
        .collect();

    let mut seen = Vec::new();
    for call in calls {
        seen.push(call.await.unwrap().unwrap());
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);
    assert_eq!(client.stats().completed, 20);
    assert!(client.stats().peak_in_flight <= 2);
}
