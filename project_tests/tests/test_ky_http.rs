//! # ApiClient Integration Tests
//!
//! Drives the reqwest-backed `ApiClient` against `MockHttpServer`, both
//! directly and through a `Dispatcher`, and inspects what went over the wire.

use std::net::TcpListener;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use lib_request::configs::DispatchConfig;
use lib_request::core::{Dispatcher, DispatchError, RequestParams, RetryPolicy, TransportError};
use lib_request::ApiClient;
use project_tests::{MockHttpServer, Reply};

fn ok(body: &str) -> Reply {
    Reply::Status(200, body.to_string())
}

/// The request line of a captured raw request.
fn request_line(raw: &str) -> &str {
    raw.lines().next().unwrap_or_default()
}

#[tokio::test]
async fn server_errors_are_retried_through_the_dispatcher() {
    let server = MockHttpServer::start(vec![
        Reply::Status(503, r#"{"error":"busy"}"#.to_string()),
        ok(r#"{"price":187.5}"#),
    ]);
    let client = ApiClient::new(&server.base_url, Some("secret".to_string())).unwrap();
    let dispatcher = Dispatcher::builder(client)
        .retry(RetryPolicy::up_to(1))
        .validate_response(|response| response.is_success())
        .build();

    let response = dispatcher
        .send(RequestParams::get("quotes/AAPL").query("range", "1d"))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["price"], 187.5);

    let captured = server.join();
    assert_eq!(captured.len(), 2);
    for raw in &captured {
        assert_eq!(request_line(raw), "GET /quotes/AAPL?range=1d HTTP/1.1");
        assert!(raw.to_lowercase().contains("authorization: bearer secret"));
    }
}

#[tokio::test]
async fn json_bodies_are_sent_with_content_type() {
    let server = MockHttpServer::start(vec![Reply::Status(201, r#"{"id":9}"#.to_string())]);
    let client = ApiClient::new(&server.base_url, None).unwrap().default_header(
        HeaderName::from_static("x-client"),
        HeaderValue::from_static("lib_request"),
    );
    let dispatcher = Dispatcher::builder(client).build();

    let response = dispatcher
        .send(RequestParams::post(
            "orders",
            serde_json::json!({"sku": "A-1", "qty": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let captured = server.join();
    let raw = &captured[0];
    let lowered = raw.to_lowercase();
    assert_eq!(request_line(raw), "POST /orders HTTP/1.1");
    assert!(lowered.contains("content-type: application/json"));
    assert!(lowered.contains("x-client: lib_request"));
    assert!(!lowered.contains("authorization:"));
    assert!(raw.contains(r#""sku":"A-1""#));
    assert!(raw.contains(r#""qty":2"#));
}

#[tokio::test]
async fn error_statuses_pass_through_without_a_validator() {
    let server = MockHttpServer::start(vec![Reply::Status(404, r#"{"error":"missing"}"#.to_string())]);
    let client = ApiClient::new(&server.base_url, None).unwrap();
    let dispatcher = Dispatcher::builder(client).retry(RetryPolicy::up_to(3)).build();

    let response = dispatcher.send(RequestParams::get("nothing-here")).await.unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(server.join().len(), 1);
}

#[tokio::test]
async fn slow_server_surfaces_a_timeout() {
    let server = MockHttpServer::start(vec![Reply::Stall(Duration::from_millis(1000))]);
    let client = ApiClient::new(&server.base_url, None).unwrap();
    let dispatcher = Dispatcher::builder(client).build();

    let err = dispatcher
        .execute_direct(RequestParams::get("slow").timeout(Duration::from_millis(200)))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout), "unexpected {err:?}");
    server.join();
}

#[tokio::test]
async fn refused_connection_is_a_request_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = ApiClient::new(&format!("http://127.0.0.1:{port}/"), None).unwrap();
    let dispatcher = Dispatcher::builder(client).build();

    let err = dispatcher.send(RequestParams::get("anything")).await.unwrap_err();

    assert!(
        matches!(err, DispatchError::Transport(TransportError::Request(_))),
        "unexpected {err:?}"
    );
}

#[tokio::test]
async fn client_and_dispatcher_follow_the_loaded_config() {
    let server = MockHttpServer::start(vec![
        Reply::Status(500, "{}".to_string()),
        Reply::Status(500, "{}".to_string()),
        ok("{}"),
    ]);
    let config = DispatchConfig::defaults().merge(DispatchConfig {
        retry: Some(true),
        max_retry: Some(2),
        base_url: Some(server.base_url.clone()),
        timeout_ms: Some(2000),
        auth_token: Some("cfg-token".to_string()),
    });

    let client = ApiClient::from_config(&config).unwrap();
    let dispatcher = Dispatcher::builder(client)
        .with_config(&config)
        .validate_response(|response| response.is_success())
        .build();
    assert_eq!(dispatcher.retry_policy(), RetryPolicy::up_to(2));

    let response = dispatcher.send(RequestParams::get("health")).await.unwrap();
    assert_eq!(response.status, 200);

    let captured = server.join();
    assert_eq!(captured.len(), 3);
    assert!(captured
        .iter()
        .all(|raw| raw.to_lowercase().contains("authorization: bearer cfg-token")));
}
