//! Gateway client failsafes: status classification, bounded retry and
//! cancellation.

mod common;

use std::time::Duration;

use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::TestEnv;
use fabric_runtime::gateway::{ApiRequest, GatewayClient};
use fabric_runtime::{Error, ErrorKind};

fn client(env: &TestEnv) -> GatewayClient {
    GatewayClient::new(&env.server.base_url(), &env.config().http).unwrap()
}

#[tokio::test]
async fn server_errors_are_retried_up_to_the_budget() {
    let env = TestEnv::new();
    let failing = env.server.mock(|when, then| {
        when.method(GET).path("/api/v1/flaky");
        then.status(503).json_body(json!({"detail": "warming up"}));
    });

    let err = client(&env)
        .send(&ApiRequest::get("/api/v1/flaky"), None)
        .await
        .unwrap_err();

    // one attempt plus two retries
    failing.assert_calls(3);
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.to_string().contains("warming up"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let env = TestEnv::new();
    let cases = [
        (400, ErrorKind::Validation),
        (401, ErrorKind::Authentication),
        (403, ErrorKind::Authorization),
        (404, ErrorKind::NotFound),
        (409, ErrorKind::Validation),
    ];

    for (status, kind) in cases {
        let path = format!("/status/{status}");
        let mut mock = env.server.mock(|when, then| {
            when.path(path.as_str());
            then.status(status);
        });
        let err = client(&env)
            .send(&ApiRequest::post(path.as_str()), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), kind, "status {status}");
        mock.assert_calls(1);
        mock.delete();
    }
}

#[tokio::test]
async fn rate_limit_and_request_timeout_are_not_retried() {
    let env = TestEnv::new();

    for status in [408, 429] {
        let path = format!("/busy/{status}");
        let busy = env.server.mock(|when, then| {
            when.path(path.as_str());
            then.status(status).json_body(json!({"detail": "slow down"}));
        });

        let err = client(&env)
            .send(&ApiRequest::get(path.as_str()), None)
            .await
            .unwrap_err();
        assert!(!err.is_retryable(), "status {status}");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains(&format!("HTTP {status}")));
        busy.assert_calls(1);
    }
}

#[tokio::test]
async fn single_use_requests_are_sent_once() {
    let env = TestEnv::new();
    let once = env.server.mock(|when, then| {
        when.method(POST).path("/exchange");
        then.status(502);
    });

    let err = client(&env)
        .send(&ApiRequest::post("/exchange").no_retry(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    once.assert_calls(1);
}

#[tokio::test]
async fn entity_name_is_reported_in_errors() {
    let env = TestEnv::new();
    env.server.mock(|when, then| {
        when.path("/api/v1/secrets/db");
        then.status(404).json_body(json!({"detail": "Secret not found"}));
    });

    let err = client(&env)
        .send(&ApiRequest::get("/api/v1/secrets/db").entity("db"), None)
        .await
        .unwrap_err();
    match err {
        Error::NotFound { entity, message } => {
            assert_eq!(entity, "db");
            assert_eq!(message, "Secret not found");
        }
        other => panic!("expected not found, got {other:?}"),
    }
}

#[tokio::test]
async fn successful_response_is_decoded() {
    let env = TestEnv::new();
    env.server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/things")
            .query_param("page", "2")
            .header("authorization", "Bearer abc");
        then.status(200).json_body(json!({"items": [1, 2, 3]}));
    });
    env.server.mock(|when, then| {
        when.method(DELETE).path("/api/v1/things/1");
        then.status(204);
    });

    let http = client(&env);
    let request = ApiRequest::get("/api/v1/things").query("page", "2").bearer("abc");
    let body: serde_json::Value = http.json(&request, None).await.unwrap();
    assert_eq!(body["items"], json!([1, 2, 3]));

    let deleted = http
        .send(&ApiRequest::delete("/api/v1/things/1"), None)
        .await
        .unwrap();
    assert_eq!(deleted.status.as_u16(), 204);
    assert!(deleted.body.is_null());
}

#[tokio::test]
async fn unreachable_gateway_is_transient() {
    let env = TestEnv::new();
    // nothing listens on the discard port
    let http = GatewayClient::new("http://127.0.0.1:9", &env.config().http).unwrap();

    let err = http
        .send(&ApiRequest::get("/api/v1/health"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_request() {
    let env = TestEnv::new();
    env.server.mock(|when, then| {
        when.path("/slow");
        then.status(200).delay(Duration::from_secs(3)).json_body(json!({}));
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = client(&env)
        .send(&ApiRequest::get("/slow"), Some(&cancel))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn exit_codes_follow_error_kind() {
    assert_eq!(Error::validation("x", "bad").exit_code(), 2);
    assert_eq!(Error::Authentication("expired".into()).exit_code(), 3);
    assert_eq!(Error::not_found("x", "gone").exit_code(), 4);
    assert_eq!(Error::Cancelled("ctrl-c".into()).exit_code(), 130);
}
