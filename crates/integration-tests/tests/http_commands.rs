//! HTTP surface tests: health checks and the command endpoint.
//!
//! Run with: cargo test -p marketplace-integration-tests

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use marketplace_core::Role;
use marketplace_integration_tests::{PASSWORD, TestServer, list_product, signed_in};

async fn command(
    client: &Client,
    server: &TestServer,
    code: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = client.post(server.url(&format!("/api/commands/{code}")));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    if let Some(body) = body {
        request = request.json(&body);
    }
    let resp = request.send().await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let server = TestServer::start().await;
    let client = Client::new();

    let resp = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = client.get(server.url("/health/ready")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_signup_login_and_view_cart() {
    let server = TestServer::start().await;
    let client = Client::new();

    let signup = json!({"name": "Ada", "username": "ada", "password": PASSWORD});
    let (status, body) = command(&client, &server, "B0", None, Some(signup)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let login = json!({"username": "ada", "password": PASSWORD});
    let (status, body) = command(&client, &server, "B1", None, Some(login)).await;
    assert_eq!(status, StatusCode::OK);
    let token = body["payload"]["token"].as_str().unwrap().to_string();

    // No cart yet
    let (status, body) = command(&client, &server, "B8", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = command(&client, &server, "B2", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = command(&client, &server, "B8", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_http_and_wire_share_sessions() {
    let server = TestServer::start().await;
    let client = Client::new();
    let mut seller = signed_in(&server, Role::Seller, "potter").await;
    list_product(&mut seller, "Blue mug", "10.00", 3).await;
    let token = seller.token().unwrap().as_str().to_string();

    let (status, body) = command(&client, &server, "S7", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_error_status_codes() {
    let server = TestServer::start().await;
    let client = Client::new();
    let seller = signed_in(&server, Role::Seller, "potter").await;
    let token = seller.token().unwrap().as_str().to_string();

    // Unknown command code
    let (status, body) = command(&client, &server, "X1", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed_frame");

    // Missing token
    let (status, _) = command(&client, &server, "S7", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Seller session on a buyer command
    let (status, body) = command(&client, &server, "B8", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    // Payload of the wrong shape
    let (status, body) = command(&client, &server, "S5", Some(&token), Some(json!({"x": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "malformed_frame");

    // Short password
    let signup = json!({"name": "Bo", "username": "bo", "password": "short"});
    let (status, body) = command(&client, &server, "S0", None, Some(signup)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn test_invalid_json_body() {
    let server = TestServer::start().await;
    let resp = Client::new()
        .post(server.url("/api/commands/B0"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
