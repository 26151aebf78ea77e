//! Integration tests for the marketplace server.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p marketplace-integration-tests
//! ```
//!
//! Each test starts its own server on ephemeral ports with the in-memory
//! store, so tests run in parallel without a database.
//!
//! # Test Categories
//!
//! - `wire_protocol` - Framing, session handling and role checks over TCP
//! - `shopping` - Seller listing through buyer checkout and feedback
//! - `http_commands` - Health checks and the HTTP command endpoint

#![allow(clippy::missing_panics_doc)]

use std::net::{Ipv4Addr, SocketAddr};

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use marketplace_cli::MarketClient;
use marketplace_core::protocol::{CommandCode, Credentials, Response, Signup};
use marketplace_core::{ProductId, Role};
use marketplace_server::config::{ServerConfig, SessionConfig, StoreConfig};
use marketplace_server::db::Stores;
use marketplace_server::services::Services;
use marketplace_server::state::AppState;

/// Password used for every test account.
pub const PASSWORD: &str = "password123";

/// A running server; shut down on drop.
pub struct TestServer {
    pub tcp_addr: SocketAddr,
    pub http_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Start a server with default session timing.
    pub async fn start() -> Self {
        Self::with_session(SessionConfig::default()).await
    }

    /// Start a server with custom session timing.
    pub async fn with_session(session: SessionConfig) -> Self {
        let tcp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("Failed to bind wire listener");
        let http = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("Failed to bind HTTP listener");
        let tcp_addr = tcp.local_addr().expect("wire listener address");
        let http_addr = http.local_addr().expect("HTTP listener address");

        let config = ServerConfig {
            host: Ipv4Addr::LOCALHOST.into(),
            tcp_port: tcp_addr.port(),
            http_port: http_addr.port(),
            store: StoreConfig::Memory,
            session,
            sentry_dsn: None,
            sentry_environment: None,
        };
        let state = AppState::new(config, Services::new(Stores::memory(), session));

        let shutdown = CancellationToken::new();
        tokio::spawn(marketplace_server::serve(state, tcp, http, shutdown.clone()));

        Self {
            tcp_addr,
            http_addr,
            shutdown,
        }
    }

    /// Open a new wire protocol connection.
    pub async fn client(&self) -> MarketClient {
        MarketClient::connect(self.tcp_addr)
            .await
            .expect("Failed to connect to wire listener")
    }

    /// Full URL for an HTTP path.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.http_addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Create an account and log the client in.
pub async fn signed_in(server: &TestServer, role: Role, username: &str) -> MarketClient {
    let mut client = server.client().await;
    let create = match role {
        Role::Buyer => CommandCode::CreateBuyer,
        Role::Seller => CommandCode::CreateSeller,
    };
    let signup = Signup {
        name: format!("{username} test"),
        username: username.to_string(),
        password: PASSWORD.to_string(),
    };
    let created = client.call(create, &signup).await.expect("signup exchange");
    assert!(created.is_ok(), "signup failed: {}", created.message);

    let credentials = Credentials {
        username: username.to_string(),
        password: PASSWORD.to_string(),
    };
    let login = client.login(role, &credentials).await.expect("login exchange");
    assert!(login.is_ok(), "login failed: {}", login.message);
    client
}

/// List a product as the signed-in seller and return its ID.
pub async fn list_product(
    seller: &mut MarketClient,
    name: &str,
    price: &str,
    quantity: u32,
) -> ProductId {
    let response = send(
        seller,
        CommandCode::CreateProduct,
        json!({
            "name": name,
            "category": "THREE",
            "keywords": ["mug", "blue"],
            "condition": "NEW",
            "sale_price": price,
            "quantity": quantity,
        }),
    )
    .await;
    assert!(response.is_ok(), "listing failed: {}", response.message);
    let id = response.payload.as_ref().and_then(|p| p["id"].as_str()).expect("product id");
    id.parse().expect("product id is a UUID")
}

/// Send one command, panicking on connection failure.
pub async fn send(client: &mut MarketClient, command: CommandCode, payload: Value) -> Response {
    client
        .send(command, payload)
        .await
        .expect("wire exchange failed")
}

/// Checkout payload with a valid card.
pub fn card() -> Value {
    json!({
        "name": "Test Buyer",
        "card_number": "4111 1111 1111 1111",
        "expiry": "12/30",
    })
}
