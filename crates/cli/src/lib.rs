//! Marketplace client.
//!
//! [`MarketClient`] owns one framed TCP connection to the server and the
//! session token for it. Logging in stores the token; logging out, deleting
//! the account or receiving a `timeout` response clears it.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut client = MarketClient::connect("127.0.0.1:50000").await?;
//! client.login(Role::Buyer, &Credentials { username, password }).await?;
//! let cart = client.send(CommandCode::ViewCart, Value::Null).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use marketplace_core::codec::{CodecError, MalformedFrame, MessageCodec};
use marketplace_core::protocol::{CommandCode, Credentials, LoginGranted, Request, Response, Status};
use marketplace_core::{Role, SessionToken};

type ClientCodec = MessageCodec<Response, Request>;

/// Errors talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("server sent an unreadable response: {0}")]
    Malformed(#[from] MalformedFrame),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("server closed the connection")]
    Closed,
}

/// One connection to the marketplace server.
pub struct MarketClient {
    framed: Framed<TcpStream, ClientCodec>,
    token: Option<SessionToken>,
}

impl MarketClient {
    /// Connect without a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be opened.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::new()),
            token: None,
        })
    }

    /// Reuse a token obtained by an earlier login.
    #[must_use]
    pub fn with_token(mut self, token: Option<SessionToken>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Current session token, if any.
    #[must_use]
    pub const fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    /// Send one command and wait for its response.
    ///
    /// Idle warnings that arrive first are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server hangs up.
    pub async fn send(&mut self, command: CommandCode, payload: Value) -> Result<Response, ClientError> {
        let request = Request {
            token: self.token.clone(),
            command,
            payload,
        };
        self.framed.send(request).await?;

        loop {
            let response = self.framed.next().await.ok_or(ClientError::Closed)???;
            if response.status == Status::Warning {
                tracing::warn!(message = %response.message, "Server warning");
                continue;
            }
            self.track_session(command, &response)?;
            return Ok(response);
        }
    }

    /// Send one command with a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the exchange fails.
    pub async fn call<T: Serialize + Sync>(
        &mut self,
        command: CommandCode,
        payload: &T,
    ) -> Result<Response, ClientError> {
        let payload = serde_json::to_value(payload)?;
        self.send(command, payload).await
    }

    /// Log in as a buyer or seller and keep the issued token.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange fails.
    pub async fn login(&mut self, role: Role, credentials: &Credentials) -> Result<Response, ClientError> {
        let command = match role {
            Role::Buyer => CommandCode::BuyerLogin,
            Role::Seller => CommandCode::SellerLogin,
        };
        self.call(command, credentials).await
    }

    /// Wait for the next message the server pushes without a request.
    ///
    /// Returns `None` once the server has closed the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or the frame cannot be read.
    pub async fn next_unsolicited(&mut self) -> Result<Option<Response>, ClientError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(frame) => {
                let response = frame??;
                if response.status == Status::Timeout {
                    self.token = None;
                }
                Ok(Some(response))
            }
        }
    }

    fn track_session(&mut self, command: CommandCode, response: &Response) -> Result<(), ClientError> {
        match response.status {
            Status::Timeout => self.token = None,
            Status::Ok => match command {
                CommandCode::BuyerLogin | CommandCode::SellerLogin => {
                    let granted: LoginGranted = response.payload_as()?;
                    self.token = Some(granted.token);
                }
                CommandCode::BuyerLogout
                | CommandCode::SellerLogout
                | CommandCode::DeleteBuyer
                | CommandCode::DeleteSeller => self.token = None,
                _ => {}
            },
            Status::Error | Status::Warning => {}
        }
        Ok(())
    }
}
