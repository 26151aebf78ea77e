//! Wire protocol listener.
//!
//! One task per connection. Each connection splits its socket: the reader
//! decodes frames and dispatches them in order, and a writer task drains a
//! bounded queue of responses onto the socket. A bad frame gets an error
//! response and the loop goes on; only a framing error that loses sync with
//! the stream closes the connection.
//!
//! Connections that stay silent are warned after the idle period and, after
//! a further grace period, have their session revoked and are closed.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, tcp::OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use marketplace_core::SessionToken;
use marketplace_core::codec::{CodecError, MessageCodec};
use marketplace_core::protocol::{ErrorKind, Request, Response};

use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, SessionChange};

/// Responses queued per connection before the reader waits for the writer.
const OUTBOUND_QUEUE: usize = 32;

type ServerCodec = MessageCodec<Request, Response>;

/// Accept connections until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error only if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    timing: SessionConfig,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "Wire protocol listening");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("Wire protocol listener stopping");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = Connection {
                        dispatcher: dispatcher.clone(),
                        timing,
                        shutdown: shutdown.child_token(),
                        peer,
                    };
                    tokio::spawn(connection.run(stream));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// State for one client connection.
struct Connection {
    dispatcher: Dispatcher,
    timing: SessionConfig,
    shutdown: CancellationToken,
    peer: SocketAddr,
}

/// Idle timer state.
enum Idle {
    Active,
    Warned,
}

impl Connection {
    #[tracing::instrument(skip_all, fields(peer = %self.peer))]
    async fn run(self, stream: TcpStream) {
        tracing::debug!("Connection opened");
        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, ServerCodec::new());
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let writer = tokio::spawn(write_responses(
            FramedWrite::new(write_half, ServerCodec::new()),
            rx,
        ));

        // Session last used on this connection; revoked if the client goes idle.
        let mut session: Option<SessionToken> = None;
        let mut idle = Idle::Active;

        loop {
            let wait = match idle {
                Idle::Active => self.timing.idle_warning,
                Idle::Warned => self.timing.idle_grace,
            };
            let next = tokio::select! {
                () = self.shutdown.cancelled() => break,
                next = tokio::time::timeout(wait, frames.next()) => next,
            };

            let response = match next {
                Err(_elapsed) => match idle {
                    Idle::Active => {
                        idle = Idle::Warned;
                        tracing::debug!("Connection idle, warning client");
                        Response::warning(format!(
                            "No activity for {}s; the session ends in {}s",
                            self.timing.idle_warning.as_secs(),
                            self.timing.idle_grace.as_secs()
                        ))
                    }
                    Idle::Warned => {
                        self.expire(session.take()).await;
                        let _ = tx
                            .send(Response::timeout("Session timed out due to inactivity"))
                            .await;
                        break;
                    }
                },
                Ok(None) => break,
                Ok(Some(Ok(frame))) => {
                    idle = Idle::Active;
                    let dispatched = self.dispatcher.dispatch_frame(frame).await;
                    match dispatched.session {
                        SessionChange::Unchanged => {}
                        SessionChange::Active(token) => session = Some(token),
                        SessionChange::Ended => session = None,
                    }
                    dispatched.response
                }
                Ok(Some(Err(err))) => {
                    self.close_on_codec_error(&err, &tx).await;
                    break;
                }
            };

            if tx.send(response).await.is_err() {
                break;
            }
        }

        drop(tx);
        if let Err(e) = writer.await {
            tracing::warn!(error = %e, "Writer task failed");
        }
        tracing::debug!("Connection closed");
    }

    /// Revoke the session an idle client was using.
    async fn expire(&self, session: Option<SessionToken>) {
        let Some(token) = session else {
            return;
        };
        match self.dispatcher.services().sessions.revoke(&token).await {
            Ok(()) => tracing::info!("Idle session revoked"),
            Err(e) => tracing::warn!(error = %e, "Failed to revoke idle session"),
        }
    }

    /// Tell the client why the stream is being dropped, where that is still possible.
    async fn close_on_codec_error(&self, err: &CodecError, tx: &mpsc::Sender<Response>) {
        match err {
            CodecError::Io(e) => {
                tracing::debug!(error = %e, "Connection read failed");
            }
            CodecError::FrameTooLarge { .. } | CodecError::Truncated { .. } => {
                tracing::warn!(error = %err, "Closing desynchronized connection");
                let _ = tx
                    .send(Response::error(ErrorKind::MalformedFrame, err.to_string()))
                    .await;
            }
            CodecError::Encode(_) => {
                tracing::error!(error = %err, "Unexpected encode error on read path");
            }
        }
    }
}

/// Drain queued responses onto the socket until the queue closes.
async fn write_responses(
    mut sink: FramedWrite<OwnedWriteHalf, ServerCodec>,
    mut rx: mpsc::Receiver<Response>,
) {
    while let Some(response) = rx.recv().await {
        if let Err(e) = sink.send(response).await {
            match e {
                CodecError::Encode(_) | CodecError::FrameTooLarge { .. } => {
                    tracing::error!(error = %e, "Response could not be framed");
                    continue;
                }
                _ => {
                    tracing::debug!(error = %e, "Write failed, dropping connection");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::db::Stores;
    use crate::services::Services;
    use marketplace_core::protocol::{CommandCode, Status};
    use tokio::io::AsyncWriteExt;

    async fn start(timing: SessionConfig) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let services = Services::new(Stores::memory(), timing);
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, Dispatcher::new(services), timing, shutdown.clone()));
        (addr, shutdown)
    }

    fn client(stream: TcpStream) -> tokio_util::codec::Framed<TcpStream, MessageCodec<Response, Request>> {
        tokio_util::codec::Framed::new(stream, MessageCodec::new())
    }

    #[tokio::test]
    async fn test_garbage_frame_keeps_connection() {
        let (addr, shutdown) = start(SessionConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let garbage = b"not json";
        let len = u32::try_from(garbage.len()).unwrap();
        stream.write_all(&len.to_be_bytes()).await.unwrap();
        stream.write_all(garbage).await.unwrap();

        let mut framed = client(stream);
        let response = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(response.error, Some(ErrorKind::MalformedFrame));

        framed
            .send(Request::new(CommandCode::ViewCart, None))
            .await
            .unwrap();
        let response = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(response.error, Some(ErrorKind::Unauthorized));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (addr, shutdown) = start(SessionConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let mut framed = client(stream);
        let response = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(response.error, Some(ErrorKind::MalformedFrame));
        assert!(framed.next().await.is_none());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_idle_connection_warned_then_timed_out() {
        let timing = SessionConfig {
            ttl: Duration::from_secs(60),
            idle_warning: Duration::from_millis(50),
            idle_grace: Duration::from_millis(50),
        };
        let (addr, shutdown) = start(timing).await;
        let mut framed = client(TcpStream::connect(addr).await.unwrap());

        let warning = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(warning.status, Status::Warning);
        let timeout = framed.next().await.unwrap().unwrap().unwrap();
        assert_eq!(timeout.status, Status::Timeout);
        assert!(framed.next().await.is_none());

        shutdown.cancel();
    }
}
