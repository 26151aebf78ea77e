//! Command endpoint.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use serde_json::Value;

use marketplace_core::SessionToken;
use marketplace_core::protocol::{CommandCode, Request, Response, Status};

use crate::error::{AppError, status_for};
use crate::state::AppState;

/// Run one command.
///
/// An empty body means "no payload".
pub async fn run(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let command = match code.parse::<CommandCode>() {
        Ok(command) => command,
        Err(e) => return AppError::MalformedFrame(e.to_string()).into_response(),
    };
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                return AppError::MalformedFrame(format!("invalid JSON body: {e}")).into_response();
            }
        }
    };

    let request = Request {
        token: bearer_token(&headers),
        command,
        payload,
    };
    let dispatched = state.dispatcher().dispatch(request).await;
    let response = dispatched.response;
    (http_status(&response), Json(response)).into_response()
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<SessionToken> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(SessionToken::from)
}

fn http_status(response: &Response) -> StatusCode {
    match (response.status, response.error) {
        (Status::Ok | Status::Warning, _) => StatusCode::OK,
        (Status::Timeout, _) => StatusCode::UNAUTHORIZED,
        (Status::Error, Some(kind)) => status_for(kind),
        (Status::Error, None) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use marketplace_core::protocol::ErrorKind;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).unwrap().as_str(), "abc123");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_none());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(http_status(&Response::done("ok")), StatusCode::OK);
        assert_eq!(
            http_status(&Response::timeout("gone")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            http_status(&Response::error(ErrorKind::InsufficientStock, "no")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            http_status(&Response::error(ErrorKind::Forbidden, "no")),
            StatusCode::FORBIDDEN
        );
    }
}
