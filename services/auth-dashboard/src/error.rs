//! HTTP error responses
//!
//! Every handler failure becomes a JSON body `{"error": "..."}`. Library
//! errors map to a status by variant: caller-fixable problems are 400,
//! provider and network failures are 502, local write failures are 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid connector name: {0}")]
    InvalidConnector(String),

    #[error("{0} is not OAuth-capable or has no client id configured")]
    OAuthUnavailable(String),

    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid or expired OAuth state")]
    InvalidState,

    #[error(transparent)]
    Auth(#[from] connector_auth::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use connector_auth::Error as AuthError;

        match self {
            ApiError::InvalidConnector(_)
            | ApiError::OAuthUnavailable(_)
            | ApiError::AuthorizationDenied(_)
            | ApiError::MissingParameter(_)
            | ApiError::InvalidState => StatusCode::BAD_REQUEST,
            ApiError::Auth(e) => match e {
                AuthError::Configuration(_)
                | AuthError::MissingRefreshToken(_)
                | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AuthError::Provider { .. } | AuthError::Transport(_) => StatusCode::BAD_GATEWAY,
                AuthError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": self.to_string() }).to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connector_auth::Error as AuthError;

    #[test]
    fn library_errors_map_by_variant() {
        let cases = [
            (AuthError::Configuration("x".into()), StatusCode::BAD_REQUEST),
            (AuthError::MissingRefreshToken("acme".into()), StatusCode::BAD_REQUEST),
            (AuthError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                AuthError::Provider {
                    status: 400,
                    description: "invalid_grant".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (AuthError::Transport("timed out".into()), StatusCode::BAD_GATEWAY),
            (AuthError::Io("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn response_body_carries_message() {
        let response = ApiError::InvalidState.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "invalid or expired OAuth state");
    }
}
