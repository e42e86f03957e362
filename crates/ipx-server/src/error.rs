//! Error types for the HTTP server.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use ipx_core::ValidationError;
use ipx_proxy::ProxyError;

use crate::resolver::ResolveError;

/// Server error type.
///
/// Responses are plain text; the client expects image bytes, not JSON.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ServerError {
    /// DID could not be mapped to a PDS.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Image pipeline failure.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Resolve(_) => StatusCode::BAD_GATEWAY,
            Self::Proxy(e) => {
                StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::Resolve(ResolveError::NoPdsEndpoint) => "no PDS endpoint found",
            Self::Resolve(_) => "failed to resolve DID",
            Self::Proxy(e) => e.public_message(),
        }
    }
}

impl From<ValidationError> for ServerError {
    fn from(err: ValidationError) -> Self {
        Self::Proxy(err.into())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(status = status.as_u16(), error = %self, "image request failed");
        } else if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "upstream failure");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "image request rejected");
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipx_fetch::FetchError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_and_message() {
        let cases: Vec<(ServerError, StatusCode, &str)> = vec![
            (
                ValidationError::EmptyParameter.into(),
                StatusCode::BAD_REQUEST,
                "missing required parameters",
            ),
            (
                ValidationError::InvalidDid.into(),
                StatusCode::BAD_REQUEST,
                "invalid DID format",
            ),
            (
                ResolveError::ResolutionFailed("dns".to_owned()).into(),
                StatusCode::BAD_GATEWAY,
                "failed to resolve DID",
            ),
            (
                ResolveError::NoPdsEndpoint.into(),
                StatusCode::BAD_GATEWAY,
                "no PDS endpoint found",
            ),
            (
                ProxyError::from(FetchError::Timeout).into(),
                StatusCode::GATEWAY_TIMEOUT,
                "request timed out",
            ),
            (
                ProxyError::Internal("join".to_owned()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
            ),
        ];

        for (err, status, message) in cases {
            assert_eq!(err.status(), status, "status for {err:?}");
            assert_eq!(err.message(), message, "message for {err:?}");
        }
    }

    #[test]
    fn test_into_response_is_plain_text() {
        let response = ServerError::from(ValidationError::InvalidCid).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
