//! Image endpoint.
//!
//! `GET /img/{preset}/plain/{did}/{cid}` returns the transformed blob as JPEG.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use ipx_core::{ValidationError, validate_cid, validate_did, validate_preset};
use ipx_fetch::FetchContext;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::state::AppState;

/// Output is content-addressed, so it never changes for a given URL.
const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Weak identity: stable across re-encodes of the same blob.
fn compute_etag(preset: &str, cid: &str) -> String {
    format!("\"{preset}-{cid}\"")
}

/// Handle GET /img/{preset}/plain/{did}/{cid}.
pub(crate) async fn get_image(
    State(state): State<Arc<AppState>>,
    Path((preset, did, cid)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    if preset.is_empty() || did.is_empty() || cid.is_empty() {
        return Err(ValidationError::EmptyParameter.into());
    }
    validate_preset(&preset, state.service.presets())?;
    validate_did(&did)?;
    validate_cid(&cid)?;

    let etag = compute_etag(&preset, &cid);
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && if_none_match.as_bytes() == etag.as_bytes()
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let origin = state.resolver.resolve_pds(&did).await.inspect_err(|e| {
        tracing::warn!(did, error = %e, "failed to resolve DID");
    })?;

    // Dropping this future (client gone) cancels the fetch
    let token = CancellationToken::new();
    let _cancel_on_drop = token.clone().drop_guard();
    let ctx = FetchContext::with_token(token).timeout(state.fetch_timeout);

    let data = state
        .service
        .get_image(&ctx, &preset, &did, &cid, &origin)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_owned()),
            (header::CACHE_CONTROL, CACHE_CONTROL.to_owned()),
            (header::ETAG, etag),
        ],
        data,
    )
        .into_response())
}
