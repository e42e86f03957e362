//! `getBlob` client for PDS origins.

use std::io::{self, Read};
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use ureq::Agent;
use ureq::http::header::CONTENT_LENGTH;

use crate::{BlobFetcher, FetchContext, FetchError};

/// Source size cap used when none is configured (10 MiB).
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 10 * 1024 * 1024;

/// Bytes of a 400 response body inspected for an XRPC error envelope.
const ERROR_BODY_LIMIT: u64 = 1024;

const USER_AGENT: &str = concat!("ipx/", env!("CARGO_PKG_VERSION"), " (image proxy)");

/// RFC 3986 unreserved characters stay literal in query values.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// XRPC error body, e.g. `{"error":"InvalidRequest","message":"Blob not found"}`.
#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    message: String,
}

/// [`BlobFetcher`] talking to PDS servers over HTTP(S).
///
/// The agent is shared by all requests. Each fetch runs the blocking client
/// on tokio's blocking pool and races it against the request context; an
/// abandoned request finishes in the background within the agent timeout.
#[derive(Debug, Clone)]
pub struct PdsFetcher {
    agent: Agent,
    timeout: Option<Duration>,
    max_source_bytes: u64,
}

impl PdsFetcher {
    /// Create a fetcher.
    ///
    /// `timeout` bounds each origin request; zero means no client-side limit
    /// beyond the request context. `max_source_bytes` of `0` selects
    /// [`DEFAULT_MAX_SOURCE_BYTES`].
    #[must_use]
    pub fn new(timeout: Duration, max_source_bytes: u64) -> Self {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let max_source_bytes = if max_source_bytes == 0 {
            DEFAULT_MAX_SOURCE_BYTES
        } else {
            max_source_bytes
        };

        let agent = Agent::config_builder()
            .timeout_global(timeout)
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            timeout,
            max_source_bytes,
        }
    }

    /// Maximum accepted blob size in bytes.
    #[must_use]
    pub fn max_source_bytes(&self) -> u64 {
        self.max_source_bytes
    }

    /// Effective timeout for one request: the tighter of the configured
    /// timeout and the time left on the context.
    fn request_timeout(&self, ctx: &FetchContext) -> Option<Duration> {
        match (ctx.remaining(), self.timeout) {
            (Some(remaining), Some(timeout)) => Some(remaining.min(timeout)),
            (Some(remaining), None) => Some(remaining),
            (None, timeout) => timeout,
        }
    }
}

#[async_trait]
impl BlobFetcher for PdsFetcher {
    async fn fetch(
        &self,
        ctx: &FetchContext,
        origin: &str,
        did: &str,
        cid: &str,
    ) -> Result<Vec<u8>, FetchError> {
        if ctx.is_done() {
            return Err(FetchError::Timeout);
        }

        let url = blob_url(origin, did, cid);
        let timeout = self.request_timeout(ctx);
        let agent = self.agent.clone();
        let max_source_bytes = self.max_source_bytes;

        tracing::debug!(%url, "fetching blob from PDS");
        let task =
            tokio::task::spawn_blocking(move || fetch_blocking(&agent, &url, timeout, max_source_bytes));

        tokio::select! {
            () = ctx.done() => {
                tracing::debug!(did, cid, "blob fetch cancelled");
                Err(FetchError::Timeout)
            }
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(FetchError::FetchFailed(format!("fetch task failed: {e}"))),
            },
        }
    }
}

/// `{origin}/xrpc/com.atproto.sync.getBlob?did=..&cid=..` with encoded values.
fn blob_url(origin: &str, did: &str, cid: &str) -> String {
    format!(
        "{}/xrpc/com.atproto.sync.getBlob?did={}&cid={}",
        origin.trim_end_matches('/'),
        utf8_percent_encode(did, QUERY_ENCODE_SET),
        utf8_percent_encode(cid, QUERY_ENCODE_SET),
    )
}

fn fetch_blocking(
    agent: &Agent,
    url: &str,
    timeout: Option<Duration>,
    max_source_bytes: u64,
) -> Result<Vec<u8>, FetchError> {
    let response = agent
        .get(url)
        .header("User-Agent", USER_AGENT)
        .config()
        .timeout_global(timeout)
        .build()
        .call()
        .map_err(classify_transport_error)?;

    let status = response.status().as_u16();
    match status {
        200 => {}
        404 => return Err(FetchError::NotFound),
        400 => return Err(classify_bad_request(response.into_body())),
        _ => {
            return Err(FetchError::FetchFailed(format!(
                "unexpected status code: {status}"
            )));
        }
    }

    let declared_len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared_len
        && len > max_source_bytes
    {
        return Err(FetchError::ImageTooLarge {
            limit: max_source_bytes,
        });
    }

    // One byte past the limit is enough to detect an oversized body
    let mut data = Vec::new();
    response
        .into_body()
        .into_reader()
        .take(max_source_bytes + 1)
        .read_to_end(&mut data)
        .map_err(classify_io_error)?;

    if data.len() as u64 > max_source_bytes {
        return Err(FetchError::ImageTooLarge {
            limit: max_source_bytes,
        });
    }
    Ok(data)
}

/// Map a 400 response to `NotFound` when the XRPC envelope says the blob is
/// missing.
fn classify_bad_request(body: ureq::Body) -> FetchError {
    let mut buf = Vec::new();
    let read = body
        .into_reader()
        .take(ERROR_BODY_LIMIT)
        .read_to_end(&mut buf);

    if read.is_ok()
        && let Ok(envelope) = serde_json::from_slice::<XrpcError>(&buf)
        && envelope.message.to_lowercase().contains("blob not found")
    {
        return FetchError::NotFound;
    }
    FetchError::FetchFailed("bad request from PDS".to_owned())
}

fn classify_transport_error(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Timeout(_) => FetchError::Timeout,
        ureq::Error::Io(e) => classify_io_error(e),
        other => FetchError::FetchFailed(other.to_string()),
    }
}

fn classify_io_error(err: io::Error) -> FetchError {
    let inner_timeout = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ureq::Error>())
        .is_some_and(|inner| matches!(inner, ureq::Error::Timeout(_)));

    if err.kind() == io::ErrorKind::TimedOut || inner_timeout {
        FetchError::Timeout
    } else {
        FetchError::FetchFailed(err.to_string())
    }
}
