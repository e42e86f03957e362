//! DID to PDS endpoint resolution.
//!
//! `did:plc` documents come from the PLC directory, `did:web` documents from
//! the host's `/.well-known/did.json` (or `/{path}/did.json` for path-based
//! identifiers).

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use ureq::Agent;

/// Service type of the PDS entry in a DID document.
const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";

const USER_AGENT: &str = concat!("ipx/", env!("CARGO_PKG_VERSION"), " (image proxy)");

/// DID resolution error.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Document lookup failed or returned garbage.
    #[error("DID resolution failed: {0}")]
    ResolutionFailed(String),

    /// Document has no usable `AtprotoPersonalDataServer` service.
    #[error("DID document has no PDS endpoint")]
    NoPdsEndpoint,
}

/// Maps a DID to the base URL of its PDS.
#[async_trait]
pub trait DidResolver: Send + Sync {
    /// Return the PDS endpoint for `did`.
    async fn resolve_pds(&self, did: &str) -> Result<String, ResolveError>;
}

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
struct DidService {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(rename = "serviceEndpoint", default)]
    endpoint: serde_json::Value,
}

impl DidDocument {
    fn pds_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .filter(|s| s.kind == PDS_SERVICE_TYPE)
            .filter_map(|s| s.endpoint.as_str())
            .find(|endpoint| !endpoint.is_empty())
    }
}

/// [`DidResolver`] over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpDidResolver {
    agent: Agent,
    plc_directory_url: String,
}

impl HttpDidResolver {
    /// Create a resolver using `plc_directory_url` for `did:plc`.
    #[must_use]
    pub fn new(plc_directory_url: &str, timeout: Duration) -> Self {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        let agent = Agent::config_builder()
            .timeout_global(timeout)
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            agent,
            plc_directory_url: plc_directory_url.trim_end_matches('/').to_owned(),
        }
    }

    /// URL of the DID document for `did`.
    fn document_url(&self, did: &str) -> Result<String, ResolveError> {
        if did.starts_with("did:plc:") {
            return Ok(format!("{}/{did}", self.plc_directory_url));
        }

        let Some(id) = did.strip_prefix("did:web:") else {
            return Err(ResolveError::ResolutionFailed(format!(
                "unsupported DID method: {did}"
            )));
        };

        let mut segments = id.split(':').map(|segment| {
            percent_decode_str(segment)
                .decode_utf8()
                .map(|s| s.into_owned())
                .map_err(|e| ResolveError::ResolutionFailed(format!("invalid did:web: {e}")))
        });

        let host = segments.next().transpose()?.unwrap_or_default();
        if host.is_empty() || host.contains('/') {
            return Err(ResolveError::ResolutionFailed(format!(
                "invalid did:web host: {did}"
            )));
        }

        let path = segments.collect::<Result<Vec<_>, _>>()?;
        if path.is_empty() {
            Ok(format!("https://{host}/.well-known/did.json"))
        } else {
            Ok(format!("https://{host}/{}/did.json", path.join("/")))
        }
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve_pds(&self, did: &str) -> Result<String, ResolveError> {
        let url = self.document_url(did)?;
        let agent = self.agent.clone();

        tracing::debug!(did, %url, "resolving DID document");
        let doc = tokio::task::spawn_blocking(move || fetch_document(&agent, &url))
            .await
            .map_err(|e| ResolveError::ResolutionFailed(format!("resolve task failed: {e}")))??;

        doc.pds_endpoint()
            .map(|endpoint| endpoint.trim_end_matches('/').to_owned())
            .ok_or(ResolveError::NoPdsEndpoint)
    }
}

fn fetch_document(agent: &Agent, url: &str) -> Result<DidDocument, ResolveError> {
    let mut response = agent
        .get(url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/did+ld+json, application/json")
        .call()
        .map_err(|e| ResolveError::ResolutionFailed(e.to_string()))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(ResolveError::ResolutionFailed(format!(
            "unexpected status code: {status}"
        )));
    }

    response
        .body_mut()
        .read_json::<DidDocument>()
        .map_err(|e| ResolveError::ResolutionFailed(format!("invalid DID document: {e}")))
}
