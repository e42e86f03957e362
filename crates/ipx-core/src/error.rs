//! Validation error type.

/// Rejection of user-supplied request input.
///
/// All variants are client errors: they are raised before any network or
/// disk I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Preset name is empty, unsafe, or not in the registry.
    #[error("invalid image preset")]
    InvalidPreset,

    /// DID is unsafe or does not match the DID grammar.
    #[error("invalid DID format")]
    InvalidDid,

    /// CID is unsafe or does not match the CID grammar.
    #[error("invalid CID format")]
    InvalidCid,

    /// A required key component is empty.
    #[error("required parameter is empty")]
    EmptyParameter,
}
