//! Core types for the ipx image proxy.
//!
//! This crate holds the pieces every other crate agrees on:
//!
//! - [`Preset`] / [`PresetRegistry`]: named transformation profiles
//! - [`validate_did`], [`validate_cid`], [`validate_preset`]: syntactic checks
//!   that run before any I/O
//! - [`sanitize_path_component`]: projection of a key part onto a safe
//!   filesystem path component
//!
//! # Example
//!
//! ```
//! use ipx_core::{FitMode, PresetRegistry};
//!
//! let registry = PresetRegistry::builtin();
//! let avatar = registry.get("avatar").unwrap();
//! assert_eq!(avatar.fit, FitMode::Cover);
//! ```

mod error;
mod preset;
mod validate;

pub use error::ValidationError;
pub use preset::{FitMode, Preset, PresetRegistry};
pub use validate::{sanitize_path_component, validate_cid, validate_did, validate_preset};
