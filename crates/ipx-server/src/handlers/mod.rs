//! HTTP request handlers.

pub(crate) mod image;
