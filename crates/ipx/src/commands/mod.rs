//! CLI command implementations.

pub(crate) mod cache;
pub(crate) mod presets;
pub(crate) mod serve;

pub(crate) use cache::CacheCommand;
pub(crate) use presets::PresetsArgs;
pub(crate) use serve::ServeArgs;
