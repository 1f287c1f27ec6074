//! Configuration for folio.
//!
//! Settings come from `folio.toml` in the platform config directory (or an
//! explicit path), then `FOLIO_*` environment variables on top.

pub mod loader;
pub mod schema;

pub use {
    loader::{
        ENV_API_URL, ENV_REALTIME_URL, apply_env_overrides, default_config_path,
        default_storage_path, load_config,
    },
    schema::FolioConfig,
};
