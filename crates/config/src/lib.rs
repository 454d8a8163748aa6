//! Connector configuration: schema, file discovery and `${ENV}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        ChatmapConfig, ENC_KEY_ENV, EncryptionConfig, LogStoreConfig, ServerConfig,
        SessionsConfig,
    },
};
