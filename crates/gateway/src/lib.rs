//! HTTP API for chatmap: session control, QR pairing and media retrieval.

pub mod error;
pub mod qr;
pub mod server;
pub mod state;

pub use {
    error::ApiError,
    server::{build_app, start_gateway},
    state::AppState,
};
