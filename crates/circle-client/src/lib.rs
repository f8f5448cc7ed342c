//! # circle-client
//!
//! Application shell for Circle: environment configuration, logging setup
//! and the [`App`] facade tying preferences, storage and the discovery
//! controller together.

pub mod app;
pub mod config;
pub mod error;

use tracing_subscriber::{fmt, EnvFilter};

pub use app::App;
pub use config::ClientConfig;
pub use error::ClientError;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,circle_net=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
