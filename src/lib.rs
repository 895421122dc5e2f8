//! Proxy Vet - proxy collector and anonymity validator
//!
//! Collects candidate proxies from several sources into a deduplicated
//! registry, then checks each one concurrently against an IP-echo endpoint
//! to tell anonymizing proxies from transparent and dead ones.

pub mod config;
pub mod error;
pub mod proxy;

pub use config::Settings;
pub use error::{Error, Result};
pub use proxy::*;

/// Initialize the tracing subscriber, writing to stderr
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` when verbose.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
