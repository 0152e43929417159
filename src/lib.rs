pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod normalize;
pub mod operations;
pub mod prompts;
pub mod utils;

pub use config::Config;
pub use error::{ExploreError, Result};
pub use normalize::{DecomposeResult, OptionsResult, SummaryResult};
pub use operations::{DecomposeRequest, Operation, Operations, OptionsRequest, SummaryRequest};

/// Install the global tracing subscriber using `filter` unless RUST_LOG overrides it.
pub fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
