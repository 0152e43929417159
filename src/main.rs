use anyhow::Result;
use explore_llm::{Config, Operations, http::start_http_server, init_tracing};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging comes up before config so a missing credential is reported
    init_tracing("explore_llm=info,tower_http=info");

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Refusing to start: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Starting explore-llm {} (model {})",
        env!("CARGO_PKG_VERSION"),
        config.completion.model
    );

    let operations = Arc::new(Operations::from_config(&config)?);
    start_http_server(Arc::new(config), operations).await?;

    Ok(())
}
