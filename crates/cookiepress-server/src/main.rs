use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cookiepress_convert::{Converter, SimpleCookieTool};
use cookiepress_imagen::{ImageGenerator, OpenAiImageClient};
use cookiepress_jobs::JobStore;
use cookiepress_server::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;

    let store = match config.max_jobs {
        Some(max_jobs) => JobStore::bounded(max_jobs),
        None => JobStore::new(),
    };
    let provider = Arc::new(OpenAiImageClient::new(
        config.base_url.clone(),
        config.api_key.clone(),
    ));
    let generator = ImageGenerator::new(provider, config.generated_dir.clone());
    let tool = Arc::new(SimpleCookieTool::new(config.tool_script.clone()));
    let converter = Converter::new(tool, config.output_dir.clone());

    let state = Arc::new(AppState {
        store,
        generator,
        converter,
    });

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "cookiepress server listening");
    axum::serve(listener, cookiepress_server::app(state)).await?;
    Ok(())
}
