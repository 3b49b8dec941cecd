//! Layout selection HTTP server.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP port (default: 8080)
//! - `LAYOUT_CONFIG`: selector config YAML; without it `LAYOUT_DEFAULT_KEY` must be set
//! - `LAYOUT_CATALOG`: seed catalog YAML (rules, layouts, components, traits, features)
//! - `LAYOUT_DEFAULT_KEY`, `LAYOUT_CACHE_TTL_SECS`, `LAYOUT_EVAL_BUDGET_MS`: config overrides
//! - `RUST_LOG`: tracing filter (default: "info,adaptive_layout=debug")
//!
//! # Usage
//!
//! ```bash
//! LAYOUT_CONFIG=layout.yaml LAYOUT_CATALOG=catalog.yaml cargo run --bin server
//! ```

use anyhow::Context;

use adaptive_layout::server::{app_router, AppState};
use adaptive_layout::{Catalog, LayoutCache, SelectorConfig};

fn load_config() -> anyhow::Result<SelectorConfig> {
    let mut config = match std::env::var("LAYOUT_CONFIG") {
        Ok(path) => SelectorConfig::from_yaml_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => SelectorConfig::new(String::new()),
    };
    config.apply_env_overrides()?;
    config.validate().context("invalid selector configuration")?;
    Ok(config)
}

fn load_catalog() -> anyhow::Result<Catalog> {
    match std::env::var("LAYOUT_CATALOG") {
        Ok(path) => Catalog::from_yaml_file(&path).with_context(|| format!("failed to load catalog from {}", path)),
        Err(_) => {
            tracing::warn!("LAYOUT_CATALOG not set, starting with an empty catalog");
            Ok(Catalog::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,adaptive_layout=debug".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let config = load_config()?;
    let catalog = load_catalog()?;
    for (rule_id, layout_key) in catalog.dangling_references() {
        tracing::warn!("rule {} references undefined layout {}", rule_id, layout_key);
    }

    let sweep_interval = config.sweep_interval();
    let state = AppState::in_memory(config, &catalog)?;

    // Missing fallback layouts are a startup failure, not a request-time one.
    state
        .selector
        .verify_defaults()
        .await
        .context("default layout check failed")?;

    if let Some(period) = sweep_interval {
        let cache = state.selector.cache().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!("swept {} expired layout cache entries", purged);
                }
            }
        });
    }

    let app = app_router(state);

    tracing::info!("adaptive-layout server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                  liveness probe");
    tracing::info!("  GET  /layouts/:user_id/:area  layout selection");
    tracing::info!("  POST /hooks/...               cache invalidation hooks");
    tracing::info!("  GET  /performance             performance report");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
