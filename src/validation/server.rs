use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::capability::AnalysisCapability;
use super::db::{DbHandle, ValidationDb};
use crate::config::AppConfig;

/// Build the application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Open the database, wire the orchestrator and serve until Ctrl+C.
pub async fn start_server(config: AppConfig, capability: Arc<dyn AnalysisCapability>) -> Result<()> {
    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir.join("runs"))
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    let db = ValidationDb::new(&config.server.db_path())
        .context("Failed to initialize validation database")?;
    let state = Arc::new(AppState::new(&config, DbHandle::new(db), capability)?);
    let provider = state.executor.capability_name();
    let app = build_router(state, config.server.dev_mode);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, provider, dev_mode = config.server.dev_mode, "Server listening");
    println!("Gap Foundry running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::capability::ScriptedCapability;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = DbHandle::new(ValidationDb::new_in_memory().unwrap());
        let state = AppState::new(&AppConfig::default(), db, Arc::new(ScriptedCapability::new())).unwrap();
        build_router(Arc::new(state), dev_mode)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let resp = test_router(false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let resp = test_router(false)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dev_mode_allows_cors() {
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = test_router(true).oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
