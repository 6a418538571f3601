//! Router assembly and the HTTP listener.

use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use oxidp_auth::http::OpState;

use crate::bootstrap::Runtime;

/// Health endpoint.
async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Assembles the full application router: the provider surface plus
/// operational endpoints and the tower layers.
#[must_use]
pub fn app_router(state: OpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(oxidp_auth::http::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
}

/// Binds and serves until shutdown.
///
/// # Errors
///
/// Bind and serve failures.
pub async fn serve(bind: &str, runtime: Runtime) -> anyhow::Result<()> {
    let router = app_router(runtime.state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
