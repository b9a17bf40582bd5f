//! HTTP API: Axum server exposing queries, on-demand refreshes and health.
//!
//! CORS is open to any origin for GET and POST.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::engine::Core;

pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/cities", get(routes::get_cities))
        .route("/cities/forecast", get(routes::get_forecast))
        .route("/snapshot", post(routes::post_snapshot))
        .route("/snapshot/forecast", post(routes::post_forecast_snapshot))
        .route("/locations", get(routes::get_locations))
        .route("/health", get(routes::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `port` until `shutdown` resolves, then drain in-flight
/// requests.
pub async fn serve<F>(state: AppState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")
}

/// A running API server task and the switch that stops it.
pub struct ServerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn spawn(state: AppState, port: u16) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let shutdown = async move {
            let _ = stopped.wait_for(|stop| *stop).await;
        };
        let task = tokio::spawn(serve(state, port, shutdown));
        Self { stop, task }
    }

    /// Ask the server to stop accepting and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        log_server_exit(self.task.await);
    }
}

/// Run until `signal` resolves or the server exits on its own, then stop
/// the server (if any) and shut the core down in order.
pub async fn run_until<S>(core: Core, server: Option<ServerHandle>, signal: S)
where
    S: Future<Output = ()>,
{
    match server {
        Some(mut server) => {
            let exited = tokio::select! {
                _ = signal => None,
                res = &mut server.task => Some(res),
            };
            match exited {
                None => server.shutdown().await,
                Some(res) => log_server_exit(res),
            }
        }
        None => signal.await,
    }

    core.shutdown().await;
}

fn log_server_exit(res: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => info!("API server stopped"),
        Ok(Err(e)) => error!(error = %e, "API server stopped with error"),
        Err(e) => error!(error = %e, "API server task failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
