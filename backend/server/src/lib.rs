//! HillsGo web server.
//!
//! Marketing pages, shareable product and worker pages, and the four role dashboards
//! (estore, skilled worker, driver, admin) behind a cookie session.
//!
//!
//!
//! # Deep links
//!
//! Product and worker pages are meant to be shared. The first such page a browser opens
//! in a session carries a small script that navigates to `hillsgo://{kind}/{id}` and,
//! if the page is still visible once the threshold passes, falls back to the web page.
//! The session remembers the attempt so later pages render without it.
//!
//! - Delay before falling back: `HANDOFF_DELAY_MS` (1500)
//! - Elapsed time that counts as "the app opened": `HANDOFF_THRESHOLD_MS` (1600)
//! - Leaving the page before the timer fires cancels the fallback
//!
//!
//!
//! # Backends
//!
//! `HILLSGO_BACKEND=firebase` talks to Firestore, Firebase Storage and the Identity
//! Toolkit over REST. `HILLSGO_BACKEND=memory` keeps everything in process, which is what
//! local development and the tests use. Set `DEV_ADMIN_EMAIL` and `DEV_ADMIN_PASSWORD`
//! to get an admin account in memory mode.
//!
//!
//!
//! # Setup
//!
//! Run locally.
//! ```sh
//! RUST_LOG=info DEV_ADMIN_EMAIL=admin@hillsgo.test DEV_ADMIN_PASSWORD=admin cargo run -p hillsgo
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::sync::Arc;

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod dashboards;
pub mod deeplink;
pub mod error;
pub mod roles;
pub mod routes;
pub mod session;
pub mod state;
pub mod utils;
pub mod views;

use dashboards::{
    admin_dashboard_handler, create_product_handler, create_worker_handler,
    delete_product_handler, delete_worker_handler, driver_dashboard_handler,
    estore_dashboard_handler, order_delivered_handler, update_profile_handler,
    worker_dashboard_handler,
};
use error::AppError;
use session::sweep_idle;
use routes::{
    blog_index_handler, blog_post_handler, home_handler, login_form_handler, login_handler,
    logout_handler, product_handler, upload_handler, worker_handler,
};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(state.config.cors_max_age);

    Router::new()
        .route("/", get(home_handler))
        .route("/blog", get(blog_index_handler))
        .route("/blog/{slug}", get(blog_post_handler))
        .route("/products/{id}", get(product_handler))
        .route("/workers/{id}", get(worker_handler))
        .route("/login", get(login_form_handler).post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/estore/dashboard", get(estore_dashboard_handler))
        .route("/estore/products", post(create_product_handler))
        .route("/estore/products/{id}/delete", post(delete_product_handler))
        .route("/skilled-worker/dashboard", get(worker_dashboard_handler))
        .route("/skilled-worker/profile", post(update_profile_handler))
        .route("/driver/dashboard", get(driver_dashboard_handler))
        .route("/driver/orders/{id}/delivered", post(order_delivered_handler))
        .route("/admin/dashboard", get(admin_dashboard_handler))
        .route("/admin/workers", post(create_worker_handler))
        .route("/admin/workers/{id}/delete", post(delete_worker_handler))
        .route("/uploads/{*path}", get(upload_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server() -> Result<(), AppError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await?;

    tokio::spawn(sweep_idle(
        state.sessions.clone(),
        state.auth.clone(),
        state.config.session_sweep_interval,
    ));

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    let app = build_router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    use crate::config::Config;

    #[tokio::test]
    async fn test_cors_preflight_allows_post() {
        let state = AppState::with_backends(
            Config::default(),
            Arc::new(bank::memory::MemoryStore::default()),
            Arc::new(bank::memory::MemoryStorage::default()),
            Arc::new(auth::MemoryAuth::default()),
        );

        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/login")
                    .header("origin", "https://hillsgo.example")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let allowed = response.headers()["access-control-allow-methods"].to_str().unwrap();
        assert!(allowed.contains("POST"));
        assert_eq!(response.headers()["access-control-max-age"], "3600");
    }
}
