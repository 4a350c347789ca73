//! # FoodCast API
//!
//! Donors list surplus food, recipients claim it, drivers move it.
//!
//! ## Pieces
//! - [`auth`]: bearer sessions, signup/login
//! - [`search`]: listing queries and the map
//! - [`routes`]: everything that writes
//! - [`dashboard`]: per-role read models
//! - [`database`]: the ledger store and its file
//!
//!
//!
//! ## Running
//!
//! Local, in-memory, debug logs.
//! ```sh
//! LEDGER_PATH=memory RUST_LOG=debug cargo run -p foodcast
//! ```
//!
//! Against a model server.
//! ```sh
//! MODEL_URL=http://localhost:8000 cargo run -p foodcast
//! ```
//!
//! Per-request logging.
//! ```sh
//! cargo run -p foodcast --features verbose
//! ```
//!
//!
//!
//! ## Background
//!
//! Every `SWEEP_INTERVAL_SECS` the server expires listings whose food has gone bad and drops
//! dead sessions. `POST /admin/expire` runs the same sweep on demand.
use std::sync::Arc;

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use chrono::Utc;
use signal::ctrl_c;
use tokio::{net::TcpListener, signal, task::JoinHandle, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod dashboard;
pub mod database;
pub mod error;
pub mod routes;
pub mod search;
pub mod state;
pub mod utils;

use auth::{login_handler, logout_handler, me_handler, signup_handler};
use dashboard::{
    admin_dashboard_handler, donor_dashboard_handler, driver_dashboard_handler,
    recipient_dashboard_handler,
};
use routes::{
    accept_claim_handler, cancel_claim_handler, cancel_offer_handler, cancel_prediction_handler,
    confirm_prediction_handler, create_claim_handler, create_offer_handler,
    create_prediction_handler, create_surplus_handler, deliver_claim_handler,
    delivery_route_handler, expire_handler, generate_prediction_handler, health_handler,
    list_claims_handler, list_users_handler, open_deliveries_handler, pickup_claim_handler,
};
use search::{
    get_offer_handler, list_offers_handler, list_predictions_handler, list_surplus_handler,
    map_offers_handler,
};
use state::AppState;

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new()?;

    let sweeper = spawn_sweeper(state.clone());

    info!("Starting server...");
    let app = build_app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server shut down");

    Ok(())
}

pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(state.config.cors_max_age);

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/me", get(me_handler))
        .route("/offers", post(create_offer_handler).get(list_offers_handler))
        .route("/offers/map", get(map_offers_handler))
        .route("/offers/{id}", get(get_offer_handler))
        .route("/offers/{id}/cancel", post(cancel_offer_handler))
        .route("/surplus", post(create_surplus_handler).get(list_surplus_handler))
        .route(
            "/predictions",
            post(create_prediction_handler).get(list_predictions_handler),
        )
        .route("/predictions/generate", post(generate_prediction_handler))
        .route("/predictions/{id}/confirm", post(confirm_prediction_handler))
        .route("/predictions/{id}/cancel", post(cancel_prediction_handler))
        .route("/claims", post(create_claim_handler).get(list_claims_handler))
        .route("/allocations", post(create_claim_handler).get(list_claims_handler))
        .route("/claims/{id}/cancel", post(cancel_claim_handler))
        .route("/claims/{id}/accept", post(accept_claim_handler))
        .route("/claims/{id}/pickup", post(pickup_claim_handler))
        .route("/claims/{id}/deliver", post(deliver_claim_handler))
        .route("/deliveries", get(open_deliveries_handler))
        .route("/deliveries/route", get(delivery_route_handler))
        .route("/dashboard/donor", get(donor_dashboard_handler))
        .route("/dashboard/recipient", get(recipient_dashboard_handler))
        .route("/dashboard/driver", get(driver_dashboard_handler))
        .route("/dashboard/admin", get(admin_dashboard_handler))
        .route("/admin/expire", post(expire_handler))
        .route("/admin/users", get(list_users_handler))
        .layer(cors)
        .with_state(state)
}

/// Only takes the write lock when something is actually stale.
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(state.config.sweep_interval);

        loop {
            ticker.tick().await;

            let now = Utc::now();
            if !state.store.read(|ledger| ledger.needs_sweep(now)).await {
                continue;
            }

            match routes::sweep(&state).await {
                Ok(swept) => info!(
                    "Sweep: {} listings expired, {} sessions pruned",
                    swept.expired, swept.sessions_pruned
                ),
                Err(e) => warn!("Sweep failed: {e}"),
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
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
