//! Roster Server - demo host for a live player list.
//!
//! Players live in an in-memory store behind a transaction serializer. A
//! records controller tracks the ordered list and hands every change batch
//! to WebSocket clients, while HTTP endpoints write, reorder and run the
//! demo workloads.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use roster_engine::{
    ChangeConsumer, ControllerOptions, MemoryStore, RecordsController, TransactionSerializer,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{seed_demo, PlayerOrdering, Players, PlayersController};
use crate::websocket::{BatchBroadcaster, ConnectionManager};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub players: Arc<Players>,
    pub controller: Arc<PlayersController>,
    pub broadcaster: Arc<BatchBroadcaster>,
    pub conn_manager: Arc<ConnectionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the store, seed it if configured, and fetch the initial list.
    pub async fn new(config: Config) -> error::Result<Self> {
        let players = Arc::new(TransactionSerializer::new(MemoryStore::new()));
        if config.seed_demo {
            seed_demo(&players).await?;
        }

        let conn_manager = ConnectionManager::new_shared();
        let broadcaster = Arc::new(BatchBroadcaster::new(Arc::clone(&conn_manager)));
        let consumer: Arc<dyn ChangeConsumer> = broadcaster.clone();

        let controller = RecordsController::new(
            Arc::clone(&players),
            PlayerOrdering::Score.query(),
            Arc::downgrade(&consumer),
            ControllerOptions::default(),
        )?;
        controller.perform_initial_fetch().await?;

        // Nothing else writes before the router is up
        broadcaster.reset(controller.generation(), (*controller.snapshot()).clone());

        tracing::info!(
            generation = controller.generation(),
            players = controller.snapshot().record_count(),
            "Player list ready"
        );

        Ok(Self {
            players,
            controller: Arc::new(controller),
            broadcaster,
            conn_manager,
            config: Arc::new(config),
        })
    }
}

/// The application router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
