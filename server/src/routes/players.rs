//! Player list routes.

use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post, put},
    Json, Router,
};
use roster_engine::{Record, RecordId};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::handlers::{
    create_player, delete_player, handle_websocket_connection, list_players, randomize_scores,
    set_ordering, spawn_stress, update_player, NewPlayer, OrderRequest, PlayerPatch,
    PlayersResponse,
};
use crate::AppState;

/// Create player routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/players", get(list_handler).post(create_handler))
        .route("/players/order", put(order_handler))
        .route("/players/randomize", post(randomize_handler))
        .route("/players/stress", post(stress_handler))
        .route("/players/{id}", patch(update_handler).delete(delete_handler))
        .route("/ws", get(ws_handler))
}

/// Response for the randomize workload.
#[derive(Debug, Serialize)]
pub struct RandomizeResponse {
    pub updated: usize,
}

/// Response for the stress workload.
#[derive(Debug, Serialize)]
pub struct StressResponse {
    pub jobs: usize,
}

/// GET /players - The delivered list.
async fn list_handler(State(state): State<AppState>) -> Json<PlayersResponse> {
    Json(list_players(&state.controller))
}

/// POST /players - Insert a player.
async fn create_handler(
    State(state): State<AppState>,
    Json(request): Json<NewPlayer>,
) -> Result<(StatusCode, Json<Record>)> {
    let record = create_player(&state.players, request).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// PATCH /players/{id} - Edit a player.
async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
    Json(patch): Json<PlayerPatch>,
) -> Result<Json<Record>> {
    let record = update_player(&state.players, id, patch).await?;
    Ok(Json(record))
}

/// DELETE /players/{id} - Remove a player.
async fn delete_handler(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<StatusCode> {
    delete_player(&state.players, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /players/order - Switch between name and score ordering.
async fn order_handler(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<Json<PlayersResponse>> {
    set_ordering(&state.controller, request.by).await?;
    Ok(Json(list_players(&state.controller)))
}

/// POST /players/randomize - New random score for everyone.
async fn randomize_handler(State(state): State<AppState>) -> Result<Json<RandomizeResponse>> {
    let updated = randomize_scores(&state.players).await?;
    Ok(Json(RandomizeResponse { updated }))
}

/// POST /players/stress - Fire concurrent write jobs and return at once.
async fn stress_handler(State(state): State<AppState>) -> (StatusCode, Json<StressResponse>) {
    let jobs = state.config.stress_jobs;
    spawn_stress(Arc::clone(&state.players), jobs);
    (StatusCode::ACCEPTED, Json(StressResponse { jobs }))
}

/// GET /ws - Live batches over WebSocket.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_websocket_connection(socket, state.broadcaster, state.conn_manager)
    })
}
