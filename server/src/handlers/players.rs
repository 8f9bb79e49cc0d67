//! Player handlers - list, edit and reorder the player list.

use roster_engine::{
    Fields, MemoryStore, QuerySpec, ReadRecords, Record, RecordId, RecordsController, Section,
    SortKey, StoreTransaction, TransactionSerializer,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, Result};

/// Serializer over the player table.
pub type Players = TransactionSerializer<MemoryStore>;

/// Controller tracking the displayed player list.
pub type PlayersController = RecordsController<MemoryStore>;

/// Request body for creating a player.
#[derive(Debug, Deserialize)]
pub struct NewPlayer {
    pub name: String,
    #[serde(default)]
    pub score: i64,
}

/// Request body for editing a player. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct PlayerPatch {
    pub name: Option<String>,
    pub score: Option<i64>,
}

/// The two orderings of the demo list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerOrdering {
    /// Name ascending
    Name,
    /// Score descending, then name
    Score,
}

impl PlayerOrdering {
    pub fn query(self) -> QuerySpec {
        match self {
            PlayerOrdering::Name => QuerySpec::ordered_by(SortKey::asc("name").case_insensitive()),
            PlayerOrdering::Score => QuerySpec::ordered_by(SortKey::desc("score"))
                .then_by(SortKey::asc("name").case_insensitive()),
        }
    }

    /// The ordering whose query is `spec`, if any.
    pub fn of(spec: &QuerySpec) -> Option<Self> {
        [PlayerOrdering::Name, PlayerOrdering::Score]
            .into_iter()
            .find(|ordering| ordering.query() == *spec)
    }
}

/// Request body for changing the ordering.
#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub by: PlayerOrdering,
}

/// Response for listing players.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersResponse {
    /// Generation of the delivered list
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering: Option<PlayerOrdering>,
    pub sections: Vec<Section>,
}

/// The list as last delivered to consumers.
pub fn list_players(controller: &PlayersController) -> PlayersResponse {
    PlayersResponse {
        generation: controller.generation(),
        ordering: PlayerOrdering::of(&controller.query()),
        sections: controller.sections(),
    }
}

/// Insert a player.
pub async fn create_player(players: &Players, request: NewPlayer) -> Result<Record> {
    let name = validate_name(&request.name)?;

    let mut fields = Fields::new();
    fields.insert("name".into(), json!(name));
    fields.insert("score".into(), json!(request.score));

    let record = players
        .write(|txn| {
            let id = txn.insert(fields)?;
            fetch_existing(&*txn, id)
        })
        .await?;

    tracing::debug!(id = record.id, "Player created");
    Ok(record)
}

/// Update a player's name and/or score.
pub async fn update_player(players: &Players, id: RecordId, patch: PlayerPatch) -> Result<Record> {
    let mut fields = Fields::new();
    if let Some(name) = &patch.name {
        fields.insert("name".into(), json!(validate_name(name)?));
    }
    if let Some(score) = patch.score {
        fields.insert("score".into(), json!(score));
    }

    let record = players
        .write(|txn| {
            txn.update(id, fields)?;
            fetch_existing(&*txn, id)
        })
        .await?;

    tracing::debug!(id, "Player updated");
    Ok(record)
}

/// Delete a player. Returns false when it did not exist.
pub async fn delete_player(players: &Players, id: RecordId) -> Result<bool> {
    let existed = players.write(|txn| txn.delete(id)).await?;
    tracing::debug!(id, existed, "Player deleted");
    Ok(existed)
}

/// Switch the list ordering.
pub async fn set_ordering(controller: &PlayersController, ordering: PlayerOrdering) -> Result<()> {
    controller.set_query(ordering.query()).await?;
    tracing::debug!(?ordering, "Ordering changed");
    Ok(())
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "Player name must not be empty".to_string(),
        ));
    }
    Ok(name)
}

fn fetch_existing(txn: &impl ReadRecords, id: RecordId) -> roster_engine::error::Result<Record> {
    txn.fetch(id)?.ok_or(roster_engine::Error::RecordNotFound(id))
}
