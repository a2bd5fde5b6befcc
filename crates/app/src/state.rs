use chrono::NaiveDate;
use thiserror::Error;

use herdbook_core::lactation;
use herdbook_core::types::{BarnHistoryEntry, InventorySummary, LactationView, PenHistoryEntry};
use herdbook_storage::{Database, StorageError, DAIRY_POPULATION};

/// Snapshot of every inventory aggregate, read in one transaction.
pub async fn build_inventory_summary(database: &Database) -> Result<InventorySummary, StateError> {
    let inventory = database.inventory();
    let mut tx = database.begin().await?;

    let herds = inventory.herd_inventory(&mut *tx).await?;
    let pens = inventory.pen_occupancies(&mut *tx).await?;
    let barns = inventory.barn_occupancy(&mut *tx).await?;
    let milk = inventory.milk_inventory(&mut *tx, DAIRY_POPULATION).await?;
    let flocks = inventory.flock_inventories(&mut *tx).await?;
    tx.commit().await.map_err(StorageError::from)?;

    Ok(InventorySummary {
        herds,
        pens,
        barns,
        milk,
        flocks,
    })
}

/// Lactation chain of one animal with stage and days in milk as of `today`.
pub async fn lactations_for_animal(
    database: &Database,
    animal_id: &str,
    today: NaiveDate,
) -> Result<Vec<LactationView>, StateError> {
    if database
        .animals()
        .fetch(database.pool(), animal_id)
        .await?
        .is_none()
    {
        return Err(StateError::not_found("animal", animal_id));
    }

    let lactations = database.lactations().list_for_animal(animal_id).await?;
    Ok(lactations
        .into_iter()
        .map(|lactation| LactationView {
            days_in_lactation: lactation::days_in_lactation(&lactation, today),
            stage: lactation::stage(&lactation, today),
            lactation,
        })
        .collect())
}

pub async fn pen_history(
    database: &Database,
    pen_id: &str,
) -> Result<Vec<PenHistoryEntry>, StateError> {
    if database
        .housing()
        .fetch_pen(database.pool(), pen_id)
        .await?
        .is_none()
    {
        return Err(StateError::not_found("pen", pen_id));
    }
    Ok(database.inventory().pen_history(pen_id).await?)
}

pub async fn barn_history(
    database: &Database,
    barn_id: &str,
) -> Result<Vec<BarnHistoryEntry>, StateError> {
    if database
        .housing()
        .fetch_barn(database.pool(), barn_id)
        .await?
        .is_none()
    {
        return Err(StateError::not_found("barn", barn_id));
    }
    Ok(database.inventory().barn_history(barn_id).await?)
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{record} {id} not found")]
    NotFound { record: &'static str, id: String },
    #[error("failed to load read model: {0}")]
    Storage(#[from] StorageError),
}

impl StateError {
    fn not_found(record: &'static str, id: &str) -> Self {
        Self::NotFound {
            record,
            id: id.to_string(),
        }
    }
}
