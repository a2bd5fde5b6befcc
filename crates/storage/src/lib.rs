use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateError, sqlite::SqlitePoolOptions, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use herdbook_core::types::UnknownVariant;

mod animals;
mod breeding;
mod health;
mod housing;
mod inventory;
mod lactations;
mod production;

pub use animals::AnimalRepository;
pub use breeding::BreedingRepository;
pub use health::HealthRepository;
pub use housing::HousingRepository;
pub use inventory::{FlockRecount, InventoryRepository, OccupancyError, DAIRY_POPULATION};
pub use lactations::LactationRepository;
pub use production::MilkRepository;

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins the transaction that carries one primary write and its cascade.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// Returns a handle for the animal registry.
    pub fn animals(&self) -> AnimalRepository {
        AnimalRepository
    }

    /// Returns a handle for inseminations and pregnancies.
    pub fn breeding(&self) -> BreedingRepository {
        BreedingRepository
    }

    /// Returns a handle for derived lactation periods.
    pub fn lactations(&self) -> LactationRepository {
        LactationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for milk production records.
    pub fn milk(&self) -> MilkRepository {
        MilkRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for culling and quarantine records.
    pub fn health(&self) -> HealthRepository {
        HealthRepository
    }

    /// Returns a handle for barns, pens, movements and flock inspections.
    pub fn housing(&self) -> HousingRepository {
        HousingRepository
    }

    /// Returns a handle for the materialized inventory aggregates.
    pub fn inventory(&self) -> InventoryRepository {
        InventoryRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("failed to decode stored row: {0}")]
    Decode(#[from] UnknownVariant),
    #[error("{0} conflicts with an existing record")]
    Conflict(&'static str),
    #[error("{0} references a record that does not exist")]
    MissingReference(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Maps SQLite constraint failures on `what` to typed variants.
    pub(crate) fn constraint(err: sqlx::Error, what: &'static str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some("2067") | Some("1555") => return Self::Conflict(what),
                Some("787") => return Self::MissingReference(what),
                _ => {}
            }
        }
        Self::Database(err)
    }
}

pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Full precision variant for caller supplied timestamps compared on re-save.
pub(crate) fn to_rfc3339_exact(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
