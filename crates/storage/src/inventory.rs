use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteExecutor, SqlitePool, Transaction};
use thiserror::Error;

use herdbook_core::inventory::mortality_rate;
use herdbook_core::types::{
    BarnHistoryEntry, BarnOccupancy, FlockHistoryEntry, FlockInventory, HerdCounts, HerdInventory, MilkHistoryEntry,
    MilkInventory, PenHistoryEntry, PenOccupancy, Species,
};

use crate::{to_rfc3339, StorageError};

/// Population key of the dairy milk stock.
pub const DAIRY_POPULATION: &str = "dairy";

/// Repository for the materialized inventory aggregates and their history.
///
/// Every counter change is a single atomic `UPDATE ... RETURNING` (or upsert)
/// followed by one history row carrying the post-update value.
#[derive(Clone)]
pub struct InventoryRepository {
    pub(crate) pool: SqlitePool,
}

/// Errors raised by bounded counters.
#[derive(Debug, Error)]
pub enum OccupancyError {
    #[error("pen {0} is at capacity")]
    PenFull(String),
    #[error("pen {0} is already empty")]
    PenEmpty(String),
    #[error("pen {0} has no occupancy record")]
    UnknownPen(String),
    #[error("flock {flock_id} has only {alive} live birds left")]
    FlockExhausted { flock_id: String, alive: i64 },
    #[error("flock {0} has no bird inventory")]
    UnknownFlock(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Recount inputs for one flock: registered head count and recorded deaths.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FlockRecount {
    pub flock_id: String,
    pub head_count: i64,
    pub dead_birds: i64,
}

impl FlockRecount {
    pub fn alive_birds(&self) -> i64 {
        self.head_count - self.dead_birds
    }
}

const HERD_COLUMNS: &str =
    "species, alive, alive_male, alive_female, sold, dead, culled, quarantined, updated_at";

impl InventoryRepository {
    /// Applies a signed herd delta for one species.
    pub async fn adjust_herd(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        species: Species,
        delta: &HerdCounts,
        at: DateTime<Utc>,
    ) -> Result<HerdInventory, StorageError> {
        let row = sqlx::query_as::<_, HerdRow>(&format!(
            "INSERT INTO herd_inventory ({HERD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(species) DO UPDATE SET \
                 alive = alive + excluded.alive, \
                 alive_male = alive_male + excluded.alive_male, \
                 alive_female = alive_female + excluded.alive_female, \
                 sold = sold + excluded.sold, \
                 dead = dead + excluded.dead, \
                 culled = culled + excluded.culled, \
                 quarantined = quarantined + excluded.quarantined, \
                 updated_at = excluded.updated_at \
             RETURNING {HERD_COLUMNS}"
        ))
        .bind(species.as_str())
        .bind(delta.alive)
        .bind(delta.alive_male)
        .bind(delta.alive_female)
        .bind(delta.sold)
        .bind(delta.dead)
        .bind(delta.culled)
        .bind(delta.quarantined)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await?;

        let inventory = row.into_domain()?;
        insert_herd_history(tx, &inventory).await?;
        Ok(inventory)
    }

    /// Overwrites the herd counters with recounted values.
    pub async fn set_herd(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        species: Species,
        counts: &HerdCounts,
        at: DateTime<Utc>,
    ) -> Result<HerdInventory, StorageError> {
        let row = sqlx::query_as::<_, HerdRow>(&format!(
            "INSERT INTO herd_inventory ({HERD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(species) DO UPDATE SET \
                 alive = excluded.alive, \
                 alive_male = excluded.alive_male, \
                 alive_female = excluded.alive_female, \
                 sold = excluded.sold, \
                 dead = excluded.dead, \
                 culled = excluded.culled, \
                 quarantined = excluded.quarantined, \
                 updated_at = excluded.updated_at \
             RETURNING {HERD_COLUMNS}"
        ))
        .bind(species.as_str())
        .bind(counts.alive)
        .bind(counts.alive_male)
        .bind(counts.alive_female)
        .bind(counts.sold)
        .bind(counts.dead)
        .bind(counts.culled)
        .bind(counts.quarantined)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await?;

        let inventory = row.into_domain()?;
        insert_herd_history(tx, &inventory).await?;
        Ok(inventory)
    }

    pub async fn herd_inventory<'e, E>(&self, executor: E) -> Result<Vec<HerdInventory>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, HerdRow>(&format!(
            "SELECT {HERD_COLUMNS} FROM herd_inventory ORDER BY species"
        ))
        .fetch_all(executor)
        .await?;
        rows.into_iter().map(HerdRow::into_domain).collect()
    }

    /// Number of herd history rows, mostly useful to assert one row per delta.
    pub async fn herd_history_len(&self, species: Species) -> Result<i64, StorageError> {
        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM herd_inventory_history WHERE species = ?")
                .bind(species.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    /// Creates the occupancy row of a new pen.
    pub async fn init_pen(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pen_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pen_inventory (pen_id, occupancy, updated_at) VALUES (?, 0, ?) \
             ON CONFLICT(pen_id) DO NOTHING",
        )
        .bind(pen_id)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "pen_inventory"))?;
        Ok(())
    }

    /// Moves a pen's occupancy by `delta`, refusing to exceed capacity or drop below zero.
    pub async fn adjust_pen(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pen_id: &str,
        delta: i64,
        movement_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<PenOccupancy, OccupancyError> {
        let row = sqlx::query_as::<_, PenRow>(
            "UPDATE pen_inventory SET occupancy = occupancy + ?, updated_at = ? \
             WHERE pen_id = ? \
               AND occupancy + ? >= 0 \
               AND occupancy + ? <= (SELECT capacity FROM pens WHERE pens.id = pen_inventory.pen_id) \
             RETURNING pen_id, occupancy, updated_at",
        )
        .bind(delta)
        .bind(to_rfc3339(at))
        .bind(pen_id)
        .bind(delta)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            let current = self.pen_occupancy(&mut **tx, pen_id).await?;
            return Err(match current {
                None => OccupancyError::UnknownPen(pen_id.to_string()),
                Some(_) if delta < 0 => OccupancyError::PenEmpty(pen_id.to_string()),
                Some(_) => OccupancyError::PenFull(pen_id.to_string()),
            });
        };

        let occupancy = row.into_domain();
        insert_pen_history(tx, &occupancy, movement_id).await?;
        Ok(occupancy)
    }

    /// Overwrites a pen's occupancy with a recounted value.
    pub async fn set_pen(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pen_id: &str,
        occupancy: i64,
        at: DateTime<Utc>,
    ) -> Result<PenOccupancy, StorageError> {
        let row = sqlx::query_as::<_, PenRow>(
            "INSERT INTO pen_inventory (pen_id, occupancy, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(pen_id) DO UPDATE SET \
                 occupancy = excluded.occupancy, \
                 updated_at = excluded.updated_at \
             RETURNING pen_id, occupancy, updated_at",
        )
        .bind(pen_id)
        .bind(occupancy)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "pen_inventory"))?;

        let occupancy = row.into_domain();
        insert_pen_history(tx, &occupancy, None).await?;
        Ok(occupancy)
    }

    pub async fn pen_occupancy<'e, E>(
        &self,
        executor: E,
        pen_id: &str,
    ) -> Result<Option<PenOccupancy>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, PenRow>(
            "SELECT pen_id, occupancy, updated_at FROM pen_inventory WHERE pen_id = ?",
        )
        .bind(pen_id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(PenRow::into_domain))
    }

    pub async fn pen_occupancies<'e, E>(&self, executor: E) -> Result<Vec<PenOccupancy>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, PenRow>(
            "SELECT pen_id, occupancy, updated_at FROM pen_inventory ORDER BY pen_id",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(PenRow::into_domain).collect())
    }

    /// Occupancy snapshots of one pen, oldest first.
    pub async fn pen_history(&self, pen_id: &str) -> Result<Vec<PenHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, PenHistoryRow>(
            "SELECT id, pen_id, occupancy, movement_id, recorded_at \
             FROM pen_inventory_history WHERE pen_id = ? ORDER BY id",
        )
        .bind(pen_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PenHistoryRow::into_domain).collect())
    }

    /// Barn occupancy, derived by summing the occupancy of its pens.
    pub async fn barn_occupancy<'e, E>(&self, executor: E) -> Result<Vec<BarnOccupancy>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, BarnOccupancyRow>(
            "SELECT b.id AS barn_id, \
                    COALESCE(SUM(pi.occupancy), 0) AS occupancy, \
                    b.capacity AS capacity \
               FROM barns AS b \
               LEFT JOIN pens AS p ON p.barn_id = b.id \
               LEFT JOIN pen_inventory AS pi ON pi.pen_id = p.id \
              GROUP BY b.id, b.capacity \
              ORDER BY b.id",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| BarnOccupancy {
                barn_id: row.barn_id,
                occupancy: row.occupancy,
                capacity: row.capacity,
            })
            .collect())
    }

    /// Appends a barn snapshot carrying the summed occupancy of its pens.
    ///
    /// Call after the pen counters of the movement have been adjusted.
    pub async fn record_barn_change(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        barn_id: &str,
        delta: i64,
        movement_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<BarnHistoryEntry, StorageError> {
        let row = sqlx::query_as::<_, BarnHistoryRow>(
            "INSERT INTO barn_inventory_history (barn_id, occupancy, delta, movement_id, recorded_at) \
             SELECT ?, COALESCE(SUM(pi.occupancy), 0), ?, ?, ? \
               FROM pens AS p \
               JOIN pen_inventory AS pi ON pi.pen_id = p.id \
              WHERE p.barn_id = ? \
             RETURNING id, barn_id, occupancy, delta, movement_id, recorded_at",
        )
        .bind(barn_id)
        .bind(delta)
        .bind(movement_id)
        .bind(to_rfc3339(at))
        .bind(barn_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "barn_inventory_history"))?;
        Ok(row.into_domain())
    }

    /// Barn snapshots, oldest first.
    pub async fn barn_history(&self, barn_id: &str) -> Result<Vec<BarnHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, BarnHistoryRow>(
            "SELECT id, barn_id, occupancy, delta, movement_id, recorded_at \
             FROM barn_inventory_history WHERE barn_id = ? ORDER BY id",
        )
        .bind(barn_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(BarnHistoryRow::into_domain).collect())
    }

    /// Applies a signed change to a milk population total.
    pub async fn adjust_milk(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        population: &str,
        change_kg: f64,
        at: DateTime<Utc>,
    ) -> Result<MilkInventory, StorageError> {
        let row = sqlx::query_as::<_, MilkRow>(
            "INSERT INTO milk_inventory (population, total_kg, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(population) DO UPDATE SET \
                 total_kg = total_kg + excluded.total_kg, \
                 updated_at = excluded.updated_at \
             RETURNING population, total_kg, updated_at",
        )
        .bind(population)
        .bind(change_kg)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await?;

        let inventory = row.into_domain();
        insert_milk_history(tx, &inventory, change_kg).await?;
        Ok(inventory)
    }

    /// Overwrites a milk total with a recounted value.
    pub async fn set_milk(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        population: &str,
        total_kg: f64,
        at: DateTime<Utc>,
    ) -> Result<MilkInventory, StorageError> {
        let previous = self
            .milk_inventory(&mut **tx, population)
            .await?
            .map_or(0.0, |inventory| inventory.total_kg);
        let row = sqlx::query_as::<_, MilkRow>(
            "INSERT INTO milk_inventory (population, total_kg, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(population) DO UPDATE SET \
                 total_kg = excluded.total_kg, \
                 updated_at = excluded.updated_at \
             RETURNING population, total_kg, updated_at",
        )
        .bind(population)
        .bind(total_kg)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await?;

        let inventory = row.into_domain();
        insert_milk_history(tx, &inventory, total_kg - previous).await?;
        Ok(inventory)
    }

    pub async fn milk_inventory<'e, E>(
        &self,
        executor: E,
        population: &str,
    ) -> Result<Option<MilkInventory>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, MilkRow>(
            "SELECT population, total_kg, updated_at FROM milk_inventory WHERE population = ?",
        )
        .bind(population)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(MilkRow::into_domain))
    }

    pub async fn milk_history(&self, population: &str) -> Result<Vec<MilkHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, MilkHistoryRow>(
            "SELECT id, population, change_kg, total_kg, recorded_at \
             FROM milk_inventory_history WHERE population = ? ORDER BY id",
        )
        .bind(population)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MilkHistoryRow::into_domain).collect())
    }

    /// Creates the bird inventory of a newly registered flock.
    pub async fn init_flock(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flock_id: &str,
        birds: u32,
        at: DateTime<Utc>,
    ) -> Result<FlockInventory, StorageError> {
        self.set_flock(tx, flock_id, i64::from(birds), 0, i64::from(birds), at)
            .await
    }

    /// Moves `dead_delta` birds from alive to dead and snapshots the mortality rate.
    pub async fn record_flock_mortality(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flock_id: &str,
        dead_delta: i64,
        registered_birds: i64,
        at: DateTime<Utc>,
    ) -> Result<FlockInventory, OccupancyError> {
        let row = sqlx::query_as::<_, FlockRow>(
            "UPDATE flock_inventory SET \
                 alive_birds = alive_birds - ?, \
                 dead_birds = dead_birds + ?, \
                 updated_at = ? \
             WHERE flock_id = ? AND alive_birds - ? >= 0 AND dead_birds + ? >= 0 \
             RETURNING flock_id, alive_birds, dead_birds, updated_at",
        )
        .bind(dead_delta)
        .bind(dead_delta)
        .bind(to_rfc3339(at))
        .bind(flock_id)
        .bind(dead_delta)
        .bind(dead_delta)
        .fetch_optional(&mut **tx)
        .await?;

        let Some(row) = row else {
            let current = sqlx::query_as::<_, FlockRow>(
                "SELECT flock_id, alive_birds, dead_birds, updated_at FROM flock_inventory \
                 WHERE flock_id = ?",
            )
            .bind(flock_id)
            .fetch_optional(&mut **tx)
            .await?;
            return Err(match current {
                None => OccupancyError::UnknownFlock(flock_id.to_string()),
                Some(current) => OccupancyError::FlockExhausted {
                    flock_id: flock_id.to_string(),
                    alive: current.alive_birds,
                },
            });
        };

        let inventory = row.into_domain();
        insert_flock_history(tx, &inventory, registered_birds).await?;
        Ok(inventory)
    }

    /// Overwrites a flock's bird counts with recounted values.
    pub async fn set_flock(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        flock_id: &str,
        alive_birds: i64,
        dead_birds: i64,
        registered_birds: i64,
        at: DateTime<Utc>,
    ) -> Result<FlockInventory, StorageError> {
        let row = sqlx::query_as::<_, FlockRow>(
            "INSERT INTO flock_inventory (flock_id, alive_birds, dead_birds, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(flock_id) DO UPDATE SET \
                 alive_birds = excluded.alive_birds, \
                 dead_birds = excluded.dead_birds, \
                 updated_at = excluded.updated_at \
             RETURNING flock_id, alive_birds, dead_birds, updated_at",
        )
        .bind(flock_id)
        .bind(alive_birds)
        .bind(dead_birds)
        .bind(to_rfc3339(at))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "flock_inventory"))?;

        let inventory = row.into_domain();
        insert_flock_history(tx, &inventory, registered_birds).await?;
        Ok(inventory)
    }

    pub async fn flock_inventories<'e, E>(
        &self,
        executor: E,
    ) -> Result<Vec<FlockInventory>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, FlockRow>(
            "SELECT flock_id, alive_birds, dead_birds, updated_at FROM flock_inventory \
             ORDER BY flock_id",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(FlockRow::into_domain).collect())
    }

    pub async fn flock_history(&self, flock_id: &str) -> Result<Vec<FlockHistoryEntry>, StorageError> {
        let rows = sqlx::query_as::<_, FlockHistoryRow>(
            "SELECT id, flock_id, alive_birds, mortality_rate, recorded_at \
             FROM flock_inventory_history WHERE flock_id = ? ORDER BY id",
        )
        .bind(flock_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FlockHistoryRow::into_domain).collect())
    }

    /// Head count and inspected deaths per registered flock.
    pub async fn flock_recount<'e, E>(&self, executor: E) -> Result<Vec<FlockRecount>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, FlockRecount>(
            "SELECT a.id AS flock_id, \
                    a.head_count AS head_count, \
                    COALESCE(SUM(fi.dead_birds), 0) AS dead_birds \
               FROM animals AS a \
               LEFT JOIN flock_inspections AS fi ON fi.flock_id = a.id \
              WHERE a.species = 'poultry' \
              GROUP BY a.id, a.head_count \
              ORDER BY a.id",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }
}

async fn insert_herd_history(
    tx: &mut Transaction<'_, Sqlite>,
    inventory: &HerdInventory,
) -> Result<(), sqlx::Error> {
    let counts = &inventory.counts;
    sqlx::query(
        "INSERT INTO herd_inventory_history \
         (species, alive, alive_male, alive_female, sold, dead, culled, quarantined, recorded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(inventory.species.as_str())
    .bind(counts.alive)
    .bind(counts.alive_male)
    .bind(counts.alive_female)
    .bind(counts.sold)
    .bind(counts.dead)
    .bind(counts.culled)
    .bind(counts.quarantined)
    .bind(to_rfc3339(inventory.updated_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_pen_history(
    tx: &mut Transaction<'_, Sqlite>,
    occupancy: &PenOccupancy,
    movement_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO pen_inventory_history (pen_id, occupancy, movement_id, recorded_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&occupancy.pen_id)
    .bind(occupancy.occupancy)
    .bind(movement_id)
    .bind(to_rfc3339(occupancy.updated_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_milk_history(
    tx: &mut Transaction<'_, Sqlite>,
    inventory: &MilkInventory,
    change_kg: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO milk_inventory_history (population, change_kg, total_kg, recorded_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&inventory.population)
    .bind(change_kg)
    .bind(inventory.total_kg)
    .bind(to_rfc3339(inventory.updated_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_flock_history(
    tx: &mut Transaction<'_, Sqlite>,
    inventory: &FlockInventory,
    registered_birds: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO flock_inventory_history (flock_id, alive_birds, mortality_rate, recorded_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(&inventory.flock_id)
    .bind(inventory.alive_birds)
    .bind(mortality_rate(registered_birds, inventory.dead_birds))
    .bind(to_rfc3339(inventory.updated_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct HerdRow {
    species: String,
    alive: i64,
    alive_male: i64,
    alive_female: i64,
    sold: i64,
    dead: i64,
    culled: i64,
    quarantined: i64,
    updated_at: DateTime<Utc>,
}

impl HerdRow {
    fn into_domain(self) -> Result<HerdInventory, StorageError> {
        Ok(HerdInventory {
            species: self.species.parse()?,
            counts: HerdCounts {
                alive: self.alive,
                alive_male: self.alive_male,
                alive_female: self.alive_female,
                sold: self.sold,
                dead: self.dead,
                culled: self.culled,
                quarantined: self.quarantined,
            },
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PenRow {
    pen_id: String,
    occupancy: i64,
    updated_at: DateTime<Utc>,
}

impl PenRow {
    fn into_domain(self) -> PenOccupancy {
        PenOccupancy {
            pen_id: self.pen_id,
            occupancy: self.occupancy,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PenHistoryRow {
    id: i64,
    pen_id: String,
    occupancy: i64,
    movement_id: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl PenHistoryRow {
    fn into_domain(self) -> PenHistoryEntry {
        PenHistoryEntry {
            id: self.id,
            pen_id: self.pen_id,
            occupancy: self.occupancy,
            movement_id: self.movement_id,
            recorded_at: self.recorded_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BarnHistoryRow {
    id: i64,
    barn_id: String,
    occupancy: i64,
    delta: i64,
    movement_id: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl BarnHistoryRow {
    fn into_domain(self) -> BarnHistoryEntry {
        BarnHistoryEntry {
            id: self.id,
            barn_id: self.barn_id,
            occupancy: self.occupancy,
            delta: self.delta,
            movement_id: self.movement_id,
            recorded_at: self.recorded_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BarnOccupancyRow {
    barn_id: String,
    occupancy: i64,
    capacity: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MilkRow {
    population: String,
    total_kg: f64,
    updated_at: DateTime<Utc>,
}

impl MilkRow {
    fn into_domain(self) -> MilkInventory {
        MilkInventory {
            population: self.population,
            total_kg: self.total_kg,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MilkHistoryRow {
    id: i64,
    population: String,
    change_kg: f64,
    total_kg: f64,
    recorded_at: DateTime<Utc>,
}

impl MilkHistoryRow {
    fn into_domain(self) -> MilkHistoryEntry {
        MilkHistoryEntry {
            id: self.id,
            population: self.population,
            change_kg: self.change_kg,
            total_kg: self.total_kg,
            recorded_at: self.recorded_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlockRow {
    flock_id: String,
    alive_birds: i64,
    dead_birds: i64,
    updated_at: DateTime<Utc>,
}

impl FlockRow {
    fn into_domain(self) -> FlockInventory {
        FlockInventory {
            flock_id: self.flock_id,
            alive_birds: self.alive_birds,
            dead_birds: self.dead_birds,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlockHistoryRow {
    id: i64,
    flock_id: String,
    alive_birds: i64,
    mortality_rate: f64,
    recorded_at: DateTime<Utc>,
}

impl FlockHistoryRow {
    fn into_domain(self) -> FlockHistoryEntry {
        FlockHistoryEntry {
            id: self.id,
            flock_id: self.flock_id,
            alive_birds: self.alive_birds,
            mortality_rate: self.mortality_rate,
            recorded_at: self.recorded_at,
        }
    }
}
