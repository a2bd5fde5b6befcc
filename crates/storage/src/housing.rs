use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqliteExecutor, Transaction};

use herdbook_core::types::{Barn, FlockInspection, Movement, Pen};

use crate::{to_rfc3339, to_rfc3339_exact, StorageError};

/// Repository for barns, pens, the movement log and flock inspections.
#[derive(Debug, Clone, Copy, Default)]
pub struct HousingRepository;

impl HousingRepository {
    pub async fn fetch_barn<'e, E>(&self, executor: E, id: &str) -> Result<Option<Barn>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, BarnRow>("SELECT id, name, capacity FROM barns WHERE id = ?")
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(row.map(BarnRow::into_domain))
    }

    pub async fn upsert_barn(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        barn: &Barn,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO barns (id, name, capacity, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, \
                 capacity = excluded.capacity, \
                 updated_at = excluded.updated_at",
        )
        .bind(&barn.id)
        .bind(&barn.name)
        .bind(i64::from(barn.capacity))
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "barn"))?;
        Ok(())
    }

    pub async fn fetch_pen<'e, E>(&self, executor: E, id: &str) -> Result<Option<Pen>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, PenRow>(
            "SELECT id, barn_id, category, pen_type, capacity FROM pens WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(PenRow::into_domain))
    }

    pub async fn upsert_pen(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pen: &Pen,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pens (id, barn_id, category, pen_type, capacity, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 barn_id = excluded.barn_id, \
                 category = excluded.category, \
                 pen_type = excluded.pen_type, \
                 capacity = excluded.capacity, \
                 updated_at = excluded.updated_at",
        )
        .bind(&pen.id)
        .bind(&pen.barn_id)
        .bind(&pen.category)
        .bind(&pen.pen_type)
        .bind(i64::from(pen.capacity))
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "pen"))?;
        Ok(())
    }

    /// Sum of pen capacities in a barn, leaving out `excluding_pen`.
    pub async fn pen_capacity_in_barn<'e, E>(
        &self,
        executor: E,
        barn_id: &str,
        excluding_pen: Option<&str>,
    ) -> Result<i64, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(capacity), 0) AS allotted FROM pens \
             WHERE barn_id = ? AND (? IS NULL OR id <> ?)",
        )
        .bind(barn_id)
        .bind(excluding_pen)
        .bind(excluding_pen)
        .fetch_one(executor)
        .await?;
        Ok(row.get("allotted"))
    }

    pub async fn fetch_movement<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<Movement>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, MovementRow>(
            "SELECT id, animal_id, from_pen_id, to_pen_id, moved_at FROM movements WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(MovementRow::into_domain))
    }

    /// Appends to the movement log.
    pub async fn insert_movement(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        movement: &Movement,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO movements (id, animal_id, from_pen_id, to_pen_id, moved_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&movement.id)
        .bind(&movement.animal_id)
        .bind(&movement.from_pen_id)
        .bind(&movement.to_pen_id)
        .bind(to_rfc3339_exact(movement.moved_at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "movement"))?;
        Ok(())
    }

    /// Movement log in replay order: movement time, then insertion order.
    pub async fn list_movements<'e, E>(&self, executor: E) -> Result<Vec<Movement>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, MovementRow>(
            "SELECT id, animal_id, from_pen_id, to_pen_id, moved_at FROM movements \
             ORDER BY moved_at, seq",
        )
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(MovementRow::into_domain).collect())
    }

    pub async fn fetch_flock_inspection<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<FlockInspection>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, FlockInspectionRow>(
            "SELECT id, flock_id, inspected_on, dead_birds FROM flock_inspections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(FlockInspectionRow::into_domain))
    }

    pub async fn upsert_flock_inspection(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        inspection: &FlockInspection,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO flock_inspections (id, flock_id, inspected_on, dead_birds, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 inspected_on = excluded.inspected_on, \
                 dead_birds = excluded.dead_birds, \
                 updated_at = excluded.updated_at",
        )
        .bind(&inspection.id)
        .bind(&inspection.flock_id)
        .bind(inspection.inspected_on)
        .bind(i64::from(inspection.dead_birds))
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "flock_inspection"))?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BarnRow {
    id: String,
    name: String,
    capacity: i64,
}

impl BarnRow {
    fn into_domain(self) -> Barn {
        Barn {
            id: self.id,
            name: self.name,
            capacity: self.capacity as u32,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PenRow {
    id: String,
    barn_id: String,
    category: String,
    pen_type: String,
    capacity: i64,
}

impl PenRow {
    fn into_domain(self) -> Pen {
        Pen {
            id: self.id,
            barn_id: self.barn_id,
            category: self.category,
            pen_type: self.pen_type,
            capacity: self.capacity as u32,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: String,
    animal_id: String,
    from_pen_id: Option<String>,
    to_pen_id: String,
    moved_at: DateTime<Utc>,
}

impl MovementRow {
    fn into_domain(self) -> Movement {
        Movement {
            id: self.id,
            animal_id: self.animal_id,
            from_pen_id: self.from_pen_id,
            to_pen_id: self.to_pen_id,
            moved_at: self.moved_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FlockInspectionRow {
    id: String,
    flock_id: String,
    inspected_on: NaiveDate,
    dead_birds: i64,
}

impl FlockInspectionRow {
    fn into_domain(self) -> FlockInspection {
        FlockInspection {
            id: self.id,
            flock_id: self.flock_id,
            inspected_on: self.inspected_on,
            dead_birds: self.dead_birds as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use herdbook_core::types::{Movement, Pen};

    use crate::test_support::{at, seed_cow, seed_pens, setup_db};
    use crate::StorageError;

    #[tokio::test]
    async fn pen_capacity_sums_other_pens_in_barn() {
        let db = setup_db().await;
        seed_pens(&db, 20, &[("pen-1", 5), ("pen-2", 8)]).await;
        let housing = db.housing();

        let all = housing
            .pen_capacity_in_barn(db.pool(), "barn-1", None)
            .await
            .expect("sum");
        assert_eq!(all, 13);
        let others = housing
            .pen_capacity_in_barn(db.pool(), "barn-1", Some("pen-2"))
            .await
            .expect("sum");
        assert_eq!(others, 5);

        let orphan = Pen {
            id: "pen-9".to_string(),
            barn_id: "barn-missing".to_string(),
            category: "calves".to_string(),
            pen_type: "hutch".to_string(),
            capacity: 1,
        };
        let mut tx = db.begin().await.expect("begin");
        let err = housing.upsert_pen(&mut tx, &orphan, at()).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingReference("pen")));
    }

    #[tokio::test]
    async fn movements_keep_full_timestamp_precision_and_order() {
        let db = setup_db().await;
        seed_cow(&db, "a-1").await;
        seed_pens(&db, 20, &[("pen-1", 5), ("pen-2", 5)]).await;
        let housing = db.housing();

        let first = Movement {
            id: "mv-1".to_string(),
            animal_id: "a-1".to_string(),
            from_pen_id: None,
            to_pen_id: "pen-1".to_string(),
            moved_at: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
        };
        let second = Movement {
            id: "mv-2".to_string(),
            animal_id: "a-1".to_string(),
            from_pen_id: Some("pen-1".to_string()),
            to_pen_id: "pen-2".to_string(),
            moved_at: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
        };

        let mut tx = db.begin().await.expect("begin");
        housing.insert_movement(&mut tx, &second).await.expect("second");
        housing.insert_movement(&mut tx, &first).await.expect("first");
        let err = housing.insert_movement(&mut tx, &first).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict("movement")));
        tx.commit().await.expect("commit");

        let stored = housing
            .fetch_movement(db.pool(), "mv-1")
            .await
            .expect("fetch");
        assert_eq!(stored, Some(first.clone()));
        let log = housing.list_movements(db.pool()).await.expect("log");
        assert_eq!(log, vec![first, second]);
    }
}
