use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqliteExecutor, Transaction};

use herdbook_core::types::{CullingRecord, QuarantineRecord};

use crate::{to_rfc3339, StorageError};

/// Repository for culling and quarantine records.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthRepository;

impl HealthRepository {
    pub async fn fetch_culling<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<CullingRecord>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, CullingRow>(
            "SELECT id, animal_id, reason, date, notes FROM culling_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(CullingRow::into_domain))
    }

    /// Writes a culling record. A second record for the same animal is a conflict.
    pub async fn upsert_culling(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &CullingRecord,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO culling_records (id, animal_id, reason, date, notes, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 reason = excluded.reason, \
                 date = excluded.date, \
                 notes = excluded.notes, \
                 updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.animal_id)
        .bind(&record.reason)
        .bind(record.date)
        .bind(&record.notes)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "culling"))?;
        Ok(())
    }

    pub async fn fetch_quarantine<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<QuarantineRecord>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, QuarantineRow>(
            "SELECT id, animal_id, reason, start_date, end_date FROM quarantine_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(QuarantineRow::into_domain))
    }

    pub async fn upsert_quarantine(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &QuarantineRecord,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO quarantine_records (id, animal_id, reason, start_date, end_date, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 reason = excluded.reason, \
                 start_date = excluded.start_date, \
                 end_date = excluded.end_date, \
                 updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.animal_id)
        .bind(&record.reason)
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "quarantine"))?;
        Ok(())
    }

    /// Whether any quarantine for the animal is still open.
    pub async fn has_active_quarantine<'e, E>(
        &self,
        executor: E,
        animal_id: &str,
    ) -> Result<bool, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active FROM quarantine_records \
             WHERE animal_id = ? AND start_date IS NOT NULL AND end_date IS NULL",
        )
        .bind(animal_id)
        .fetch_one(executor)
        .await?;
        let active: i64 = row.get("active");
        Ok(active > 0)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CullingRow {
    id: String,
    animal_id: String,
    reason: String,
    date: NaiveDate,
    notes: Option<String>,
}

impl CullingRow {
    fn into_domain(self) -> CullingRecord {
        CullingRecord {
            id: self.id,
            animal_id: self.animal_id,
            reason: self.reason,
            date: self.date,
            notes: self.notes,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QuarantineRow {
    id: String,
    animal_id: String,
    reason: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl QuarantineRow {
    fn into_domain(self) -> QuarantineRecord {
        QuarantineRecord {
            id: self.id,
            animal_id: self.animal_id,
            reason: self.reason,
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use herdbook_core::types::{CullingRecord, QuarantineRecord};

    use crate::test_support::{at, date, seed_cow, setup_db};
    use crate::StorageError;

    #[tokio::test]
    async fn one_culling_record_per_animal() {
        let db = setup_db().await;
        seed_cow(&db, "a-1").await;
        let culling = |id: &str| CullingRecord {
            id: id.to_string(),
            animal_id: "a-1".to_string(),
            reason: "lameness".to_string(),
            date: date(2024, 3, 1),
            notes: None,
        };

        let mut tx = db.begin().await.expect("begin");
        db.health()
            .upsert_culling(&mut tx, &culling("c-1"), at())
            .await
            .expect("first culling");
        let err = db
            .health()
            .upsert_culling(&mut tx, &culling("c-2"), at())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict("culling")));
    }

    #[tokio::test]
    async fn active_quarantine_tracks_end_date() {
        let db = setup_db().await;
        seed_cow(&db, "a-1").await;
        let mut record = QuarantineRecord {
            id: "q-1".to_string(),
            animal_id: "a-1".to_string(),
            reason: "mastitis".to_string(),
            start_date: Some(date(2024, 1, 1)),
            end_date: None,
        };

        let mut tx = db.begin().await.expect("begin");
        db.health()
            .upsert_quarantine(&mut tx, &record, at())
            .await
            .expect("open");
        assert!(db
            .health()
            .has_active_quarantine(&mut *tx, "a-1")
            .await
            .expect("active"));

        record.end_date = Some(date(2024, 1, 10));
        db.health()
            .upsert_quarantine(&mut tx, &record, at())
            .await
            .expect("close");
        assert!(!db
            .health()
            .has_active_quarantine(&mut *tx, "a-1")
            .await
            .expect("inactive"));
        tx.commit().await.expect("commit");

        let stored = db
            .health()
            .fetch_quarantine(db.pool(), "q-1")
            .await
            .expect("fetch");
        assert_eq!(stored, Some(record));
    }
}
