use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqliteExecutor, SqlitePool, Transaction};

use herdbook_core::types::MilkRecord;

use crate::{to_rfc3339, StorageError};

/// Repository for daily milk yield records.
#[derive(Clone)]
pub struct MilkRepository {
    pub(crate) pool: SqlitePool,
}

impl MilkRepository {
    pub async fn fetch<'e, E>(&self, executor: E, id: &str) -> Result<Option<MilkRecord>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, MilkRecordRow>(
            "SELECT id, animal_id, lactation_id, amount_kg, milked_on FROM milk_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(MilkRecordRow::into_domain))
    }

    /// Writes a record whose lactation has already been resolved.
    pub async fn upsert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &MilkRecord,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let Some(lactation_id) = record.lactation_id.as_deref() else {
            return Err(StorageError::MissingReference("milk_record"));
        };
        sqlx::query(
            "INSERT INTO milk_records (id, animal_id, lactation_id, amount_kg, milked_on, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 animal_id = excluded.animal_id, \
                 lactation_id = excluded.lactation_id, \
                 amount_kg = excluded.amount_kg, \
                 milked_on = excluded.milked_on, \
                 updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.animal_id)
        .bind(lactation_id)
        .bind(record.amount_kg)
        .bind(record.milked_on)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "milk_record"))?;
        Ok(())
    }

    /// Recount source for the dairy milk total.
    pub async fn total_kg<'e, E>(&self, executor: E) -> Result<f64, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query("SELECT COALESCE(SUM(amount_kg), 0.0) AS total FROM milk_records")
            .fetch_one(executor)
            .await?;
        Ok(row.get("total"))
    }

    /// Records attached to one lactation, by milking date.
    pub async fn list_for_lactation(
        &self,
        lactation_id: &str,
    ) -> Result<Vec<MilkRecord>, StorageError> {
        let rows = sqlx::query_as::<_, MilkRecordRow>(
            "SELECT id, animal_id, lactation_id, amount_kg, milked_on FROM milk_records \
             WHERE lactation_id = ? ORDER BY milked_on, id",
        )
        .bind(lactation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MilkRecordRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MilkRecordRow {
    id: String,
    animal_id: String,
    lactation_id: String,
    amount_kg: f64,
    milked_on: NaiveDate,
}

impl MilkRecordRow {
    fn into_domain(self) -> MilkRecord {
        MilkRecord {
            id: self.id,
            animal_id: self.animal_id,
            lactation_id: Some(self.lactation_id),
            amount_kg: self.amount_kg,
            milked_on: self.milked_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use herdbook_core::types::{Lactation, MilkRecord};

    use crate::test_support::{at, date, seed_cow, setup_db};
    use crate::StorageError;

    #[tokio::test]
    async fn totals_sum_all_records() {
        let db = setup_db().await;
        seed_cow(&db, "a-1").await;
        let mut tx = db.begin().await.expect("begin");
        db.lactations()
            .insert(
                &mut tx,
                &Lactation {
                    id: "l-1".to_string(),
                    animal_id: "a-1".to_string(),
                    pregnancy_id: None,
                    start_date: date(2024, 1, 1),
                    end_date: None,
                    number: 1,
                },
                at(),
            )
            .await
            .expect("lactation");
        for (id, amount) in [("m-1", 12.5), ("m-2", 14.25)] {
            let record = MilkRecord {
                id: id.to_string(),
                animal_id: "a-1".to_string(),
                lactation_id: Some("l-1".to_string()),
                amount_kg: amount,
                milked_on: date(2024, 1, 2),
            };
            db.milk().upsert(&mut tx, &record, at()).await.expect("milk");
        }
        tx.commit().await.expect("commit");

        assert_eq!(db.milk().total_kg(db.pool()).await.expect("total"), 26.75);
        assert_eq!(
            db.milk().list_for_lactation("l-1").await.expect("list").len(),
            2
        );
    }

    #[tokio::test]
    async fn unresolved_lactation_is_refused() {
        let db = setup_db().await;
        let record = MilkRecord {
            id: "m-1".to_string(),
            animal_id: "a-1".to_string(),
            lactation_id: None,
            amount_kg: 3.0,
            milked_on: date(2024, 1, 2),
        };
        let mut tx = db.begin().await.expect("begin");
        let err = db.milk().upsert(&mut tx, &record, at()).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingReference("milk_record")));
    }
}
