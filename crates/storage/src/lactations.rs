use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, Sqlite, SqliteExecutor, SqlitePool, Transaction};

use herdbook_core::types::Lactation;

use crate::{to_rfc3339, StorageError};

/// Repository for derived lactation periods. Rows are only written by the cascade.
#[derive(Clone)]
pub struct LactationRepository {
    pub(crate) pool: SqlitePool,
}

impl LactationRepository {
    pub async fn fetch<'e, E>(&self, executor: E, id: &str) -> Result<Option<Lactation>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, LactationRow>(
            "SELECT id, animal_id, pregnancy_id, start_date, end_date, lactation_number \
             FROM lactations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(LactationRow::into_domain))
    }

    /// Most recently started lactation for the animal, open or closed.
    pub async fn latest_for_animal<'e, E>(
        &self,
        executor: E,
        animal_id: &str,
    ) -> Result<Option<Lactation>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, LactationRow>(
            "SELECT id, animal_id, pregnancy_id, start_date, end_date, lactation_number \
             FROM lactations WHERE animal_id = ? \
             ORDER BY start_date DESC, lactation_number DESC LIMIT 1",
        )
        .bind(animal_id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(LactationRow::into_domain))
    }

    /// Whether a lactation was already opened for the pregnancy.
    pub async fn exists_for_pregnancy<'e, E>(
        &self,
        executor: E,
        pregnancy_id: &str,
    ) -> Result<bool, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM lactations WHERE pregnancy_id = ?")
            .bind(pregnancy_id)
            .fetch_one(executor)
            .await?;
        let total: i64 = row.get("total");
        Ok(total > 0)
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        lactation: &Lactation,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO lactations \
             (id, animal_id, pregnancy_id, start_date, end_date, lactation_number, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&lactation.id)
        .bind(&lactation.animal_id)
        .bind(&lactation.pregnancy_id)
        .bind(lactation.start_date)
        .bind(lactation.end_date)
        .bind(i64::from(lactation.number))
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "lactation"))?;
        Ok(())
    }

    /// Closes an open lactation. Closing an already closed row is a no-op.
    pub async fn close(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        end_date: NaiveDate,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE lactations SET end_date = ? WHERE id = ? AND end_date IS NULL")
            .bind(end_date)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Lactation chain for one animal, in order.
    pub async fn list_for_animal(&self, animal_id: &str) -> Result<Vec<Lactation>, StorageError> {
        let rows = sqlx::query_as::<_, LactationRow>(
            "SELECT id, animal_id, pregnancy_id, start_date, end_date, lactation_number \
             FROM lactations WHERE animal_id = ? ORDER BY lactation_number",
        )
        .bind(animal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LactationRow::into_domain).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LactationRow {
    id: String,
    animal_id: String,
    pregnancy_id: Option<String>,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    lactation_number: i64,
}

impl LactationRow {
    fn into_domain(self) -> Lactation {
        Lactation {
            id: self.id,
            animal_id: self.animal_id,
            pregnancy_id: self.pregnancy_id,
            start_date: self.start_date,
            end_date: self.end_date,
            number: self.lactation_number as u32,
        }
    }
}
