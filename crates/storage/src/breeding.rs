use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Sqlite, SqliteExecutor, Transaction};

use herdbook_core::types::{Insemination, Pregnancy};

use crate::{to_rfc3339, StorageError};

/// Repository for the breeding event log.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreedingRepository;

impl BreedingRepository {
    pub async fn fetch_insemination<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<Insemination>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, InseminationRow>(
            "SELECT id, animal_id, date, success, pregnancy_id FROM inseminations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(InseminationRow::into_domain))
    }

    pub async fn upsert_insemination(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        insemination: &Insemination,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO inseminations (id, animal_id, date, success, pregnancy_id, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 animal_id = excluded.animal_id, \
                 date = excluded.date, \
                 success = excluded.success, \
                 pregnancy_id = excluded.pregnancy_id, \
                 updated_at = excluded.updated_at",
        )
        .bind(&insemination.id)
        .bind(&insemination.animal_id)
        .bind(insemination.date)
        .bind(insemination.success)
        .bind(&insemination.pregnancy_id)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "insemination"))?;
        Ok(())
    }

    /// Links the pregnancy opened by a successful insemination.
    pub async fn link_pregnancy(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        insemination_id: &str,
        pregnancy_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE inseminations SET pregnancy_id = ?, updated_at = ? \
             WHERE id = ? AND pregnancy_id IS NULL",
        )
        .bind(pregnancy_id)
        .bind(to_rfc3339(at))
        .bind(insemination_id)
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "insemination"))?;
        Ok(())
    }

    pub async fn fetch_pregnancy<'e, E>(
        &self,
        executor: E,
        id: &str,
    ) -> Result<Option<Pregnancy>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, PregnancyRow>(
            "SELECT id, animal_id, start_date, calving_date, outcome FROM pregnancies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;
        row.map(PregnancyRow::into_domain).transpose()
    }

    pub async fn upsert_pregnancy(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pregnancy: &Pregnancy,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO pregnancies (id, animal_id, start_date, calving_date, outcome, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 animal_id = excluded.animal_id, \
                 start_date = excluded.start_date, \
                 calving_date = excluded.calving_date, \
                 outcome = excluded.outcome, \
                 updated_at = excluded.updated_at",
        )
        .bind(&pregnancy.id)
        .bind(&pregnancy.animal_id)
        .bind(pregnancy.start_date)
        .bind(pregnancy.calving_date)
        .bind(pregnancy.outcome.map(|outcome| outcome.as_str()))
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "pregnancy"))?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InseminationRow {
    id: String,
    animal_id: String,
    date: NaiveDate,
    success: bool,
    pregnancy_id: Option<String>,
}

impl InseminationRow {
    fn into_domain(self) -> Insemination {
        Insemination {
            id: self.id,
            animal_id: self.animal_id,
            date: self.date,
            success: self.success,
            pregnancy_id: self.pregnancy_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PregnancyRow {
    id: String,
    animal_id: String,
    start_date: NaiveDate,
    calving_date: Option<NaiveDate>,
    outcome: Option<String>,
}

impl PregnancyRow {
    fn into_domain(self) -> Result<Pregnancy, StorageError> {
        Ok(Pregnancy {
            id: self.id,
            animal_id: self.animal_id,
            start_date: self.start_date,
            calving_date: self.calving_date,
            outcome: self.outcome.as_deref().map(str::parse).transpose()?,
        })
    }
}
