use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Sqlite, SqliteExecutor, Transaction};

use herdbook_core::types::Animal;

use crate::{to_rfc3339, StorageError};

/// Repository for the animal registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnimalRepository;

const SELECT_ANIMAL: &str = "SELECT id, species, name, breed, sex, birth_date, status, \
     reproductive_status, date_of_death, head_count, current_pen_id FROM animals";

impl AnimalRepository {
    /// Loads one animal, typically inside the write transaction as a before image.
    pub async fn fetch<'e, E>(&self, executor: E, id: &str) -> Result<Option<Animal>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let row = sqlx::query_as::<_, AnimalRow>(&format!("{SELECT_ANIMAL} WHERE id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await?;
        row.map(AnimalRow::into_domain).transpose()
    }

    /// Inserts or replaces the animal row.
    pub async fn upsert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        animal: &Animal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO animals \
             (id, species, name, breed, sex, birth_date, status, reproductive_status, date_of_death, head_count, current_pen_id, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 species = excluded.species, \
                 name = excluded.name, \
                 breed = excluded.breed, \
                 sex = excluded.sex, \
                 birth_date = excluded.birth_date, \
                 status = excluded.status, \
                 reproductive_status = excluded.reproductive_status, \
                 date_of_death = excluded.date_of_death, \
                 head_count = excluded.head_count, \
                 current_pen_id = excluded.current_pen_id, \
                 updated_at = excluded.updated_at",
        )
        .bind(&animal.id)
        .bind(animal.species.as_str())
        .bind(&animal.name)
        .bind(&animal.breed)
        .bind(animal.sex.map(|sex| sex.as_str()))
        .bind(animal.birth_date)
        .bind(animal.status.as_str())
        .bind(animal.reproductive_status.as_str())
        .bind(animal.date_of_death)
        .bind(i64::from(animal.head_count))
        .bind(&animal.current_pen_id)
        .bind(to_rfc3339(at))
        .execute(&mut **tx)
        .await
        .map_err(|err| StorageError::constraint(err, "animal"))?;

        Ok(())
    }

    /// Points the animal at the pen it was last moved into.
    pub async fn set_current_pen(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        animal_id: &str,
        pen_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE animals SET current_pen_id = ?, updated_at = ? WHERE id = ?")
            .bind(pen_id)
            .bind(to_rfc3339(at))
            .bind(animal_id)
            .execute(&mut **tx)
            .await
            .map_err(|err| StorageError::constraint(err, "animal"))?;
        Ok(())
    }

    /// Lists the whole registry, ordered by id.
    pub async fn list<'e, E>(&self, executor: E) -> Result<Vec<Animal>, StorageError>
    where
        E: SqliteExecutor<'e>,
    {
        let rows = sqlx::query_as::<_, AnimalRow>(&format!("{SELECT_ANIMAL} ORDER BY id"))
            .fetch_all(executor)
            .await?;
        rows.into_iter().map(AnimalRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AnimalRow {
    id: String,
    species: String,
    name: String,
    breed: String,
    sex: Option<String>,
    birth_date: NaiveDate,
    status: String,
    reproductive_status: String,
    date_of_death: Option<NaiveDate>,
    head_count: i64,
    current_pen_id: Option<String>,
}

impl AnimalRow {
    fn into_domain(self) -> Result<Animal, StorageError> {
        Ok(Animal {
            id: self.id,
            species: self.species.parse()?,
            name: self.name,
            breed: self.breed,
            sex: self.sex.as_deref().map(str::parse).transpose()?,
            birth_date: self.birth_date,
            status: self.status.parse()?,
            reproductive_status: self.reproductive_status.parse()?,
            date_of_death: self.date_of_death,
            head_count: self.head_count as u32,
            current_pen_id: self.current_pen_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use herdbook_core::types::{AnimalStatus, Species};

    use crate::test_support::{at, cow, date, seed_cow, seed_pens, setup_db};
    use crate::StorageError;

    #[tokio::test]
    async fn upsert_round_trips_and_updates_in_place() {
        let db = setup_db().await;
        let mut animal = seed_cow(&db, "a-1").await;

        let loaded = db
            .animals()
            .fetch(db.pool(), "a-1")
            .await
            .expect("fetch")
            .expect("animal exists");
        assert_eq!(loaded, animal);

        animal.status = AnimalStatus::Dead;
        animal.date_of_death = Some(date(2024, 2, 1));
        let mut tx = db.begin().await.expect("begin");
        db.animals()
            .upsert(&mut tx, &animal, at())
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        let all = db.animals().list(db.pool()).await.expect("list");
        assert_eq!(all, vec![animal]);
    }

    #[tokio::test]
    async fn current_pen_must_reference_a_pen() {
        let db = setup_db().await;
        seed_cow(&db, "a-1").await;
        seed_pens(&db, 10, &[("pen-1", 5)]).await;

        let mut tx = db.begin().await.expect("begin");
        db.animals()
            .set_current_pen(&mut tx, "a-1", "pen-1", at())
            .await
            .expect("known pen");
        let err = db
            .animals()
            .set_current_pen(&mut tx, "a-1", "pen-missing", at())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingReference("animal")));
    }

    #[tokio::test]
    async fn unknown_stored_status_is_a_decode_error() {
        let db = setup_db().await;
        let mut flock = cow("f-1");
        flock.species = Species::Poultry;
        flock.sex = None;
        flock.head_count = 250;
        let mut tx = db.begin().await.expect("begin");
        db.animals()
            .upsert(&mut tx, &flock, at())
            .await
            .expect("insert flock");
        tx.commit().await.expect("commit");

        sqlx::query("UPDATE animals SET status = 'missing' WHERE id = 'f-1'")
            .execute(db.pool())
            .await
            .expect("corrupt row");
        let err = db.animals().fetch(db.pool(), "f-1").await.unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
    }
}
