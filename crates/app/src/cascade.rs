use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use herdbook_core::cascade::{
    plan, prepare, CascadeQueue, PreWrite, Reaction, RecordSave, RuleViolation, Save, SaveOutcome,
};
use herdbook_core::lactation::{self, LactationError};
use herdbook_core::types::{
    Animal, AnimalStatus, Barn, CullingRecord, FlockInspection, HerdCounts, Insemination,
    Lactation, MilkRecord, Movement, Pen, Pregnancy, QuarantineRecord, Sex, Species,
};
use herdbook_storage::{Database, OccupancyError, StorageError, DAIRY_POPULATION};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// A persisted record together with what the save did to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Saved<T> {
    pub record: T,
    pub outcome: SaveOutcome,
}

/// Record types that go through the cascade.
trait Watched: Clone + PartialEq + Sized {
    fn id(&self) -> &str;
    fn wrap(save: Save<Self>) -> RecordSave;
    fn unwrap(save: RecordSave) -> Option<Save<Self>>;
}

macro_rules! watched {
    ($ty:ty, $variant:ident) => {
        impl Watched for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn wrap(save: Save<Self>) -> RecordSave {
                RecordSave::$variant(save)
            }

            fn unwrap(save: RecordSave) -> Option<Save<Self>> {
                match save {
                    RecordSave::$variant(save) => Some(save),
                    _ => None,
                }
            }
        }
    };
}

watched!(Animal, Animal);
watched!(Insemination, Insemination);
watched!(Pregnancy, Pregnancy);
watched!(MilkRecord, MilkRecord);
watched!(CullingRecord, Culling);
watched!(QuarantineRecord, Quarantine);
watched!(Barn, Barn);
watched!(Pen, Pen);
watched!(Movement, Movement);
watched!(FlockInspection, FlockInspection);

/// Persists primary records and applies their derived writes in the same transaction.
#[derive(Clone)]
pub struct CascadeDispatcher {
    database: Database,
    clock: Clock,
}

impl CascadeDispatcher {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn save_animal(&self, animal: Animal) -> Result<Saved<Animal>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self.database.animals().fetch(&mut *tx, &animal.id).await?;
        self.dispatch(tx, Save::new(before, animal)).await
    }

    pub async fn save_insemination(
        &self,
        insemination: Insemination,
    ) -> Result<Saved<Insemination>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .breeding()
            .fetch_insemination(&mut *tx, &insemination.id)
            .await?;
        self.dispatch(tx, Save::new(before, insemination)).await
    }

    pub async fn save_pregnancy(
        &self,
        pregnancy: Pregnancy,
    ) -> Result<Saved<Pregnancy>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .breeding()
            .fetch_pregnancy(&mut *tx, &pregnancy.id)
            .await?;
        self.dispatch(tx, Save::new(before, pregnancy)).await
    }

    pub async fn save_milk_record(
        &self,
        record: MilkRecord,
    ) -> Result<Saved<MilkRecord>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self.database.milk().fetch(&mut *tx, &record.id).await?;
        self.dispatch(tx, Save::new(before, record)).await
    }

    pub async fn save_culling(
        &self,
        record: CullingRecord,
    ) -> Result<Saved<CullingRecord>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .health()
            .fetch_culling(&mut *tx, &record.id)
            .await?;
        self.dispatch(tx, Save::new(before, record)).await
    }

    pub async fn save_quarantine(
        &self,
        record: QuarantineRecord,
    ) -> Result<Saved<QuarantineRecord>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .health()
            .fetch_quarantine(&mut *tx, &record.id)
            .await?;
        self.dispatch(tx, Save::new(before, record)).await
    }

    pub async fn save_barn(&self, barn: Barn) -> Result<Saved<Barn>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self.database.housing().fetch_barn(&mut *tx, &barn.id).await?;
        self.dispatch(tx, Save::new(before, barn)).await
    }

    pub async fn save_pen(&self, pen: Pen) -> Result<Saved<Pen>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self.database.housing().fetch_pen(&mut *tx, &pen.id).await?;
        self.dispatch(tx, Save::new(before, pen)).await
    }

    pub async fn save_movement(&self, movement: Movement) -> Result<Saved<Movement>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .housing()
            .fetch_movement(&mut *tx, &movement.id)
            .await?;
        self.dispatch(tx, Save::new(before, movement)).await
    }

    pub async fn save_flock_inspection(
        &self,
        inspection: FlockInspection,
    ) -> Result<Saved<FlockInspection>, CascadeError> {
        let mut tx = self.database.begin().await?;
        let before = self
            .database
            .housing()
            .fetch_flock_inspection(&mut *tx, &inspection.id)
            .await?;
        self.dispatch(tx, Save::new(before, inspection)).await
    }

    async fn dispatch<T: Watched>(
        &self,
        tx: Transaction<'static, Sqlite>,
        save: Save<T>,
    ) -> Result<Saved<T>, CascadeError> {
        let started = Instant::now();
        let mut save = T::wrap(save);
        let record = save.record_type();

        let outcome = match self.apply(tx, &mut save).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let class = err.class();
                counter!("cascade_rejections_total", "class" => class.as_str()).increment(1);
                if class == ErrorClass::Internal {
                    warn!(stage = "cascade", record, error = %err, "cascade failed");
                } else {
                    debug!(stage = "cascade", record, error = %err, "cascade rejected write");
                }
                return Err(err);
            }
        };

        counter!("cascade_writes_total", "record" => record, "outcome" => outcome.as_str())
            .increment(1);
        histogram!("cascade_apply_seconds").record(started.elapsed().as_secs_f64());

        let save = T::unwrap(save).ok_or(CascadeError::RecordMismatch(record))?;
        info!(
            stage = "cascade",
            record,
            id = save.after.id(),
            outcome = outcome.as_str(),
            "record saved"
        );
        Ok(Saved {
            record: save.after,
            outcome,
        })
    }

    /// Runs one save end to end. Dropping `tx` on any error rolls the whole cascade back.
    async fn apply(
        &self,
        mut tx: Transaction<'static, Sqlite>,
        save: &mut RecordSave,
    ) -> Result<SaveOutcome, CascadeError> {
        prepare(save);
        let outcome = save.outcome();
        if outcome == SaveOutcome::Unchanged {
            return Ok(outcome);
        }

        let planned = plan(save)?;
        self.validate(&mut tx, save).await?;

        let now = self.now();
        for step in &planned.pre_write {
            self.pre_write(&mut tx, save, step).await?;
        }
        self.write_primary(&mut tx, save, now).await?;

        let mut queue = CascadeQueue::new(planned.post_write);
        while let Some(reaction) = queue.pop() {
            counter!("cascade_reactions_total", "reaction" => reaction.kind()).increment(1);
            self.react(&mut tx, save, reaction, &mut queue, now).await?;
        }

        tx.commit().await.map_err(StorageError::from)?;
        Ok(outcome)
    }

    /// Checks that need persisted state and therefore cannot live in the planner.
    async fn validate(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        save: &RecordSave,
    ) -> Result<(), CascadeError> {
        match save {
            RecordSave::Insemination(Save { before, after }) => {
                let animal = self.load_animal(tx, &after.animal_id).await?;
                if !is_dairy_female(&animal) {
                    return Err(CascadeError::NotBreedable(animal.id));
                }
                if let (None, Some(pregnancy_id)) = (before, &after.pregnancy_id) {
                    let pregnancy = self
                        .database
                        .breeding()
                        .fetch_pregnancy(&mut **tx, pregnancy_id)
                        .await?
                        .ok_or_else(|| CascadeError::not_found("pregnancy", pregnancy_id))?;
                    if pregnancy.animal_id != after.animal_id {
                        return Err(CascadeError::PregnancyMismatch {
                            pregnancy_id: pregnancy.id,
                            animal_id: after.animal_id.clone(),
                        });
                    }
                }
            }
            RecordSave::Pregnancy(Save { after, .. }) => {
                let animal = self.load_animal(tx, &after.animal_id).await?;
                if !is_dairy_female(&animal) {
                    return Err(CascadeError::NotBreedable(animal.id));
                }
            }
            RecordSave::MilkRecord(Save { after, .. }) => {
                let animal = self.load_animal(tx, &after.animal_id).await?;
                if !is_dairy_female(&animal) {
                    return Err(CascadeError::NotMilkable(animal.id));
                }
                if let Some(lactation_id) = &after.lactation_id {
                    let lactation = self
                        .database
                        .lactations()
                        .fetch(&mut **tx, lactation_id)
                        .await?
                        .ok_or_else(|| CascadeError::not_found("lactation", lactation_id))?;
                    if lactation.animal_id != after.animal_id {
                        return Err(CascadeError::LactationMismatch {
                            lactation_id: lactation.id,
                            animal_id: after.animal_id.clone(),
                        });
                    }
                }
            }
            RecordSave::Barn(Save {
                before: Some(_),
                after,
            }) => {
                let allotted = self
                    .database
                    .housing()
                    .pen_capacity_in_barn(&mut **tx, &after.id, None)
                    .await?;
                if allotted > i64::from(after.capacity) {
                    return Err(CascadeError::BarnOverAllotted {
                        barn_id: after.id.clone(),
                        capacity: i64::from(after.capacity),
                        allotted,
                    });
                }
            }
            RecordSave::Pen(Save { before, after }) => {
                let barn = self
                    .database
                    .housing()
                    .fetch_barn(&mut **tx, &after.barn_id)
                    .await?
                    .ok_or_else(|| CascadeError::not_found("barn", &after.barn_id))?;
                let others = self
                    .database
                    .housing()
                    .pen_capacity_in_barn(&mut **tx, &barn.id, Some(&after.id))
                    .await?;
                let allotted = others + i64::from(after.capacity);
                if allotted > i64::from(barn.capacity) {
                    return Err(CascadeError::BarnOverAllotted {
                        barn_id: barn.id,
                        capacity: i64::from(barn.capacity),
                        allotted,
                    });
                }
                if let Some(before) = before {
                    let occupancy = self
                        .database
                        .inventory()
                        .pen_occupancy(&mut **tx, &before.id)
                        .await
                        .map_err(StorageError::from)?
                        .map_or(0, |current| current.occupancy);
                    if occupancy > i64::from(after.capacity) {
                        return Err(CascadeError::CapacityBelowOccupancy {
                            pen_id: after.id.clone(),
                            capacity: i64::from(after.capacity),
                            occupancy,
                        });
                    }
                }
            }
            RecordSave::Movement(Save { after, .. }) => {
                let animal = self.load_animal(tx, &after.animal_id).await?;
                if animal.status.is_terminal() {
                    return Err(CascadeError::TerminalAnimal {
                        animal_id: animal.id,
                        status: animal.status,
                    });
                }
                if animal.current_pen_id != after.from_pen_id {
                    return Err(CascadeError::StaleSource {
                        movement_id: after.id.clone(),
                        animal_id: animal.id,
                    });
                }
            }
            RecordSave::FlockInspection(Save { after, .. }) => {
                let flock = self.load_animal(tx, &after.flock_id).await?;
                if flock.species != Species::Poultry {
                    return Err(CascadeError::NotAFlock(flock.id));
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn pre_write(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        save: &mut RecordSave,
        step: &PreWrite,
    ) -> Result<(), CascadeError> {
        match step {
            PreWrite::ResolveLactation { animal_id } => {
                let latest = self
                    .database
                    .lactations()
                    .latest_for_animal(&mut **tx, animal_id)
                    .await?
                    .ok_or_else(|| CascadeError::NoLactation(animal_id.clone()))?;
                if let RecordSave::MilkRecord(save) = save {
                    debug!(
                        stage = "cascade",
                        record = "milk_record",
                        id = %save.after.id,
                        lactation_id = %latest.id,
                        "resolved lactation"
                    );
                    save.after.lactation_id = Some(latest.id);
                }
            }
        }
        Ok(())
    }

    async fn write_primary(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        save: &RecordSave,
        at: DateTime<Utc>,
    ) -> Result<(), CascadeError> {
        let db = &self.database;
        match save {
            RecordSave::Animal(save) => db.animals().upsert(tx, &save.after, at).await?,
            RecordSave::Insemination(save) => {
                db.breeding()
                    .upsert_insemination(tx, &save.after, at)
                    .await?
            }
            RecordSave::Pregnancy(save) => db.breeding().upsert_pregnancy(tx, &save.after, at).await?,
            RecordSave::MilkRecord(save) => db.milk().upsert(tx, &save.after, at).await?,
            RecordSave::Culling(save) => db.health().upsert_culling(tx, &save.after, at).await?,
            RecordSave::Quarantine(save) => {
                db.health().upsert_quarantine(tx, &save.after, at).await?
            }
            RecordSave::Barn(save) => db.housing().upsert_barn(tx, &save.after, at).await?,
            RecordSave::Pen(save) => db.housing().upsert_pen(tx, &save.after, at).await?,
            RecordSave::Movement(save) => db.housing().insert_movement(tx, &save.after).await?,
            RecordSave::FlockInspection(save) => {
                db.housing()
                    .upsert_flock_inspection(tx, &save.after, at)
                    .await?
            }
        }
        Ok(())
    }

    async fn react(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        save: &mut RecordSave,
        reaction: Reaction,
        queue: &mut CascadeQueue,
        at: DateTime<Utc>,
    ) -> Result<(), CascadeError> {
        let db = &self.database;
        match reaction {
            Reaction::SetAnimalStatus { animal_id, status } => {
                let animal = self.load_animal(tx, &animal_id).await?;
                if animal.status == status {
                    return Ok(());
                }
                if animal.status.is_terminal() {
                    return Err(CascadeError::TerminalAnimal {
                        animal_id,
                        status: animal.status,
                    });
                }
                self.change_status(tx, animal, status, queue, at).await?;
            }
            Reaction::ReleaseQuarantine { animal_id } => {
                let animal = self.load_animal(tx, &animal_id).await?;
                if animal.status != AnimalStatus::Quarantined {
                    return Ok(());
                }
                if db.health().has_active_quarantine(&mut **tx, &animal_id).await? {
                    return Ok(());
                }
                self.change_status(tx, animal, AnimalStatus::Alive, queue, at)
                    .await?;
            }
            Reaction::SetReproductiveStatus { animal_id, status } => {
                let mut animal = self.load_animal(tx, &animal_id).await?;
                if animal.reproductive_status != status {
                    animal.reproductive_status = status;
                    db.animals().upsert(tx, &animal, at).await?;
                }
            }
            Reaction::OpenPregnancy {
                insemination_id,
                animal_id,
                start_date,
            } => {
                let pregnancy = Pregnancy {
                    id: Uuid::new_v4().to_string(),
                    animal_id,
                    start_date,
                    calving_date: None,
                    outcome: None,
                };
                db.breeding().upsert_pregnancy(tx, &pregnancy, at).await?;
                db.breeding()
                    .link_pregnancy(tx, &insemination_id, &pregnancy.id, at)
                    .await?;
                if let RecordSave::Insemination(save) = save {
                    save.after.pregnancy_id = Some(pregnancy.id.clone());
                }
                let follow_up = plan(&RecordSave::Pregnancy(Save::new(None, pregnancy)))?;
                queue.extend(follow_up.post_write);
            }
            Reaction::ChainLactation {
                animal_id,
                pregnancy_id,
                calving_date,
            } => {
                let lactations = db.lactations();
                if lactations
                    .exists_for_pregnancy(&mut **tx, &pregnancy_id)
                    .await?
                {
                    return Ok(());
                }
                let previous = lactations.latest_for_animal(&mut **tx, &animal_id).await?;
                let transition = lactation::chain(previous.as_ref(), calving_date)?;
                if let Some((previous_id, end_date)) = &transition.close {
                    lactations.close(tx, previous_id, *end_date).await?;
                }
                let opened = Lactation {
                    id: Uuid::new_v4().to_string(),
                    animal_id,
                    pregnancy_id: Some(pregnancy_id),
                    start_date: transition.open.start_date,
                    end_date: None,
                    number: transition.open.number,
                };
                lactations.insert(tx, &opened, at).await?;
                debug!(
                    stage = "cascade",
                    animal_id = %opened.animal_id,
                    lactation = opened.number,
                    "lactation opened"
                );
            }
            Reaction::AdjustHerd { species, delta } => {
                db.inventory().adjust_herd(tx, species, &delta, at).await?;
            }
            Reaction::InitPenInventory { pen_id } => {
                db.inventory().init_pen(tx, &pen_id, at).await?;
            }
            Reaction::TransferAnimal { movement } => {
                let inventory = db.inventory();
                if let Some(from) = &movement.from_pen_id {
                    inventory
                        .adjust_pen(tx, from, -1, Some(&movement.id), at)
                        .await?;
                }
                inventory
                    .adjust_pen(tx, &movement.to_pen_id, 1, Some(&movement.id), at)
                    .await?;

                let to_barn = self.barn_of(tx, &movement.to_pen_id).await?;
                let from_barn = match &movement.from_pen_id {
                    Some(from) => Some(self.barn_of(tx, from).await?),
                    None => None,
                };
                if from_barn.as_ref() != Some(&to_barn) {
                    if let Some(from_barn) = &from_barn {
                        inventory
                            .record_barn_change(tx, from_barn, -1, Some(&movement.id), at)
                            .await?;
                    }
                    inventory
                        .record_barn_change(tx, &to_barn, 1, Some(&movement.id), at)
                        .await?;
                }

                db.animals()
                    .set_current_pen(tx, &movement.animal_id, &movement.to_pen_id, at)
                    .await?;
            }
            Reaction::AdjustMilk { change_kg, .. } => {
                db.inventory()
                    .adjust_milk(tx, DAIRY_POPULATION, change_kg, at)
                    .await?;
            }
            Reaction::InitFlockInventory { flock_id, birds } => {
                db.inventory().init_flock(tx, &flock_id, birds, at).await?;
            }
            Reaction::RecordFlockMortality {
                flock_id,
                dead_delta,
            } => {
                let flock = self.load_animal(tx, &flock_id).await?;
                db.inventory()
                    .record_flock_mortality(
                        tx,
                        &flock_id,
                        dead_delta,
                        i64::from(flock.head_count),
                        at,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn change_status(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        mut animal: Animal,
        status: AnimalStatus,
        queue: &mut CascadeQueue,
        at: DateTime<Utc>,
    ) -> Result<(), CascadeError> {
        let previous = animal.clone();
        animal.status = status;
        self.database.animals().upsert(tx, &animal, at).await?;

        let delta = HerdCounts::delta(Some(&previous), &animal);
        if !delta.is_zero() {
            queue.push(Reaction::AdjustHerd {
                species: animal.species,
                delta,
            });
        }
        Ok(())
    }

    async fn barn_of(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        pen_id: &str,
    ) -> Result<String, CascadeError> {
        self.database
            .housing()
            .fetch_pen(&mut **tx, pen_id)
            .await?
            .map(|pen| pen.barn_id)
            .ok_or_else(|| CascadeError::not_found("pen", pen_id))
    }

    async fn load_animal(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        animal_id: &str,
    ) -> Result<Animal, CascadeError> {
        self.database
            .animals()
            .fetch(&mut **tx, animal_id)
            .await?
            .ok_or_else(|| CascadeError::not_found("animal", animal_id))
    }
}

fn is_dairy_female(animal: &Animal) -> bool {
    animal.species == Species::Cattle && animal.sex == Some(Sex::Female)
}

/// How a cascade failure should be reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Precondition,
    Reference,
    Conflict,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Reference => "reference",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error(transparent)]
    Rule(#[from] RuleViolation),
    #[error(transparent)]
    Lactation(#[from] LactationError),
    #[error("animal {0} has no lactation to attach milk to")]
    NoLactation(String),
    #[error("lactation {lactation_id} does not belong to animal {animal_id}")]
    LactationMismatch {
        lactation_id: String,
        animal_id: String,
    },
    #[error("pregnancy {pregnancy_id} does not belong to animal {animal_id}")]
    PregnancyMismatch {
        pregnancy_id: String,
        animal_id: String,
    },
    #[error("animal {0} is not a female dairy animal and gives no milk")]
    NotMilkable(String),
    #[error("animal {0} is not a female dairy animal and cannot be bred")]
    NotBreedable(String),
    #[error("animal {0} is not a poultry flock")]
    NotAFlock(String),
    #[error("{record} {id} not found")]
    NotFound { record: &'static str, id: String },
    #[error("animal {animal_id} is {status} and can no longer change")]
    TerminalAnimal {
        animal_id: String,
        status: AnimalStatus,
    },
    #[error("movement {movement_id} does not start from the current pen of animal {animal_id}")]
    StaleSource {
        movement_id: String,
        animal_id: String,
    },
    #[error("pen {pen_id} capacity {capacity} is below its occupancy of {occupancy}")]
    CapacityBelowOccupancy {
        pen_id: String,
        capacity: i64,
        occupancy: i64,
    },
    #[error("barn {barn_id} capacity {capacity} cannot hold pens totalling {allotted}")]
    BarnOverAllotted {
        barn_id: String,
        capacity: i64,
        allotted: i64,
    },
    #[error(transparent)]
    Occupancy(#[from] OccupancyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cascade returned a {0} save for another record type")]
    RecordMismatch(&'static str),
}

impl CascadeError {
    fn not_found(record: &'static str, id: &str) -> Self {
        Self::NotFound {
            record,
            id: id.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Rule(
                RuleViolation::AppendOnly { .. }
                | RuleViolation::OutcomeFinal(_)
                | RuleViolation::InseminationLinked(_),
            ) => ErrorClass::Conflict,
            Self::Rule(_)
            | Self::Lactation(_)
            | Self::NoLactation(_)
            | Self::LactationMismatch { .. }
            | Self::PregnancyMismatch { .. }
            | Self::NotMilkable(_)
            | Self::NotBreedable(_)
            | Self::NotAFlock(_)
            | Self::CapacityBelowOccupancy { .. }
            | Self::BarnOverAllotted { .. } => ErrorClass::Precondition,
            Self::NotFound { .. } => ErrorClass::Reference,
            Self::TerminalAnimal { .. } | Self::StaleSource { .. } => ErrorClass::Conflict,
            Self::Occupancy(err) => match err {
                OccupancyError::PenFull(_)
                | OccupancyError::PenEmpty(_)
                | OccupancyError::FlockExhausted { .. } => ErrorClass::Conflict,
                OccupancyError::UnknownPen(_) | OccupancyError::UnknownFlock(_) => {
                    ErrorClass::Reference
                }
                OccupancyError::Database(_) => ErrorClass::Internal,
            },
            Self::Storage(StorageError::Conflict(_)) => ErrorClass::Conflict,
            Self::Storage(StorageError::MissingReference(_)) => ErrorClass::Reference,
            Self::Storage(_) | Self::RecordMismatch(_) => ErrorClass::Internal,
        }
    }
}
