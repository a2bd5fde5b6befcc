use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::types::{
    Animal, AnimalStatus, Barn, CullingRecord, FlockInspection, HerdCounts, Insemination,
    MilkRecord, Movement, Pen, Pregnancy, PregnancyOutcome, QuarantineRecord, ReproductiveStatus,
    Species,
};

/// Before and after images of one primary write.
#[derive(Debug, Clone, PartialEq)]
pub struct Save<T> {
    pub before: Option<T>,
    pub after: T,
}

impl<T: PartialEq> Save<T> {
    pub fn new(before: Option<T>, after: T) -> Self {
        Self { before, after }
    }

    pub fn is_created(&self) -> bool {
        self.before.is_none()
    }

    /// Re-delivery of an already persisted state.
    pub fn is_unchanged(&self) -> bool {
        self.before.as_ref() == Some(&self.after)
    }

    pub fn outcome(&self) -> SaveOutcome {
        match &self.before {
            None => SaveOutcome::Created,
            Some(before) if *before == self.after => SaveOutcome::Unchanged,
            Some(_) => SaveOutcome::Updated,
        }
    }
}

/// Result of a dispatched save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Created,
    Updated,
    Unchanged,
}

impl SaveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Every primary record type watched by the cascade.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSave {
    Animal(Save<Animal>),
    Insemination(Save<Insemination>),
    Pregnancy(Save<Pregnancy>),
    MilkRecord(Save<MilkRecord>),
    Culling(Save<CullingRecord>),
    Quarantine(Save<QuarantineRecord>),
    Barn(Save<Barn>),
    Pen(Save<Pen>),
    Movement(Save<Movement>),
    FlockInspection(Save<FlockInspection>),
}

impl RecordSave {
    /// Canonical record label used across logs and metrics.
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Animal(_) => "animal",
            Self::Insemination(_) => "insemination",
            Self::Pregnancy(_) => "pregnancy",
            Self::MilkRecord(_) => "milk_record",
            Self::Culling(_) => "culling",
            Self::Quarantine(_) => "quarantine",
            Self::Barn(_) => "barn",
            Self::Pen(_) => "pen",
            Self::Movement(_) => "movement",
            Self::FlockInspection(_) => "flock_inspection",
        }
    }

    pub fn outcome(&self) -> SaveOutcome {
        match self {
            Self::Animal(save) => save.outcome(),
            Self::Insemination(save) => save.outcome(),
            Self::Pregnancy(save) => save.outcome(),
            Self::MilkRecord(save) => save.outcome(),
            Self::Culling(save) => save.outcome(),
            Self::Quarantine(save) => save.outcome(),
            Self::Barn(save) => save.outcome(),
            Self::Pen(save) => save.outcome(),
            Self::Movement(save) => save.outcome(),
            Self::FlockInspection(save) => save.outcome(),
        }
    }
}

/// Ordering buckets for reactions triggered by one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Status,
    Breeding,
    Lactation,
    Inventory,
}

/// Work performed before the primary record is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreWrite {
    /// Attach the milk record to the animal's latest lactation.
    ResolveLactation { animal_id: String },
}

/// Derived write applied after the primary record is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    SetAnimalStatus {
        animal_id: String,
        status: AnimalStatus,
    },
    ReleaseQuarantine {
        animal_id: String,
    },
    SetReproductiveStatus {
        animal_id: String,
        status: ReproductiveStatus,
    },
    OpenPregnancy {
        insemination_id: String,
        animal_id: String,
        start_date: NaiveDate,
    },
    ChainLactation {
        animal_id: String,
        pregnancy_id: String,
        calving_date: NaiveDate,
    },
    AdjustHerd {
        species: Species,
        delta: HerdCounts,
    },
    InitPenInventory {
        pen_id: String,
    },
    TransferAnimal {
        movement: Movement,
    },
    AdjustMilk {
        record_id: String,
        change_kg: f64,
    },
    InitFlockInventory {
        flock_id: String,
        birds: u32,
    },
    RecordFlockMortality {
        flock_id: String,
        dead_delta: i64,
    },
}

impl Reaction {
    pub fn stage(&self) -> Stage {
        match self {
            Self::SetAnimalStatus { .. }
            | Self::ReleaseQuarantine { .. }
            | Self::SetReproductiveStatus { .. } => Stage::Status,
            Self::OpenPregnancy { .. } => Stage::Breeding,
            Self::ChainLactation { .. } => Stage::Lactation,
            Self::AdjustHerd { .. }
            | Self::InitPenInventory { .. }
            | Self::TransferAnimal { .. }
            | Self::AdjustMilk { .. }
            | Self::InitFlockInventory { .. }
            | Self::RecordFlockMortality { .. } => Stage::Inventory,
        }
    }

    /// Metrics label for the reaction.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetAnimalStatus { .. } => "set_animal_status",
            Self::ReleaseQuarantine { .. } => "release_quarantine",
            Self::SetReproductiveStatus { .. } => "set_reproductive_status",
            Self::OpenPregnancy { .. } => "open_pregnancy",
            Self::ChainLactation { .. } => "chain_lactation",
            Self::AdjustHerd { .. } => "adjust_herd",
            Self::InitPenInventory { .. } => "init_pen_inventory",
            Self::TransferAnimal { .. } => "transfer_animal",
            Self::AdjustMilk { .. } => "adjust_milk",
            Self::InitFlockInventory { .. } => "init_flock_inventory",
            Self::RecordFlockMortality { .. } => "record_flock_mortality",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadePlan {
    pub pre_write: Vec<PreWrite>,
    pub post_write: Vec<Reaction>,
}

impl CascadePlan {
    pub fn is_empty(&self) -> bool {
        self.pre_write.is_empty() && self.post_write.is_empty()
    }
}

/// Writes rejected by the cascade rules before anything touches storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleViolation {
    #[error("{record}.{field} cannot change once saved")]
    ImmutableField {
        record: &'static str,
        field: &'static str,
    },
    #[error("{record} records are append-only")]
    AppendOnly { record: &'static str },
    #[error("insemination {0} is linked to a pregnancy and can no longer change")]
    InseminationLinked(String),
    #[error("pregnancy {0} already has a final outcome")]
    OutcomeFinal(String),
    #[error("pregnancy {0} needs a calving date for a live or stillborn outcome")]
    OutcomeRequiresCalvingDate(String),
    #[error("pregnancy {0} calves before it starts")]
    CalvingBeforeConception(String),
    #[error("quarantine {0} ends before it starts")]
    QuarantineEndsBeforeStart(String),
    #[error("movement {0} moves an animal into the pen it is leaving")]
    SamePen(String),
    #[error("milk amount {0} kg must be a positive number")]
    InvalidAmount(f64),
    #[error("{record} capacity must be at least 1")]
    InvalidCapacity { record: &'static str },
    #[error("animal {0} must represent at least one head")]
    InvalidHeadCount(String),
}

/// Copies ledger-owned fields from the persisted image and applies
/// pre-write normalization.
pub fn prepare(save: &mut RecordSave) {
    match save {
        RecordSave::Animal(Save { before, after }) => {
            after.current_pen_id = before.as_ref().and_then(|b| b.current_pen_id.clone());
            if after.species == Species::Cattle {
                after.head_count = 1;
            }
            if after.date_of_death.is_some() {
                after.status = AnimalStatus::Dead;
            }
        }
        RecordSave::Insemination(Save {
            before: Some(before),
            after,
        }) => {
            after.pregnancy_id = before.pregnancy_id.clone();
        }
        RecordSave::MilkRecord(Save {
            before: Some(before),
            after,
        }) if after.lactation_id.is_none() => {
            after.lactation_id = before.lactation_id.clone();
        }
        _ => {}
    }
}

/// Derives the ordered cascade for one prepared save.
pub fn plan(save: &RecordSave) -> Result<CascadePlan, RuleViolation> {
    if save.outcome() == SaveOutcome::Unchanged {
        return Ok(CascadePlan::default());
    }

    let mut plan = CascadePlan::default();
    match save {
        RecordSave::Animal(save) => plan_animal(save, &mut plan)?,
        RecordSave::Insemination(save) => plan_insemination(save, &mut plan)?,
        RecordSave::Pregnancy(save) => plan_pregnancy(save, &mut plan)?,
        RecordSave::MilkRecord(save) => plan_milk(save, &mut plan)?,
        RecordSave::Culling(save) => {
            ensure_same(save, "culling", "animal_id", |r| &r.animal_id)?;
            if save.is_created() {
                plan.post_write.push(Reaction::SetAnimalStatus {
                    animal_id: save.after.animal_id.clone(),
                    status: AnimalStatus::Culled,
                });
            }
        }
        RecordSave::Quarantine(save) => plan_quarantine(save, &mut plan)?,
        RecordSave::Barn(save) => {
            if save.after.capacity == 0 {
                return Err(RuleViolation::InvalidCapacity { record: "barn" });
            }
        }
        RecordSave::Pen(save) => {
            if save.after.capacity == 0 {
                return Err(RuleViolation::InvalidCapacity { record: "pen" });
            }
            if save.is_created() {
                plan.post_write.push(Reaction::InitPenInventory {
                    pen_id: save.after.id.clone(),
                });
            }
        }
        RecordSave::Movement(save) => {
            if !save.is_created() {
                return Err(RuleViolation::AppendOnly { record: "movement" });
            }
            let movement = &save.after;
            if movement.from_pen_id.as_deref() == Some(movement.to_pen_id.as_str()) {
                return Err(RuleViolation::SamePen(movement.id.clone()));
            }
            plan.post_write.push(Reaction::TransferAnimal {
                movement: movement.clone(),
            });
        }
        RecordSave::FlockInspection(save) => {
            ensure_same(save, "flock_inspection", "flock_id", |r| &r.flock_id)?;
            let previous = save.before.as_ref().map_or(0, |b| i64::from(b.dead_birds));
            let dead_delta = i64::from(save.after.dead_birds) - previous;
            if dead_delta != 0 {
                plan.post_write.push(Reaction::RecordFlockMortality {
                    flock_id: save.after.flock_id.clone(),
                    dead_delta,
                });
            }
        }
    }

    plan.post_write.sort_by_key(Reaction::stage);
    Ok(plan)
}

fn ensure_same<T: PartialEq, F>(
    save: &Save<T>,
    record: &'static str,
    field: &'static str,
    get: F,
) -> Result<(), RuleViolation>
where
    F: Fn(&T) -> &String,
{
    match &save.before {
        Some(before) if get(before) != get(&save.after) => {
            Err(RuleViolation::ImmutableField { record, field })
        }
        _ => Ok(()),
    }
}

fn plan_animal(save: &Save<Animal>, plan: &mut CascadePlan) -> Result<(), RuleViolation> {
    let after = &save.after;
    if after.head_count == 0 {
        return Err(RuleViolation::InvalidHeadCount(after.id.clone()));
    }
    if let Some(before) = &save.before {
        if before.species != after.species {
            return Err(RuleViolation::ImmutableField {
                record: "animal",
                field: "species",
            });
        }
        if before.head_count != after.head_count {
            return Err(RuleViolation::ImmutableField {
                record: "animal",
                field: "head_count",
            });
        }
    }

    let delta = HerdCounts::delta(save.before.as_ref(), after);
    if !delta.is_zero() {
        plan.post_write.push(Reaction::AdjustHerd {
            species: after.species,
            delta,
        });
    }
    if save.is_created() && after.species == Species::Poultry {
        plan.post_write.push(Reaction::InitFlockInventory {
            flock_id: after.id.clone(),
            birds: after.head_count,
        });
    }
    Ok(())
}

fn plan_insemination(
    save: &Save<Insemination>,
    plan: &mut CascadePlan,
) -> Result<(), RuleViolation> {
    let after = &save.after;
    if let Some(before) = &save.before {
        if before.pregnancy_id.is_some() {
            return Err(RuleViolation::InseminationLinked(after.id.clone()));
        }
    }
    ensure_same(save, "insemination", "animal_id", |r| &r.animal_id)?;

    let was_successful = save.before.as_ref().is_some_and(|b| b.success);
    if after.success && !was_successful && after.pregnancy_id.is_none() {
        plan.post_write.push(Reaction::OpenPregnancy {
            insemination_id: after.id.clone(),
            animal_id: after.animal_id.clone(),
            start_date: after.date,
        });
    }
    Ok(())
}

fn plan_pregnancy(save: &Save<Pregnancy>, plan: &mut CascadePlan) -> Result<(), RuleViolation> {
    let after = &save.after;
    if after.calving_date.is_some_and(|calving| calving < after.start_date) {
        return Err(RuleViolation::CalvingBeforeConception(after.id.clone()));
    }
    if after.outcome.is_some_and(PregnancyOutcome::is_calving) && after.calving_date.is_none() {
        return Err(RuleViolation::OutcomeRequiresCalvingDate(after.id.clone()));
    }
    ensure_same(save, "pregnancy", "animal_id", |r| &r.animal_id)?;

    let previous_outcome = match &save.before {
        Some(before) => {
            if before.outcome.is_some()
                && (before.outcome != after.outcome || before.calving_date != after.calving_date)
            {
                return Err(RuleViolation::OutcomeFinal(after.id.clone()));
            }
            Some(before.outcome)
        }
        None => None,
    };

    let status = |status| Reaction::SetReproductiveStatus {
        animal_id: after.animal_id.clone(),
        status,
    };
    match (previous_outcome, after.outcome) {
        (None, None) => plan.post_write.push(status(ReproductiveStatus::Pregnant)),
        (_, Some(PregnancyOutcome::Miscarriage)) if previous_outcome != Some(after.outcome) => {
            plan.post_write.push(status(ReproductiveStatus::Open));
        }
        (None | Some(None), Some(_)) => {
            if let Some(calving_date) = after.qualifying_calving() {
                plan.post_write.push(status(ReproductiveStatus::Calved));
                plan.post_write.push(Reaction::ChainLactation {
                    animal_id: after.animal_id.clone(),
                    pregnancy_id: after.id.clone(),
                    calving_date,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

fn plan_milk(save: &Save<MilkRecord>, plan: &mut CascadePlan) -> Result<(), RuleViolation> {
    let after = &save.after;
    if !(after.amount_kg.is_finite() && after.amount_kg > 0.0) {
        return Err(RuleViolation::InvalidAmount(after.amount_kg));
    }
    ensure_same(save, "milk_record", "animal_id", |r| &r.animal_id)?;

    if after.lactation_id.is_none() {
        plan.pre_write.push(PreWrite::ResolveLactation {
            animal_id: after.animal_id.clone(),
        });
    }
    let previous = save.before.as_ref().map_or(0.0, |b| b.amount_kg);
    let change_kg = after.amount_kg - previous;
    if change_kg != 0.0 {
        plan.post_write.push(Reaction::AdjustMilk {
            record_id: after.id.clone(),
            change_kg,
        });
    }
    Ok(())
}

fn plan_quarantine(
    save: &Save<QuarantineRecord>,
    plan: &mut CascadePlan,
) -> Result<(), RuleViolation> {
    let after = &save.after;
    if let (Some(start), Some(end)) = (after.start_date, after.end_date) {
        if end < start {
            return Err(RuleViolation::QuarantineEndsBeforeStart(after.id.clone()));
        }
    }
    ensure_same(save, "quarantine", "animal_id", |r| &r.animal_id)?;

    let was_active = save.before.as_ref().is_some_and(QuarantineRecord::is_active);
    match (was_active, after.is_active()) {
        (false, true) => plan.post_write.push(Reaction::SetAnimalStatus {
            animal_id: after.animal_id.clone(),
            status: AnimalStatus::Quarantined,
        }),
        (true, false) => plan.post_write.push(Reaction::ReleaseQuarantine {
            animal_id: after.animal_id.clone(),
        }),
        _ => {}
    }
    Ok(())
}

/// Stage-ordered work queue that drains reactions exactly once.
///
/// Follow-up reactions pushed while draining are ordered by stage first and
/// by insertion within a stage.
#[derive(Debug, Default)]
pub struct CascadeQueue {
    pending: BTreeMap<(Stage, u64), Reaction>,
    next_seq: u64,
}

impl CascadeQueue {
    pub fn new(reactions: impl IntoIterator<Item = Reaction>) -> Self {
        let mut queue = Self::default();
        queue.extend(reactions);
        queue
    }

    pub fn push(&mut self, reaction: Reaction) {
        let key = (reaction.stage(), self.next_seq);
        self.next_seq += 1;
        self.pending.insert(key, reaction);
    }

    pub fn extend(&mut self, reactions: impl IntoIterator<Item = Reaction>) {
        for reaction in reactions {
            self.push(reaction);
        }
    }

    pub fn pop(&mut self) -> Option<Reaction> {
        self.pending.pop_first().map(|(_, reaction)| reaction)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
