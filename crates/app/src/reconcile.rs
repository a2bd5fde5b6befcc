use std::collections::BTreeMap;
use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use herdbook_core::inventory::{milk_totals_match, replay_movements};
use herdbook_core::types::{HerdCounts, Species};
use herdbook_storage::{Database, StorageError, DAIRY_POPULATION};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Materialized aggregate checked by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Herd,
    Pen,
    Milk,
    Flock,
}

impl Aggregate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Herd => "herd",
            Self::Pen => "pen",
            Self::Milk => "milk",
            Self::Flock => "flock",
        }
    }
}

/// One stored counter that disagrees with its recount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drift {
    pub aggregate: Aggregate,
    pub key: String,
    pub stored: f64,
    pub recomputed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub repaired: bool,
    pub drifts: Vec<Drift>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.drifts.is_empty()
    }
}

/// Recomputes every inventory aggregate from its source records.
#[derive(Clone)]
pub struct Reconciler {
    database: Database,
    clock: Clock,
}

impl Reconciler {
    pub fn new(database: Database, clock: Clock) -> Self {
        Self { database, clock }
    }

    /// Compares stored aggregates with their recounts. With `repair`, drifting
    /// aggregates are overwritten and a history row is written for each.
    pub async fn run_once(&self, repair: bool) -> Result<ReconcileReport, ReconcileError> {
        let now = (self.clock)();
        let mut tx = self.database.begin().await?;
        let mut report = ReconcileReport {
            repaired: repair,
            drifts: Vec::new(),
        };

        self.check_herds(&mut tx, repair, now, &mut report.drifts)
            .await
            .map_err(|source| ReconcileError::Aggregate {
                aggregate: Aggregate::Herd,
                source,
            })?;
        self.check_pens(&mut tx, repair, now, &mut report.drifts)
            .await
            .map_err(|source| ReconcileError::Aggregate {
                aggregate: Aggregate::Pen,
                source,
            })?;
        self.check_milk(&mut tx, repair, now, &mut report.drifts)
            .await
            .map_err(|source| ReconcileError::Aggregate {
                aggregate: Aggregate::Milk,
                source,
            })?;
        self.check_flocks(&mut tx, repair, now, &mut report.drifts)
            .await
            .map_err(|source| ReconcileError::Aggregate {
                aggregate: Aggregate::Flock,
                source,
            })?;

        tx.commit().await.map_err(StorageError::from)?;

        counter!("reconcile_runs_total").increment(1);
        for drift in &report.drifts {
            counter!("reconcile_drift_total", "aggregate" => drift.aggregate.as_str())
                .increment(1);
            warn!(
                stage = "reconcile",
                aggregate = drift.aggregate.as_str(),
                key = %drift.key,
                stored = drift.stored,
                recomputed = drift.recomputed,
                repaired = repair,
                "aggregate drift detected"
            );
        }
        info!(
            stage = "reconcile",
            drifts = report.drifts.len(),
            repair,
            "reconciliation completed"
        );
        Ok(report)
    }

    async fn check_herds(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        repair: bool,
        now: DateTime<Utc>,
        drifts: &mut Vec<Drift>,
    ) -> Result<(), StorageError> {
        let animals = self.database.animals().list(&mut **tx).await?;
        let stored = self.database.inventory().herd_inventory(&mut **tx).await?;

        for species in [Species::Cattle, Species::Poultry] {
            let recomputed =
                HerdCounts::tally(animals.iter().filter(|animal| animal.species == species));
            let current = stored
                .iter()
                .find(|inventory| inventory.species == species)
                .map(|inventory| inventory.counts)
                .unwrap_or_default();
            if current == recomputed {
                continue;
            }

            for ((field, stored), (_, expected)) in
                herd_fields(&current).into_iter().zip(herd_fields(&recomputed))
            {
                if stored != expected {
                    drifts.push(Drift {
                        aggregate: Aggregate::Herd,
                        key: format!("{species}.{field}"),
                        stored: stored as f64,
                        recomputed: expected as f64,
                    });
                }
            }
            if repair {
                self.database
                    .inventory()
                    .set_herd(tx, species, &recomputed, now)
                    .await?;
            }
        }
        Ok(())
    }

    async fn check_pens(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        repair: bool,
        now: DateTime<Utc>,
        drifts: &mut Vec<Drift>,
    ) -> Result<(), StorageError> {
        let movements = self.database.housing().list_movements(&mut **tx).await?;
        let stored: BTreeMap<String, i64> = self
            .database
            .inventory()
            .pen_occupancies(&mut **tx)
            .await?
            .into_iter()
            .map(|occupancy| (occupancy.pen_id, occupancy.occupancy))
            .collect();

        let mut expected = replay_movements(&movements);
        for pen_id in stored.keys() {
            expected.entry(pen_id.clone()).or_insert(0);
        }

        for (pen_id, recomputed) in expected {
            let current = stored.get(&pen_id).copied().unwrap_or(0);
            if current == recomputed {
                continue;
            }
            drifts.push(Drift {
                aggregate: Aggregate::Pen,
                key: pen_id.clone(),
                stored: current as f64,
                recomputed: recomputed as f64,
            });
            if repair {
                self.database
                    .inventory()
                    .set_pen(tx, &pen_id, recomputed, now)
                    .await?;
            }
        }
        Ok(())
    }

    async fn check_milk(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        repair: bool,
        now: DateTime<Utc>,
        drifts: &mut Vec<Drift>,
    ) -> Result<(), StorageError> {
        let recomputed = self.database.milk().total_kg(&mut **tx).await?;
        let current = self
            .database
            .inventory()
            .milk_inventory(&mut **tx, DAIRY_POPULATION)
            .await?
            .map_or(0.0, |inventory| inventory.total_kg);
        if milk_totals_match(current, recomputed) {
            return Ok(());
        }

        drifts.push(Drift {
            aggregate: Aggregate::Milk,
            key: DAIRY_POPULATION.to_string(),
            stored: current,
            recomputed,
        });
        if repair {
            self.database
                .inventory()
                .set_milk(tx, DAIRY_POPULATION, recomputed, now)
                .await?;
        }
        Ok(())
    }

    async fn check_flocks(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        repair: bool,
        now: DateTime<Utc>,
        drifts: &mut Vec<Drift>,
    ) -> Result<(), StorageError> {
        let recounts = self.database.inventory().flock_recount(&mut **tx).await?;
        let stored = self.database.inventory().flock_inventories(&mut **tx).await?;

        for recount in recounts {
            let current = stored
                .iter()
                .find(|inventory| inventory.flock_id == recount.flock_id)
                .map_or((0, 0), |inventory| (inventory.alive_birds, inventory.dead_birds));
            let expected = (recount.alive_birds(), recount.dead_birds);
            if current == expected {
                continue;
            }

            for (field, stored, recomputed) in [
                ("alive_birds", current.0, expected.0),
                ("dead_birds", current.1, expected.1),
            ] {
                if stored != recomputed {
                    drifts.push(Drift {
                        aggregate: Aggregate::Flock,
                        key: format!("{}.{field}", recount.flock_id),
                        stored: stored as f64,
                        recomputed: recomputed as f64,
                    });
                }
            }
            if repair {
                self.database
                    .inventory()
                    .set_flock(
                        tx,
                        &recount.flock_id,
                        expected.0,
                        expected.1,
                        recount.head_count,
                        now,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

fn herd_fields(counts: &HerdCounts) -> [(&'static str, i64); 7] {
    [
        ("alive", counts.alive),
        ("alive_male", counts.alive_male),
        ("alive_female", counts.alive_female),
        ("sold", counts.sold),
        ("dead", counts.dead),
        ("culled", counts.culled),
        ("quarantined", counts.quarantined),
    ]
}

/// Background worker running report-only reconciliation on a fixed cadence.
pub struct ReconcileWorker {
    reconciler: Reconciler,
    interval: Duration,
}

impl ReconcileWorker {
    pub fn new(reconciler: Reconciler, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Runs the worker loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.reconciler.run_once(false).await {
                error!(stage = "reconcile", error = %err, "reconciliation run failed");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to reconcile {} inventory", .aggregate.as_str())]
    Aggregate {
        aggregate: Aggregate,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    use herdbook_core::types::FlockInspection;
    use herdbook_storage::OccupancyError;

    use crate::cascade::tests::{cow, date, fixed_clock, milk, movement, seed_housing, setup};
    use crate::cascade::{CascadeDispatcher, CascadeError};
    use crate::telemetry;

    /// Stored pen counters must equal both the movement replay and the
    /// number of animals that have a current pen.
    async fn assert_pens_conserved(db: &Database) {
        let stored: BTreeMap<String, i64> = db
            .inventory()
            .pen_occupancies(db.pool())
            .await
            .expect("occupancies")
            .into_iter()
            .map(|o| (o.pen_id, o.occupancy))
            .collect();
        let placed = db
            .animals()
            .list(db.pool())
            .await
            .expect("animals")
            .iter()
            .filter(|animal| animal.current_pen_id.is_some())
            .count() as i64;
        assert_eq!(stored.values().sum::<i64>(), placed);

        let log = db.housing().list_movements(db.pool()).await.expect("log");
        let mut replayed = replay_movements(&log);
        for pen_id in stored.keys() {
            replayed.entry(pen_id.clone()).or_insert(0);
        }
        assert_eq!(replayed, stored);
    }

    async fn step(
        db: &Database,
        dispatcher: &CascadeDispatcher,
        id: &str,
        animal: &str,
        from: Option<&str>,
        to: &str,
        minute: u32,
    ) -> Result<(), CascadeError> {
        let result = dispatcher
            .save_movement(movement(id, animal, from, to, minute))
            .await
            .map(|_| ());
        assert_pens_conserved(db).await;
        result
    }

    #[tokio::test]
    async fn clean_ledger_reports_no_drift() {
        telemetry::init_metrics().expect("metrics");
        let (db, dispatcher) = setup().await;
        seed_housing(&dispatcher, &[("pen-1", 5), ("pen-2", 5)]).await;
        dispatcher.save_animal(cow("a-1")).await.expect("cow");
        dispatcher
            .save_movement(movement("mv-1", "a-1", None, "pen-1", 0))
            .await
            .expect("placement");
        dispatcher
            .save_movement(movement("mv-2", "a-1", Some("pen-1"), "pen-2", 1))
            .await
            .expect("transfer");

        let report = Reconciler::new(db, fixed_clock())
            .run_once(false)
            .await
            .expect("reconcile");
        assert!(report.is_clean(), "unexpected drift: {:?}", report.drifts);
    }

    #[tokio::test]
    async fn pen_counters_stay_conserved_through_mixed_movements() {
        telemetry::init_metrics().expect("metrics");
        let (db, dispatcher) = setup().await;
        seed_housing(&dispatcher, &[("pen-1", 2), ("pen-2", 1), ("pen-3", 3)]).await;
        for id in ["a-1", "a-2", "a-3", "a-4"] {
            dispatcher.save_animal(cow(id)).await.expect("cow");
        }
        assert_pens_conserved(&db).await;

        step(&db, &dispatcher, "mv-1", "a-1", None, "pen-1", 0).await.expect("place a-1");
        step(&db, &dispatcher, "mv-2", "a-2", None, "pen-1", 1).await.expect("place a-2");
        step(&db, &dispatcher, "mv-3", "a-3", None, "pen-2", 2).await.expect("place a-3");
        let err = step(&db, &dispatcher, "mv-4", "a-4", None, "pen-2", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::Occupancy(OccupancyError::PenFull(_))));
        step(&db, &dispatcher, "mv-5", "a-1", Some("pen-1"), "pen-3", 4)
            .await
            .expect("a-1 to pen-3");
        step(&db, &dispatcher, "mv-6", "a-4", None, "pen-1", 5).await.expect("place a-4");

        let mut dead = cow("a-2");
        dead.date_of_death = Some(date(2024, 3, 1));
        dispatcher.save_animal(dead).await.expect("death");
        assert_pens_conserved(&db).await;

        let err = step(&db, &dispatcher, "mv-7", "a-2", Some("pen-1"), "pen-3", 6)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::TerminalAnimal { .. }));
        let err = step(&db, &dispatcher, "mv-8", "a-3", Some("pen-2"), "pen-1", 7)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::Occupancy(OccupancyError::PenFull(_))));
        step(&db, &dispatcher, "mv-9", "a-3", Some("pen-2"), "pen-3", 8)
            .await
            .expect("a-3 to pen-3");

        let by_pen: Vec<(String, i64)> = db
            .inventory()
            .pen_occupancies(db.pool())
            .await
            .expect("occupancies")
            .into_iter()
            .map(|o| (o.pen_id, o.occupancy))
            .collect();
        assert_eq!(
            by_pen,
            vec![
                ("pen-1".to_string(), 2),
                ("pen-2".to_string(), 0),
                ("pen-3".to_string(), 2),
            ]
        );

        let report = Reconciler::new(db, fixed_clock())
            .run_once(false)
            .await
            .expect("reconcile");
        assert!(report.is_clean(), "unexpected drift: {:?}", report.drifts);
    }

    #[tokio::test]
    async fn drift_is_reported_then_repaired() {
        telemetry::init_metrics().expect("metrics");
        let (db, dispatcher) = setup().await;
        seed_housing(&dispatcher, &[("pen-1", 5)]).await;
        dispatcher.save_animal(cow("a-1")).await.expect("cow");
        dispatcher
            .save_movement(movement("mv-1", "a-1", None, "pen-1", 0))
            .await
            .expect("placement");
        let mut poultry = cow("f-1");
        poultry.species = Species::Poultry;
        poultry.sex = None;
        poultry.head_count = 100;
        dispatcher.save_animal(poultry).await.expect("flock");
        dispatcher
            .save_flock_inspection(FlockInspection {
                id: "fi-1".to_string(),
                flock_id: "f-1".to_string(),
                inspected_on: date(2024, 3, 1),
                dead_birds: 4,
            })
            .await
            .expect("inspection");

        // Corrupt every cache behind the dispatcher's back.
        for statement in [
            "UPDATE herd_inventory SET alive = 7 WHERE species = 'cattle'",
            "UPDATE pen_inventory SET occupancy = 3 WHERE pen_id = 'pen-1'",
            "INSERT INTO milk_inventory (population, total_kg, updated_at) VALUES ('dairy', 5.0, '2024-03-01T06:00:00.000Z')",
            "UPDATE flock_inventory SET alive_birds = 90 WHERE flock_id = 'f-1'",
        ] {
            sqlx::query(statement)
                .execute(db.pool())
                .await
                .expect("corrupt aggregate");
        }

        let reconciler = Reconciler::new(db.clone(), fixed_clock());
        let report = reconciler.run_once(false).await.expect("report");
        let keys: Vec<(Aggregate, &str)> = report
            .drifts
            .iter()
            .map(|drift| (drift.aggregate, drift.key.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Aggregate::Herd, "cattle.alive"),
                (Aggregate::Pen, "pen-1"),
                (Aggregate::Milk, "dairy"),
                (Aggregate::Flock, "f-1.alive_birds"),
            ]
        );
        let pen = &report.drifts[1];
        assert_eq!((pen.stored, pen.recomputed), (3.0, 1.0));

        let still_drifting = reconciler.run_once(false).await.expect("report again");
        assert_eq!(still_drifting.drifts.len(), 4);

        let repaired = reconciler.run_once(true).await.expect("repair");
        assert!(repaired.repaired);
        assert_eq!(repaired.drifts.len(), 4);
        assert!(reconciler.run_once(false).await.expect("verify").is_clean());

        let history = db.inventory().pen_history("pen-1").await.expect("history");
        let last = history.last().expect("repair history");
        assert_eq!((last.occupancy, last.movement_id.as_deref()), (1, None));
        let milk_history = db
            .inventory()
            .milk_history(DAIRY_POPULATION)
            .await
            .expect("milk history");
        assert_eq!(milk_history.last().map(|h| h.change_kg), Some(-5.0));
    }

    #[tokio::test]
    async fn milk_totals_within_epsilon_are_not_drift() {
        telemetry::init_metrics().expect("metrics");
        let (db, dispatcher) = setup().await;
        dispatcher.save_animal(cow("a-1")).await.expect("cow");
        sqlx::query(
            "INSERT INTO lactations (id, animal_id, pregnancy_id, start_date, end_date, lactation_number, created_at) \
             VALUES ('l-1', 'a-1', NULL, '2024-01-01', NULL, 1, '2024-01-01T00:00:00.000Z')",
        )
        .execute(db.pool())
        .await
        .expect("lactation");
        for (id, amount) in [("m-1", 0.1), ("m-2", 0.2), ("m-3", 0.3)] {
            dispatcher
                .save_milk_record(milk(id, "a-1", amount))
                .await
                .expect("milk");
        }

        let report = Reconciler::new(db, fixed_clock())
            .run_once(false)
            .await
            .expect("reconcile");
        assert!(report.is_clean());
    }
}
