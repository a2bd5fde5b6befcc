use std::collections::BTreeMap;
use std::ops::{Add, Sub};

use crate::types::{Animal, AnimalStatus, HerdCounts, Movement, Sex};

impl HerdCounts {
    /// Counts contributed by a single animal record.
    pub fn contribution(animal: &Animal) -> Self {
        let mut counts = Self::default();
        if animal.status.is_alive() {
            counts.alive = 1;
            match animal.sex {
                Some(Sex::Male) => counts.alive_male = 1,
                Some(Sex::Female) => counts.alive_female = 1,
                None => {}
            }
        }
        match animal.status {
            AnimalStatus::Alive => {}
            AnimalStatus::Sold => counts.sold = 1,
            AnimalStatus::Dead => counts.dead = 1,
            AnimalStatus::Culled => counts.culled = 1,
            AnimalStatus::Quarantined => counts.quarantined = 1,
        }
        counts
    }

    /// Signed change between two states of the same animal.
    pub fn delta(before: Option<&Animal>, after: &Animal) -> Self {
        let previous = before.map(Self::contribution).unwrap_or_default();
        Self::contribution(after) - previous
    }

    /// Full recount over a set of animals; the reconciliation reference.
    pub fn tally<'a, I>(animals: I) -> Self
    where
        I: IntoIterator<Item = &'a Animal>,
    {
        animals
            .into_iter()
            .fold(Self::default(), |acc, animal| acc + Self::contribution(animal))
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl Add for HerdCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            alive: self.alive + rhs.alive,
            alive_male: self.alive_male + rhs.alive_male,
            alive_female: self.alive_female + rhs.alive_female,
            sold: self.sold + rhs.sold,
            dead: self.dead + rhs.dead,
            culled: self.culled + rhs.culled,
            quarantined: self.quarantined + rhs.quarantined,
        }
    }
}

impl Sub for HerdCounts {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            alive: self.alive - rhs.alive,
            alive_male: self.alive_male - rhs.alive_male,
            alive_female: self.alive_female - rhs.alive_female,
            sold: self.sold - rhs.sold,
            dead: self.dead - rhs.dead,
            culled: self.culled - rhs.culled,
            quarantined: self.quarantined - rhs.quarantined,
        }
    }
}

/// Rebuilds per-pen occupancy from the movement log.
///
/// Movements must be supplied in ledger order. Pens that end up empty are kept
/// with a zero count so they can be compared against stored counters.
pub fn replay_movements<'a, I>(movements: I) -> BTreeMap<String, i64>
where
    I: IntoIterator<Item = &'a Movement>,
{
    let mut occupancy = BTreeMap::new();
    for movement in movements {
        if let Some(from) = &movement.from_pen_id {
            *occupancy.entry(from.clone()).or_insert(0) -= 1;
        }
        *occupancy.entry(movement.to_pen_id.clone()).or_insert(0) += 1;
    }
    occupancy
}

/// Mortality as a percentage of the flock's registered head count.
pub fn mortality_rate(initial_birds: i64, dead_birds: i64) -> f64 {
    if initial_birds <= 0 {
        return 0.0;
    }
    let rate = dead_birds as f64 / initial_birds as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Tolerance used when comparing floating milk totals.
pub const MILK_EPSILON_KG: f64 = 1e-6;

pub fn milk_totals_match(stored: f64, recomputed: f64) -> bool {
    (stored - recomputed).abs() <= MILK_EPSILON_KG
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::types::{ReproductiveStatus, Species};

    fn animal(status: AnimalStatus, sex: Option<Sex>) -> Animal {
        Animal {
            id: "a-1".to_string(),
            species: Species::Cattle,
            name: "Daisy".to_string(),
            breed: "Jersey".to_string(),
            sex,
            birth_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            status,
            reproductive_status: ReproductiveStatus::Open,
            date_of_death: None,
            head_count: 1,
            current_pen_id: None,
        }
    }

    fn movement(id: &str, from: Option<&str>, to: &str) -> Movement {
        Movement {
            id: id.to_string(),
            animal_id: "a-1".to_string(),
            from_pen_id: from.map(str::to_string),
            to_pen_id: to.to_string(),
            moved_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn registration_delta_adds_alive_female() {
        let delta = HerdCounts::delta(None, &animal(AnimalStatus::Alive, Some(Sex::Female)));
        assert_eq!(delta.alive, 1);
        assert_eq!(delta.alive_female, 1);
        assert_eq!(delta.alive_male, 0);
    }

    #[test]
    fn culling_moves_animal_out_of_alive_counts() {
        let before = animal(AnimalStatus::Alive, Some(Sex::Male));
        let after = animal(AnimalStatus::Culled, Some(Sex::Male));
        let delta = HerdCounts::delta(Some(&before), &after);
        assert_eq!(delta.alive, -1);
        assert_eq!(delta.alive_male, -1);
        assert_eq!(delta.culled, 1);
    }

    #[test]
    fn unchanged_animal_has_zero_delta() {
        let same = animal(AnimalStatus::Quarantined, Some(Sex::Female));
        assert!(HerdCounts::delta(Some(&same), &same).is_zero());
    }

    #[test]
    fn incremental_deltas_match_tally() {
        let states = [
            animal(AnimalStatus::Alive, Some(Sex::Female)),
            animal(AnimalStatus::Quarantined, Some(Sex::Female)),
            animal(AnimalStatus::Alive, Some(Sex::Female)),
            animal(AnimalStatus::Sold, Some(Sex::Female)),
        ];
        let mut running = HerdCounts::default();
        let mut previous: Option<&Animal> = None;
        for state in &states {
            running = running + HerdCounts::delta(previous, state);
            previous = Some(state);
        }
        assert_eq!(running, HerdCounts::tally([&states[3]]));
        assert_eq!(running - running, HerdCounts::default());
    }

    #[test]
    fn replay_moves_occupancy_between_pens() {
        let log = vec![
            movement("m-1", None, "pen-1"),
            movement("m-2", None, "pen-1"),
            movement("m-3", Some("pen-1"), "pen-2"),
        ];
        let occupancy = replay_movements(&log);
        assert_eq!(occupancy.get("pen-1"), Some(&1));
        assert_eq!(occupancy.get("pen-2"), Some(&1));
        assert_eq!(occupancy.values().sum::<i64>(), 2);
    }

    #[test]
    fn mortality_rate_is_rounded_percentage() {
        assert_eq!(mortality_rate(300, 1), 0.33);
        assert_eq!(mortality_rate(0, 5), 0.0);
        assert!(milk_totals_match(10.1 + 20.2, 30.3));
    }
}
