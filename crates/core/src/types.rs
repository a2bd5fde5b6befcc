use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Error returned when a persisted enum value cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Returns the canonical database representation.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Population an animal record belongs to. A poultry record is a whole flock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Cattle,
    Poultry,
}

string_enum!(Species, "species", {
    Cattle => "cattle",
    Poultry => "poultry",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

string_enum!(Sex, "sex", {
    Male => "male",
    Female => "female",
});

/// Lifecycle status of an animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimalStatus {
    Alive,
    Sold,
    Dead,
    Culled,
    Quarantined,
}

string_enum!(AnimalStatus, "animal status", {
    Alive => "alive",
    Sold => "sold",
    Dead => "dead",
    Culled => "culled",
    Quarantined => "quarantined",
});

impl AnimalStatus {
    /// Quarantined animals are still part of the living herd.
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Alive | Self::Quarantined)
    }

    /// Statuses an animal never leaves through a cascade.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sold | Self::Dead | Self::Culled)
    }
}

/// Reproductive status tracked on the animal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproductiveStatus {
    Open,
    Pregnant,
    Calved,
    Unavailable,
}

string_enum!(ReproductiveStatus, "reproductive status", {
    Open => "open",
    Pregnant => "pregnant",
    Calved => "calved",
    Unavailable => "unavailable",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PregnancyOutcome {
    Live,
    Stillborn,
    Miscarriage,
}

string_enum!(PregnancyOutcome, "pregnancy outcome", {
    Live => "live",
    Stillborn => "stillborn",
    Miscarriage => "miscarriage",
});

impl PregnancyOutcome {
    /// Outcomes that end in a calving and therefore open a lactation.
    pub fn is_calving(self) -> bool {
        matches!(self, Self::Live | Self::Stillborn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LactationStage {
    Early,
    Mid,
    Late,
    Dry,
    Ended,
}

/// An individual cow, or a poultry flock tracked as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animal {
    pub id: String,
    pub species: Species,
    pub name: String,
    pub breed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    pub birth_date: NaiveDate,
    pub status: AnimalStatus,
    pub reproductive_status: ReproductiveStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_death: Option<NaiveDate>,
    /// Number of head represented by the record; birds for a flock, 1 for a cow.
    #[serde(default = "default_head_count")]
    pub head_count: u32,
    /// Owned by the movement ledger.
    #[serde(default)]
    pub current_pen_id: Option<String>,
}

fn default_head_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insemination {
    pub id: String,
    pub animal_id: String,
    pub date: NaiveDate,
    pub success: bool,
    /// Owned by the breeding cascade.
    #[serde(default)]
    pub pregnancy_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pregnancy {
    pub id: String,
    pub animal_id: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub calving_date: Option<NaiveDate>,
    #[serde(default)]
    pub outcome: Option<PregnancyOutcome>,
}

impl Pregnancy {
    /// Returns the calving date when the pregnancy ended in a calving.
    pub fn qualifying_calving(&self) -> Option<NaiveDate> {
        match (self.outcome, self.calving_date) {
            (Some(outcome), Some(date)) if outcome.is_calving() => Some(date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lactation {
    pub id: String,
    pub animal_id: String,
    pub pregnancy_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub number: u32,
}

impl Lactation {
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilkRecord {
    pub id: String,
    pub animal_id: String,
    /// Resolved to the animal's latest lactation when absent.
    #[serde(default)]
    pub lactation_id: Option<String>,
    pub amount_kg: f64,
    pub milked_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CullingRecord {
    pub id: String,
    pub animal_id: String,
    pub reason: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: String,
    pub animal_id: String,
    pub reason: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl QuarantineRecord {
    pub fn is_active(&self) -> bool {
        self.start_date.is_some() && self.end_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barn {
    pub id: String,
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pen {
    pub id: String,
    pub barn_id: String,
    pub category: String,
    pub pen_type: String,
    pub capacity: u32,
}

/// Relocation of an animal into a pen. `from_pen_id` is empty on first placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: String,
    pub animal_id: String,
    #[serde(default)]
    pub from_pen_id: Option<String>,
    pub to_pen_id: String,
    pub moved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlockInspection {
    pub id: String,
    pub flock_id: String,
    pub inspected_on: NaiveDate,
    pub dead_birds: u32,
}

/// Running herd totals for one species.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HerdCounts {
    pub alive: i64,
    pub alive_male: i64,
    pub alive_female: i64,
    pub sold: i64,
    pub dead: i64,
    pub culled: i64,
    pub quarantined: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdInventory {
    pub species: Species,
    #[serde(flatten)]
    pub counts: HerdCounts,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenOccupancy {
    pub pen_id: String,
    pub occupancy: i64,
    pub updated_at: DateTime<Utc>,
}

/// Append-only occupancy snapshot written on every pen delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenHistoryEntry {
    pub id: i64,
    pub pen_id: String,
    pub occupancy: i64,
    pub movement_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Barn occupancy after an animal entered or left the barn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarnHistoryEntry {
    pub id: i64,
    pub barn_id: String,
    pub occupancy: i64,
    pub delta: i64,
    pub movement_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilkInventory {
    pub population: String,
    pub total_kg: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilkHistoryEntry {
    pub id: i64,
    pub population: String,
    pub change_kg: f64,
    pub total_kg: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlockInventory {
    pub flock_id: String,
    pub alive_birds: i64,
    pub dead_birds: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlockHistoryEntry {
    pub id: i64,
    pub flock_id: String,
    pub alive_birds: i64,
    pub mortality_rate: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Lactation enriched with its computed stage for read models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LactationView {
    #[serde(flatten)]
    pub lactation: Lactation,
    pub days_in_lactation: i64,
    pub stage: LactationStage,
}

/// Summary of every tracked aggregate, used by the inventory read model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventorySummary {
    pub herds: Vec<HerdInventory>,
    pub pens: Vec<PenOccupancy>,
    pub barns: Vec<BarnOccupancy>,
    pub milk: Option<MilkInventory>,
    pub flocks: Vec<FlockInventory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarnOccupancy {
    pub barn_id: String,
    pub occupancy: i64,
    pub capacity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_strings_round_trip_through_from_str() {
        for status in [
            AnimalStatus::Alive,
            AnimalStatus::Sold,
            AnimalStatus::Dead,
            AnimalStatus::Culled,
            AnimalStatus::Quarantined,
        ] {
            assert_eq!(status.as_str().parse::<AnimalStatus>().unwrap(), status);
        }
        let err = "zombie".parse::<AnimalStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown animal status value 'zombie'");
    }

    #[test]
    fn quarantined_counts_as_alive_but_culled_is_terminal() {
        assert!(AnimalStatus::Quarantined.is_alive());
        assert!(!AnimalStatus::Quarantined.is_terminal());
        assert!(AnimalStatus::Culled.is_terminal());
        assert!(!AnimalStatus::Culled.is_alive());
    }

    #[test]
    fn only_live_and_stillborn_outcomes_qualify() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut pregnancy = Pregnancy {
            id: "p-1".to_string(),
            animal_id: "a-1".to_string(),
            start_date: date,
            calving_date: Some(date),
            outcome: Some(PregnancyOutcome::Stillborn),
        };
        assert_eq!(pregnancy.qualifying_calving(), Some(date));

        pregnancy.outcome = Some(PregnancyOutcome::Miscarriage);
        assert_eq!(pregnancy.qualifying_calving(), None);

        pregnancy.outcome = Some(PregnancyOutcome::Live);
        pregnancy.calving_date = None;
        assert_eq!(pregnancy.qualifying_calving(), None);
    }

    #[test]
    fn animal_deserializes_with_ledger_defaults() {
        let animal: Animal = serde_json::from_str(
            r#"{"id":"a-1","species":"cattle","name":"Daisy","breed":"Friesian","sex":"female",
                "birth_date":"2020-01-01","status":"alive","reproductive_status":"open"}"#,
        )
        .unwrap();
        assert_eq!(animal.head_count, 1);
        assert_eq!(animal.current_pen_id, None);
        assert_eq!(animal.sex, Some(Sex::Female));
    }
}
