use chrono::{Duration, NaiveDate};
use thiserror::Error;

use crate::types::{Lactation, LactationStage};

/// Changes required to chain a new lactation after a calving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LactationTransition {
    /// Open lactation to close, with its new end date.
    pub close: Option<(String, NaiveDate)>,
    pub open: NewLactation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewLactation {
    pub start_date: NaiveDate,
    pub number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LactationError {
    #[error("calving on {calving} does not follow the open lactation started {open_start}")]
    CalvingBeforeOpenStart {
        calving: NaiveDate,
        open_start: NaiveDate,
    },
    #[error("calving on {calving} overlaps the previous lactation ended {previous_end}")]
    CalvingOverlapsPrevious {
        calving: NaiveDate,
        previous_end: NaiveDate,
    },
}

/// Plans the lactation chain step for a calving on `calving_date`.
///
/// An open predecessor is closed the day before the calving, and the new
/// lactation takes the next number. Without a predecessor the animal starts at
/// lactation #1.
pub fn chain(
    previous: Option<&Lactation>,
    calving_date: NaiveDate,
) -> Result<LactationTransition, LactationError> {
    let Some(previous) = previous else {
        return Ok(LactationTransition {
            close: None,
            open: NewLactation {
                start_date: calving_date,
                number: 1,
            },
        });
    };

    let close = match previous.end_date {
        None => {
            if calving_date <= previous.start_date {
                return Err(LactationError::CalvingBeforeOpenStart {
                    calving: calving_date,
                    open_start: previous.start_date,
                });
            }
            Some((previous.id.clone(), calving_date - Duration::days(1)))
        }
        Some(previous_end) => {
            if calving_date <= previous_end {
                return Err(LactationError::CalvingOverlapsPrevious {
                    calving: calving_date,
                    previous_end,
                });
            }
            None
        }
    };

    Ok(LactationTransition {
        close,
        open: NewLactation {
            start_date: calving_date,
            number: previous.number + 1,
        },
    })
}

/// Days elapsed in the lactation, measured to its end or to `today` when open.
pub fn days_in_lactation(lactation: &Lactation, today: NaiveDate) -> i64 {
    let until = lactation.end_date.unwrap_or(today);
    (until - lactation.start_date).num_days()
}

pub fn stage(lactation: &Lactation, today: NaiveDate) -> LactationStage {
    if lactation.end_date.is_some() {
        return LactationStage::Ended;
    }
    match days_in_lactation(lactation, today) {
        days if days <= 100 => LactationStage::Early,
        days if days <= 200 => LactationStage::Mid,
        days if days <= 275 => LactationStage::Late,
        _ => LactationStage::Dry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lactation(id: &str, start: NaiveDate, end: Option<NaiveDate>, number: u32) -> Lactation {
        Lactation {
            id: id.to_string(),
            animal_id: "a-1".to_string(),
            pregnancy_id: None,
            start_date: start,
            end_date: end,
            number,
        }
    }

    #[test]
    fn first_calving_opens_lactation_one() {
        let transition = chain(None, date(2024, 2, 10)).unwrap();
        assert_eq!(transition.close, None);
        assert_eq!(transition.open.number, 1);
        assert_eq!(transition.open.start_date, date(2024, 2, 10));
    }

    #[test]
    fn open_lactation_is_closed_the_day_before_calving() {
        let open = lactation("l-1", date(2023, 1, 5), None, 1);
        let transition = chain(Some(&open), date(2024, 2, 10)).unwrap();
        let (closed_id, end) = transition.close.expect("open lactation closed");
        assert_eq!(closed_id, "l-1");
        assert_eq!(end + Duration::days(1), transition.open.start_date);
        assert_eq!(transition.open.number, 2);
    }

    #[test]
    fn closed_predecessor_only_bumps_the_number() {
        let closed = lactation("l-3", date(2022, 1, 1), Some(date(2022, 10, 1)), 3);
        let transition = chain(Some(&closed), date(2023, 1, 1)).unwrap();
        assert_eq!(transition.close, None);
        assert_eq!(transition.open.number, 4);
    }

    #[test]
    fn calving_on_or_before_open_start_is_rejected() {
        let open = lactation("l-1", date(2024, 2, 10), None, 1);
        let err = chain(Some(&open), date(2024, 2, 10)).unwrap_err();
        assert!(matches!(err, LactationError::CalvingBeforeOpenStart { .. }));
    }

    #[test]
    fn calving_inside_closed_lactation_is_rejected() {
        let closed = lactation("l-1", date(2022, 1, 1), Some(date(2022, 10, 1)), 1);
        let err = chain(Some(&closed), date(2022, 9, 1)).unwrap_err();
        assert!(matches!(err, LactationError::CalvingOverlapsPrevious { .. }));
    }

    #[test]
    fn stages_follow_days_in_milk() {
        let start = date(2024, 1, 1);
        let open = lactation("l-1", start, None, 1);
        assert_eq!(stage(&open, start + Duration::days(100)), LactationStage::Early);
        assert_eq!(stage(&open, start + Duration::days(101)), LactationStage::Mid);
        assert_eq!(stage(&open, start + Duration::days(250)), LactationStage::Late);
        assert_eq!(stage(&open, start + Duration::days(300)), LactationStage::Dry);

        let closed = lactation("l-2", start, Some(start + Duration::days(30)), 1);
        assert_eq!(stage(&closed, start + Duration::days(400)), LactationStage::Ended);
        assert_eq!(days_in_lactation(&closed, start + Duration::days(400)), 30);
    }
}
