//! Trip, day and schedule item records.
//!
//! # Invariants
//! - A day's calendar date is derived: `trip.start_date + (day_no - 1)`.
//! - `visit_time` is a time-of-day, never a date.

use chrono::{Days, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type TripId = Uuid;
pub type DayId = Uuid;
pub type ItemId = Uuid;

pub const TITLE_MAX_CHARS: usize = 100;
pub const MEMO_MAX_CHARS: usize = 255;
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Payload validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItineraryValidationError {
    BlankTitle,
    TitleTooLong { chars: usize },
    MemoTooLong { chars: usize },
    InvalidVisitTime(String),
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    BlankPlaceRef,
}

impl Display for ItineraryValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "trip title must not be blank"),
            Self::TitleTooLong { chars } => write!(
                f,
                "trip title has {chars} characters; at most {TITLE_MAX_CHARS} allowed"
            ),
            Self::MemoTooLong { chars } => write!(
                f,
                "memo has {chars} characters; at most {MEMO_MAX_CHARS} allowed"
            ),
            Self::InvalidVisitTime(value) => {
                write!(f, "visit time `{value}` is not HH:MM or HH:MM:SS")
            }
            Self::InvalidDateRange { start, end } => {
                write!(f, "trip end date {end} is before start date {start}")
            }
            Self::BlankPlaceRef => write!(f, "place reference must not be blank"),
        }
    }
}

impl Error for ItineraryValidationError {}

/// Trip header; owns an ordered list of days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub trip_uuid: TripId,
    pub title: String,
    pub start_date: NaiveDate,
    /// Number of days currently attached to the trip.
    pub day_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Trip {
    /// Last calendar date covered by the trip, `None` for a trip with no days.
    pub fn end_date(&self) -> Option<NaiveDate> {
        day_date(self.start_date, self.day_count)
    }
}

/// One day of a trip, ordered by `day_no` within the trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDay {
    pub day_uuid: DayId,
    pub trip_uuid: TripId,
    pub day_no: i64,
    pub memo: Option<String>,
    /// Derived from the trip start date and `day_no`.
    pub date: Option<NaiveDate>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One stop of a day, ordered by `seq_no` within the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    pub item_uuid: ItemId,
    pub day_uuid: DayId,
    pub place_ref: Option<String>,
    pub seq_no: i64,
    pub visit_time: Option<NaiveTime>,
    pub memo: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for trip creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrip {
    pub title: String,
    pub start_date: NaiveDate,
    /// Inclusive; one day is generated per calendar date.
    pub end_date: NaiveDate,
}

impl NewTrip {
    /// Validates the title and date span, returning the normalized title.
    pub fn validate(&self) -> Result<String, ItineraryValidationError> {
        let title = normalize_title(&self.title)?;
        span_days(self.start_date, self.end_date)?;
        Ok(title)
    }

    /// Number of days in the inclusive span.
    pub fn day_count(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// Partial trip update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripPatch {
    pub title: Option<String>,
    /// Shifts every day date; the day count stays unless `end_date` is set.
    pub start_date: Option<NaiveDate>,
    /// Inclusive; days are appended or dropped from the tail to match.
    pub end_date: Option<NaiveDate>,
}

/// Trip header after a [`TripPatch`] was applied and validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripRevision {
    pub title: String,
    pub start_date: NaiveDate,
    pub day_count: i64,
}

impl TripPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.start_date.is_none() && self.end_date.is_none()
    }

    /// Merges the patch over `current` and validates the result.
    pub fn revise(&self, current: &Trip) -> Result<TripRevision, ItineraryValidationError> {
        let title = normalize_title(self.title.as_deref().unwrap_or(&current.title))?;
        let start_date = self.start_date.unwrap_or(current.start_date);
        let day_count = match self.end_date {
            Some(end_date) => span_days(start_date, end_date)?,
            None => current.day_count,
        };
        Ok(TripRevision {
            title,
            start_date,
            day_count,
        })
    }
}

fn normalize_title(title: &str) -> Result<String, ItineraryValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ItineraryValidationError::BlankTitle);
    }
    let chars = title.chars().count();
    if chars > TITLE_MAX_CHARS {
        return Err(ItineraryValidationError::TitleTooLong { chars });
    }
    Ok(title.to_string())
}

fn span_days(start: NaiveDate, end: NaiveDate) -> Result<i64, ItineraryValidationError> {
    if end < start {
        return Err(ItineraryValidationError::InvalidDateRange { start, end });
    }
    Ok((end - start).num_days() + 1)
}

/// Input for schedule item creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewScheduleItem {
    pub place_ref: Option<String>,
    /// Raw `HH:MM` or `HH:MM:SS`.
    pub visit_time: Option<String>,
    pub memo: Option<String>,
}

/// Validated schedule item payload ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePayload {
    pub place_ref: Option<String>,
    pub visit_time: Option<NaiveTime>,
    pub memo: Option<String>,
}

impl NewScheduleItem {
    pub fn validate(&self) -> Result<SchedulePayload, ItineraryValidationError> {
        let place_ref = match self.place_ref.as_deref().map(str::trim) {
            Some("") => return Err(ItineraryValidationError::BlankPlaceRef),
            Some(value) => Some(value.to_string()),
            None => None,
        };
        Ok(SchedulePayload {
            place_ref,
            visit_time: parse_visit_time(self.visit_time.as_deref())?,
            memo: normalize_memo(self.memo.as_deref())?,
        })
    }
}

/// Partial update for a schedule item; `None` leaves the field unchanged,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleItemPatch {
    pub visit_time: Option<Option<String>>,
    pub memo: Option<Option<String>>,
}

/// Derives the calendar date of `day_no` for a trip starting at `start`.
pub fn day_date(start: NaiveDate, day_no: i64) -> Option<NaiveDate> {
    let offset = u64::try_from(day_no.checked_sub(1)?).ok()?;
    start.checked_add_days(Days::new(offset))
}

/// Parses a time-of-day; blank input counts as absent.
pub fn parse_visit_time(
    value: Option<&str>,
) -> Result<Option<NaiveTime>, ItineraryValidationError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map(Some)
        .map_err(|_| ItineraryValidationError::InvalidVisitTime(raw.to_string()))
}

/// Trims a memo, maps blank to `None` and enforces the length limit.
pub fn normalize_memo(value: Option<&str>) -> Result<Option<String>, ItineraryValidationError> {
    let Some(memo) = value.map(str::trim).filter(|memo| !memo.is_empty()) else {
        return Ok(None);
    };
    let chars = memo.chars().count();
    if chars > MEMO_MAX_CHARS {
        return Err(ItineraryValidationError::MemoTooLong { chars });
    }
    Ok(Some(memo.to_string()))
}
