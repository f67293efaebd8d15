//! Lesson domain models.
//!
//! A `LessonTemplate` is what an instructor submits; the recurrence expander
//! turns it into `LessonDraft`s which are materialized as `LessonInstance`s.
//! Instances are never deleted, only cancelled.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::error::StoreError;
use crate::models::booking::BookingResponse;
use shared::validation::{parse_time_of_day, TIME_OF_DAY_FORMAT};

/// Lesson kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonKind {
    Private,
    Group,
}

impl LessonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonKind::Private => "private",
            LessonKind::Group => "group",
        }
    }
}

impl std::fmt::Display for LessonKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(LessonKind::Private),
            "group" => Ok(LessonKind::Group),
            other => Err(format!("unknown lesson kind: {}", other)),
        }
    }
}

/// Lesson instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    Available,
    Full,
    Cancelled,
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Available => "available",
            LessonStatus::Full => "full",
            LessonStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(LessonStatus::Available),
            "full" => Ok(LessonStatus::Full),
            "cancelled" => Ok(LessonStatus::Cancelled),
            other => Err(format!("unknown lesson status: {}", other)),
        }
    }
}

/// Supported recurrence cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    #[default]
    None,
    Weekly,
    Biweekly,
}

impl Recurrence {
    /// Days between two occurrences, `None` for one-off lessons.
    pub fn step_days(&self) -> Option<i64> {
        match self {
            Recurrence::None => None,
            Recurrence::Weekly => Some(7),
            Recurrence::Biweekly => Some(14),
        }
    }
}

/// Instructor-authored definition of one or more lesson instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonTemplate {
    pub owner_id: Uuid,
    pub kind: LessonKind,
    pub title: String,
    pub description: String,
    pub first_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub price_cents: i64,
    pub recurrence: Recurrence,
    pub recurrence_end_date: Option<NaiveDate>,
}

impl LessonTemplate {
    /// Checks the template invariants.
    pub fn check(&self) -> Result<(), String> {
        if self.end_time <= self.start_time {
            return Err("end time must be after start time".to_string());
        }
        if self.capacity < 1 {
            return Err("capacity must be at least 1".to_string());
        }
        if self.kind == LessonKind::Private && self.capacity != 1 {
            return Err("private lessons have a capacity of exactly 1".to_string());
        }
        if self.price_cents < 0 {
            return Err("price cannot be negative".to_string());
        }
        if self.recurrence != Recurrence::None && self.recurrence_end_date.is_none() {
            return Err("recurring lessons need a recurrence end date".to_string());
        }
        Ok(())
    }
}

/// A not-yet-persisted lesson instance produced by expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDraft {
    pub owner_id: Uuid,
    pub kind: LessonKind,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub occupied: i32,
    pub price_cents: i64,
    pub status: LessonStatus,
    pub recurrence_group_id: Option<Uuid>,
}

/// One concrete, bookable lesson occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonInstance {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: LessonKind,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub occupied: i32,
    pub price_cents: i64,
    pub status: LessonStatus,
    pub recurrence_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LessonInstance {
    /// Materializes a draft with a freshly allocated id.
    pub fn from_draft(draft: LessonDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: draft.owner_id,
            kind: draft.kind,
            title: draft.title,
            description: draft.description,
            date: draft.date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            capacity: draft.capacity,
            occupied: draft.occupied,
            price_cents: draft.price_cents,
            status: draft.status,
            recurrence_group_id: draft.recurrence_group_id,
            created_at,
        }
    }

    /// Status implied by a seat count on a non-cancelled lesson.
    pub fn status_for(occupied: i32, capacity: i32) -> LessonStatus {
        if occupied >= capacity {
            LessonStatus::Full
        } else {
            LessonStatus::Available
        }
    }

    pub fn remaining(&self) -> i32 {
        (self.capacity - self.occupied).max(0)
    }

    pub fn is_bookable(&self) -> bool {
        self.status == LessonStatus::Available
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == LessonStatus::Cancelled
    }

    /// Start instant of the lesson, with dates and times read in `offset`.
    pub fn starts_at(&self, offset: FixedOffset) -> DateTime<Utc> {
        let local = self.date.and_time(self.start_time);
        match offset.from_local_datetime(&local).single() {
            Some(dt) => dt.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&local),
        }
    }

    /// Verifies `0 <= occupied <= capacity` and `full <=> occupied = capacity`.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        let violation = |detail: String| StoreError::InvariantViolation {
            lesson_id: self.id,
            detail,
        };

        if self.occupied < 0 || self.occupied > self.capacity {
            return Err(violation(format!(
                "occupied {} outside 0..={}",
                self.occupied, self.capacity
            )));
        }
        if !self.is_cancelled() {
            let full = self.status == LessonStatus::Full;
            if full != (self.occupied == self.capacity) {
                return Err(violation(format!(
                    "status {} with {}/{} seats taken",
                    self.status, self.occupied, self.capacity
                )));
            }
        }
        Ok(())
    }

    /// Takes `count` seats, or fails without mutating anything.
    pub fn reserve_seats(&mut self, count: i32) -> Result<(), StoreError> {
        self.check_invariants()?;
        if self.is_cancelled() {
            return Err(StoreError::AlreadyCancelled(self.id));
        }
        if self.occupied + count > self.capacity {
            return Err(StoreError::InsufficientCapacity {
                lesson_id: self.id,
                requested: count,
                remaining: self.remaining(),
            });
        }
        self.occupied += count;
        self.status = Self::status_for(self.occupied, self.capacity);
        Ok(())
    }

    /// Gives back `count` seats. Cancelled lessons are left untouched.
    pub fn release_seats(&mut self, count: i32) -> Result<bool, StoreError> {
        self.check_invariants()?;
        if self.is_cancelled() {
            return Ok(false);
        }
        self.occupied = (self.occupied - count).max(0);
        self.status = Self::status_for(self.occupied, self.capacity);
        Ok(true)
    }

    /// Marks the lesson cancelled. Returns false if it already was.
    pub fn mark_cancelled(&mut self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.status = LessonStatus::Cancelled;
        true
    }
}

fn default_max_participants() -> i32 {
    1
}

/// Request payload for creating lessons (one-off or recurring).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "snake_case")]
pub struct CreateLessonRequest {
    pub lesson_type: LessonKind,

    #[validate(length(min = 1, max = 120, message = "Title must be 1-120 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: String,

    pub date: NaiveDate,

    #[validate(custom(function = "shared::validation::validate_time_of_day"))]
    pub start_time: String,

    #[validate(custom(function = "shared::validation::validate_time_of_day"))]
    pub end_time: String,

    #[serde(default = "default_max_participants")]
    #[validate(custom(function = "shared::validation::validate_capacity"))]
    pub max_participants: i32,

    #[validate(custom(function = "shared::validation::validate_price_cents"))]
    pub price_cents: i64,

    #[serde(default)]
    pub recurrence: Recurrence,

    #[serde(default)]
    pub recurrence_end_date: Option<NaiveDate>,
}

impl CreateLessonRequest {
    /// Builds the template for `owner_id`. Private lessons always seat one.
    pub fn into_template(self, owner_id: Uuid) -> Result<LessonTemplate, String> {
        let start_time = parse_time_of_day(&self.start_time)
            .map_err(|_| "start_time must use the HH:MM format".to_string())?;
        let end_time = parse_time_of_day(&self.end_time)
            .map_err(|_| "end_time must use the HH:MM format".to_string())?;

        let capacity = match self.lesson_type {
            LessonKind::Private => 1,
            LessonKind::Group => self.max_participants,
        };

        Ok(LessonTemplate {
            owner_id,
            kind: self.lesson_type,
            title: self.title,
            description: self.description,
            first_date: self.date,
            start_time,
            end_time,
            capacity,
            price_cents: self.price_cents,
            recurrence: self.recurrence,
            recurrence_end_date: self.recurrence_end_date,
        })
    }
}

fn format_time(time: NaiveTime) -> String {
    time.format(TIME_OF_DAY_FORMAT).to_string()
}

/// Response payload for a lesson instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LessonResponse {
    pub id: Uuid,
    pub instructor_id: Uuid,
    pub lesson_type: LessonKind,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub max_participants: i32,
    pub current_participants: i32,
    pub price_cents: i64,
    pub status: LessonStatus,
    pub is_recurring: bool,
    pub recurrence_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<LessonInstance> for LessonResponse {
    fn from(l: LessonInstance) -> Self {
        Self {
            id: l.id,
            instructor_id: l.owner_id,
            lesson_type: l.kind,
            title: l.title,
            description: l.description,
            date: l.date,
            start_time: format_time(l.start_time),
            end_time: format_time(l.end_time),
            max_participants: l.capacity,
            current_participants: l.occupied,
            price_cents: l.price_cents,
            status: l.status,
            is_recurring: l.recurrence_group_id.is_some(),
            recurrence_group_id: l.recurrence_group_id,
            created_at: l.created_at,
        }
    }
}

/// Response for lesson creation and expansion previews.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateLessonsResponse {
    pub recurrence_group_id: Option<Uuid>,
    pub lessons: Vec<LessonResponse>,
    pub total: usize,
}

/// An instructor's lesson with its active bookings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LessonWithBookingsResponse {
    #[serde(flatten)]
    pub lesson: LessonResponse,
    pub bookings: Vec<BookingResponse>,
}

/// Filter for lesson listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LessonFilter {
    pub instructor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub lesson_type: Option<LessonKind>,
    /// Only lessons that still accept bookings.
    #[serde(default)]
    pub bookable_only: bool,
    pub limit: Option<i64>,
}

impl LessonFilter {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    /// In-memory evaluation of the filter.
    pub fn matches(&self, lesson: &LessonInstance) -> bool {
        if let Some(owner) = self.instructor_id {
            if lesson.owner_id != owner {
                return false;
            }
        }
        if let Some(date) = self.date {
            if lesson.date != date {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if lesson.date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if lesson.date > to {
                return false;
            }
        }
        if let Some(kind) = self.lesson_type {
            if lesson.kind != kind {
                return false;
            }
        }
        !(self.bookable_only && !lesson.is_bookable())
    }
}
