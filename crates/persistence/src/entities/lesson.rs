//! Lesson instance entity (database row mapping).

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use domain::models::{LessonInstance, LessonKind, LessonStatus};
use sqlx::FromRow;
use uuid::Uuid;

/// Column list shared by every lesson query.
pub const LESSON_COLUMNS: &str = "id, owner_id, kind, title, description, lesson_date, \
     start_time, end_time, capacity, occupied, price_cents, status, recurrence_group_id, \
     created_at, updated_at";

/// Database row mapping for the lessons table.
#[derive(Debug, Clone, FromRow)]
pub struct LessonEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub lesson_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capacity: i32,
    pub occupied: i32,
    pub price_cents: i64,
    pub status: String,
    pub recurrence_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LessonEntity> for LessonInstance {
    fn from(entity: LessonEntity) -> Self {
        let kind = entity.kind.parse::<LessonKind>().unwrap_or(LessonKind::Group);
        let status = entity
            .status
            .parse::<LessonStatus>()
            .unwrap_or_else(|_| LessonInstance::status_for(entity.occupied, entity.capacity));

        Self {
            id: entity.id,
            owner_id: entity.owner_id,
            kind,
            title: entity.title,
            description: entity.description,
            date: entity.lesson_date,
            start_time: entity.start_time,
            end_time: entity.end_time,
            capacity: entity.capacity,
            occupied: entity.occupied,
            price_cents: entity.price_cents,
            status,
            recurrence_group_id: entity.recurrence_group_id,
            created_at: entity.created_at,
        }
    }
}
