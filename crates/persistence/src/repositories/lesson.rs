//! Lesson repository for database operations.
//!
//! Seat counters are only ever changed by conditional updates on the lesson
//! row, so PostgreSQL row locking provides the per-lesson critical section.

use chrono::NaiveDate;
use domain::models::{Booking, LessonFilter, LessonInstance, LessonStatus};
use domain::services::{LessonCancellation, LessonStore};
use domain::StoreError;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::store_error;
use crate::entities::{BookingEntity, LessonEntity, BOOKING_COLUMNS, LESSON_COLUMNS};
use crate::metrics::QueryTimer;

/// Repository for lesson instances.
#[derive(Clone)]
pub struct LessonRepository {
    pool: PgPool,
}

impl LessonRepository {
    /// Creates a new LessonRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<LessonEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_lesson_by_id");
        let result = sqlx::query_as::<_, LessonEntity>(&format!(
            "SELECT {} FROM lessons WHERE id = $1",
            LESSON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Explains why a conditional seat update matched no row.
    async fn reserve_failure(&self, id: Uuid, count: i32) -> StoreError {
        match self.find_by_id(id).await {
            Ok(Some(entity)) => {
                let mut lesson: LessonInstance = entity.into();
                match lesson.reserve_seats(count) {
                    Err(err) => err,
                    // Seats freed up between the update and this read.
                    Ok(()) => StoreError::Conflict(format!(
                        "lesson {} changed concurrently, retry the request",
                        id
                    )),
                }
            }
            Ok(None) => StoreError::lesson_not_found(id),
            Err(e) => store_error(e),
        }
    }
}

/// Locks a lesson row for the rest of the transaction.
pub(crate) async fn lock_lesson(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<LessonInstance, StoreError> {
    let entity = sqlx::query_as::<_, LessonEntity>(&format!(
        "SELECT {} FROM lessons WHERE id = $1 FOR UPDATE",
        LESSON_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(store_error)?
    .ok_or_else(|| StoreError::lesson_not_found(id))?;

    Ok(entity.into())
}

/// Writes back the seat counters of a locked lesson.
pub(crate) async fn store_seats(
    tx: &mut Transaction<'_, Postgres>,
    lesson: &LessonInstance,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE lessons
        SET occupied = $2, status = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(lesson.id)
    .bind(lesson.occupied)
    .bind(lesson.status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(store_error)?;
    Ok(())
}

#[async_trait::async_trait]
impl LessonStore for LessonRepository {
    async fn insert_lessons(&self, lessons: &[LessonInstance]) -> Result<(), StoreError> {
        let timer = QueryTimer::new("insert_lessons");
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        for lesson in lessons {
            sqlx::query(
                r#"
                INSERT INTO lessons (id, owner_id, kind, title, description, lesson_date,
                                     start_time, end_time, capacity, occupied, price_cents,
                                     status, recurrence_group_id, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
                "#,
            )
            .bind(lesson.id)
            .bind(lesson.owner_id)
            .bind(lesson.kind.as_str())
            .bind(&lesson.title)
            .bind(&lesson.description)
            .bind(lesson.date)
            .bind(lesson.start_time)
            .bind(lesson.end_time)
            .bind(lesson.capacity)
            .bind(lesson.occupied)
            .bind(lesson.price_cents)
            .bind(lesson.status.as_str())
            .bind(lesson.recurrence_group_id)
            .bind(lesson.created_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;
        timer.record();
        Ok(())
    }

    async fn get_lesson(&self, id: Uuid) -> Result<Option<LessonInstance>, StoreError> {
        Ok(self.find_by_id(id).await.map_err(store_error)?.map(Into::into))
    }

    async fn list_lessons(&self, filter: &LessonFilter) -> Result<Vec<LessonInstance>, StoreError> {
        let timer = QueryTimer::new("list_lessons");
        let result = sqlx::query_as::<_, LessonEntity>(&format!(
            r#"
            SELECT {}
            FROM lessons
            WHERE ($1::uuid IS NULL OR owner_id = $1)
              AND ($2::date IS NULL OR lesson_date = $2)
              AND ($3::date IS NULL OR lesson_date >= $3)
              AND ($4::date IS NULL OR lesson_date <= $4)
              AND ($5::text IS NULL OR kind = $5)
              AND (NOT $6 OR status = 'available')
            ORDER BY lesson_date, start_time, created_at
            LIMIT $7
            "#,
            LESSON_COLUMNS
        ))
        .bind(filter.instructor_id)
        .bind(filter.date)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.lesson_type.map(|k| k.as_str()))
        .bind(filter.bookable_only)
        .bind(filter.effective_limit())
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);

        Ok(result
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn reserve(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError> {
        let timer = QueryTimer::new("reserve_lesson_seats");
        let updated = sqlx::query_as::<_, LessonEntity>(&format!(
            r#"
            UPDATE lessons
            SET occupied = occupied + $2,
                status = CASE WHEN occupied + $2 = capacity THEN 'full' ELSE 'available' END,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'cancelled' AND occupied + $2 <= capacity
            RETURNING {}
            "#,
            LESSON_COLUMNS
        ))
        .bind(id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        timer.record();

        match updated {
            Some(entity) => {
                let lesson: LessonInstance = entity.into();
                lesson.check_invariants()?;
                Ok(lesson)
            }
            None => Err(self.reserve_failure(id, count).await),
        }
    }

    async fn release(&self, id: Uuid, count: i32) -> Result<LessonInstance, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut lesson = lock_lesson(&mut tx, id).await?;
        if lesson.release_seats(count)? {
            store_seats(&mut tx, &lesson).await?;
        }
        tx.commit().await.map_err(store_error)?;
        Ok(lesson)
    }

    async fn cancel(&self, id: Uuid) -> Result<LessonCancellation, StoreError> {
        let timer = QueryTimer::new("cancel_lesson");
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut lesson = lock_lesson(&mut tx, id).await?;

        let newly_cancelled = lesson.mark_cancelled();
        if newly_cancelled {
            sqlx::query(
                r#"
                UPDATE lessons
                SET status = $2, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(LessonStatus::Cancelled.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        let active_bookings: Vec<Booking> = sqlx::query_as::<_, BookingEntity>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE lesson_id = $1 AND reservation_status <> 'cancelled'
            ORDER BY created_at
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(Into::into)
        .collect();

        tx.commit().await.map_err(store_error)?;
        timer.record();

        Ok(LessonCancellation {
            lesson,
            newly_cancelled,
            active_bookings,
        })
    }

    async fn count_bookable(&self, from: NaiveDate) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) as count
            FROM lessons
            WHERE lesson_date >= $1 AND status = 'available'
            "#,
        )
        .bind(from)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(count.0)
    }
}
