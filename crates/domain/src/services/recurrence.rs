//! Recurrence expansion of lesson templates.
//!
//! Expansion is a pure computation: it never touches storage. Callers pass
//! the maximum number of occurrences they are willing to materialize.

use chrono::{Duration, NaiveDate};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{LessonDraft, LessonStatus, LessonTemplate, Recurrence};

/// Errors produced while expanding a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExpansionError {
    #[error("Invalid lesson template: {0}")]
    InvalidTemplate(String),

    #[error("Template expands to {count} lessons, at most {max} allowed")]
    TooManyOccurrences { count: usize, max: usize },
}

/// Number of instances the template produces, computed without allocating.
pub fn occurrence_count(template: &LessonTemplate) -> usize {
    let (Some(step), Some(end)) = (
        template.recurrence.step_days(),
        template.recurrence_end_date,
    ) else {
        return 1;
    };

    let span = (end - template.first_date).num_days();
    if span < 0 {
        return 1;
    }
    (span / step) as usize + 1
}

/// Dates of all occurrences, ascending, first date always included.
fn occurrence_dates(template: &LessonTemplate, count: usize) -> Vec<NaiveDate> {
    let step = template.recurrence.step_days().unwrap_or(0);
    (0..count)
        .map(|i| template.first_date + Duration::days(step * i as i64))
        .collect()
}

/// Expands a template into ordered lesson drafts.
///
/// One-off lessons get no recurrence group id; every draft of a recurring
/// template shares one freshly allocated id. An end date before the first
/// date yields the single first occurrence.
pub fn expand_template(
    template: &LessonTemplate,
    max_occurrences: usize,
) -> Result<Vec<LessonDraft>, ExpansionError> {
    template.check().map_err(ExpansionError::InvalidTemplate)?;

    let count = occurrence_count(template);
    if count > max_occurrences {
        return Err(ExpansionError::TooManyOccurrences {
            count,
            max: max_occurrences,
        });
    }

    let recurrence_group_id = match template.recurrence {
        Recurrence::None => None,
        Recurrence::Weekly | Recurrence::Biweekly => Some(Uuid::new_v4()),
    };

    let drafts = occurrence_dates(template, count)
        .into_iter()
        .map(|date| LessonDraft {
            owner_id: template.owner_id,
            kind: template.kind,
            title: template.title.clone(),
            description: template.description.clone(),
            date,
            start_time: template.start_time,
            end_time: template.end_time,
            capacity: template.capacity,
            occupied: 0,
            price_cents: template.price_cents,
            status: LessonStatus::Available,
            recurrence_group_id,
        })
        .collect();

    Ok(drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LessonKind;
    use chrono::NaiveTime;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn template(recurrence: Recurrence, end: Option<NaiveDate>) -> LessonTemplate {
        LessonTemplate {
            owner_id: Uuid::new_v4(),
            kind: LessonKind::Group,
            title: "Beginner slalom".to_string(),
            description: "Green slopes only".to_string(),
            first_date: date(2026, 1, 5),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            capacity: 6,
            price_cents: 4_500,
            recurrence,
            recurrence_end_date: end,
        }
    }

    #[test]
    fn test_one_off_lesson() {
        let drafts = expand_template(&template(Recurrence::None, None), 52).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].date, date(2026, 1, 5));
        assert_eq!(drafts[0].recurrence_group_id, None);
        assert_eq!(drafts[0].status, LessonStatus::Available);
        assert_eq!(drafts[0].occupied, 0);
    }

    #[test]
    fn test_weekly_includes_end_date() {
        let t = template(Recurrence::Weekly, Some(date(2026, 1, 26)));
        let drafts = expand_template(&t, 52).unwrap();
        let dates: Vec<_> = drafts.iter().map(|d| d.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2026, 1, 5),
                date(2026, 1, 12),
                date(2026, 1, 19),
                date(2026, 1, 26)
            ]
        );

        let group = drafts[0].recurrence_group_id;
        assert!(group.is_some());
        assert!(drafts.iter().all(|d| d.recurrence_group_id == group));
        assert!(drafts
            .iter()
            .all(|d| d.capacity == 6 && d.price_cents == 4_500 && d.title == t.title));
    }

    #[test]
    fn test_weekly_end_between_steps() {
        let t = template(Recurrence::Weekly, Some(date(2026, 1, 25)));
        assert_eq!(occurrence_count(&t), 3);
        assert_eq!(expand_template(&t, 52).unwrap().len(), 3);
    }

    #[test]
    fn test_biweekly_step() {
        let t = template(Recurrence::Biweekly, Some(date(2026, 2, 16)));
        let drafts = expand_template(&t, 52).unwrap();
        let dates: Vec<_> = drafts.iter().map(|d| d.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2026, 1, 5),
                date(2026, 1, 19),
                date(2026, 2, 2),
                date(2026, 2, 16)
            ]
        );
    }

    #[test]
    fn test_end_before_first_keeps_first_occurrence() {
        for recurrence in [Recurrence::Weekly, Recurrence::Biweekly] {
            let t = template(recurrence, Some(date(2025, 12, 1)));
            let drafts = expand_template(&t, 52).unwrap();
            assert_eq!(drafts.len(), 1);
            assert_eq!(drafts[0].date, t.first_date);
        }
    }

    #[test]
    fn test_dates_strictly_ascending() {
        let t = template(Recurrence::Weekly, Some(date(2026, 12, 31)));
        let drafts = expand_template(&t, 100).unwrap();
        assert_eq!(drafts.len(), occurrence_count(&t));
        assert!(drafts.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_occurrence_cap_enforced() {
        let t = template(Recurrence::Weekly, Some(date(2030, 1, 1)));
        let err = expand_template(&t, 52).unwrap_err();
        assert!(matches!(
            err,
            ExpansionError::TooManyOccurrences { max: 52, .. }
        ));
    }

    #[test]
    fn test_cap_is_inclusive() {
        // 52 weekly occurrences starting 2026-01-05 end on 2026-12-28.
        let t = template(Recurrence::Weekly, Some(date(2026, 12, 28)));
        assert_eq!(occurrence_count(&t), 52);
        assert_eq!(expand_template(&t, 52).unwrap().len(), 52);
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut t = template(Recurrence::None, None);
        t.end_time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(matches!(
            expand_template(&t, 52),
            Err(ExpansionError::InvalidTemplate(_))
        ));

        let t = template(Recurrence::Weekly, None);
        assert!(matches!(
            expand_template(&t, 52),
            Err(ExpansionError::InvalidTemplate(_))
        ));
    }
}
