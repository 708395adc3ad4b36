use crate::dates::{self, now_timestamp};
use crate::error::{unique_or_db, CoreError, CoreResult};
use crate::grades;
use crate::model::{Period, PeriodType, Schedule, SchoolDay};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodInput {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub activity: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn validate_periods(input: &[PeriodInput]) -> CoreResult<Vec<Period>> {
    if input.is_empty() {
        return Err(CoreError::invalid("periods", "at least one period is required"));
    }
    let mut out = Vec::with_capacity(input.len());
    for (i, p) in input.iter().enumerate() {
        let field = |name: &str| format!("periods[{i}].{name}");
        let start_raw = p.start_time.as_deref().unwrap_or_default();
        let end_raw = p.end_time.as_deref().unwrap_or_default();
        let start = dates::parse_clock(&field("startTime"), start_raw)?;
        let end = dates::parse_clock(&field("endTime"), end_raw)?;
        if start >= end {
            return Err(CoreError::invalid(
                &field("endTime"),
                format!("period {} must end after it starts", i + 1),
            ));
        }
        let activity = p
            .activity
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::missing_fields(vec![field("activity")]))?;
        let kind = PeriodType::parse_field(&field("type"), p.kind.as_deref().unwrap_or_default())?;
        out.push(Period {
            start_time: start.format("%H:%M").to_string(),
            end_time: end.format("%H:%M").to_string(),
            activity: activity.to_string(),
            kind,
        });
    }
    Ok(out)
}

fn load_periods(conn: &Connection, schedule_id: &str) -> CoreResult<Vec<Period>> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time, activity, period_type
         FROM schedule_periods WHERE schedule_id = ? ORDER BY idx",
    )?;
    let rows = stmt
        .query_map([schedule_id], |r| {
            Ok(Period {
                start_time: r.get(0)?,
                end_time: r.get(1)?,
                activity: r.get(2)?,
                kind: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_periods(conn: &Connection, schedule_id: &str, periods: &[Period]) -> CoreResult<()> {
    conn.execute(
        "DELETE FROM schedule_periods WHERE schedule_id = ?",
        [schedule_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO schedule_periods(schedule_id, idx, start_time, end_time, activity, period_type)
         VALUES(?, ?, ?, ?, ?, ?)",
    )?;
    for (i, p) in periods.iter().enumerate() {
        stmt.execute((
            schedule_id,
            i as i64,
            &p.start_time,
            &p.end_time,
            &p.activity,
            p.kind,
        ))?;
    }
    Ok(())
}

fn find_schedule(
    conn: &Connection,
    sql_where: &str,
    params: impl rusqlite::Params,
) -> CoreResult<Option<Schedule>> {
    let sql = format!(
        "SELECT id, grade_id, day_of_week, is_active, created_by FROM schedules WHERE {}",
        sql_where
    );
    let found = conn
        .query_row(&sql, params, |r| {
            Ok(Schedule {
                id: r.get(0)?,
                grade_id: r.get(1)?,
                day_of_week: r.get(2)?,
                periods: Vec::new(),
                is_active: r.get::<_, i64>(3)? != 0,
                created_by: r.get(4)?,
            })
        })
        .optional()?;
    match found {
        Some(mut s) => {
            s.periods = load_periods(conn, &s.id)?;
            Ok(Some(s))
        }
        None => Ok(None),
    }
}

pub fn get_schedule(conn: &Connection, schedule_id: &str) -> CoreResult<Schedule> {
    find_schedule(conn, "id = ?", [schedule_id])?.ok_or(CoreError::NotFound("schedule"))
}

fn schedule_for_day(
    conn: &Connection,
    grade_id: &str,
    day: SchoolDay,
) -> CoreResult<Option<Schedule>> {
    find_schedule(
        conn,
        "grade_id = ? AND day_of_week = ? AND is_active = 1",
        rusqlite::params![grade_id, day],
    )
}

/// Sets the periods of a grade's weekday, creating the schedule on first use.
pub fn upsert_schedule(
    conn: &Connection,
    grade_id: &str,
    day: &str,
    periods: &[PeriodInput],
    actor_id: &str,
) -> CoreResult<Schedule> {
    let day = SchoolDay::parse_field("dayOfWeek", day)?;
    let periods = validate_periods(periods)?;
    grades::get_grade(conn, grade_id)?;

    let tx = conn.unchecked_transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM schedules WHERE grade_id = ? AND day_of_week = ?",
            rusqlite::params![grade_id, day],
            |r| r.get(0),
        )
        .optional()?;
    let id = match existing {
        Some(id) => {
            tx.execute("UPDATE schedules SET is_active = 1 WHERE id = ?", [&id])?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO schedules(id, grade_id, day_of_week, is_active, created_by, created_at)
                 VALUES(?, ?, ?, 1, ?, ?)",
                rusqlite::params![id, grade_id, day, actor_id, now_timestamp()],
            )
            .map_err(|e| unique_or_db(e, "Schedule already exists for this grade and day"))?;
            id
        }
    };
    write_periods(&tx, &id, &periods)?;
    tx.commit()?;
    get_schedule(conn, &id)
}

pub fn update_schedule(
    conn: &Connection,
    schedule_id: &str,
    periods: &[PeriodInput],
) -> CoreResult<Schedule> {
    get_schedule(conn, schedule_id)?;
    let periods = validate_periods(periods)?;
    let tx = conn.unchecked_transaction()?;
    write_periods(&tx, schedule_id, &periods)?;
    tx.commit()?;
    get_schedule(conn, schedule_id)
}

pub fn delete_schedule(conn: &Connection, schedule_id: &str) -> CoreResult<()> {
    get_schedule(conn, schedule_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM schedule_periods WHERE schedule_id = ?",
        [schedule_id],
    )?;
    tx.execute("DELETE FROM schedules WHERE id = ?", [schedule_id])?;
    tx.commit()?;
    Ok(())
}

/// Removes every weekday schedule of a grade; returns how many were removed.
pub fn delete_grade_schedules(conn: &Connection, grade_id: &str) -> CoreResult<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM schedule_periods WHERE schedule_id IN (
           SELECT id FROM schedules WHERE grade_id = ?
         )",
        [grade_id],
    )?;
    let n = tx.execute("DELETE FROM schedules WHERE grade_id = ?", [grade_id])?;
    tx.commit()?;
    Ok(n)
}

#[derive(Debug, Clone, Serialize)]
pub struct Week {
    pub monday: Option<Schedule>,
    pub tuesday: Option<Schedule>,
    pub wednesday: Option<Schedule>,
    pub thursday: Option<Schedule>,
    pub friday: Option<Schedule>,
}

pub fn week(conn: &Connection, grade_id: &str) -> CoreResult<Week> {
    grades::get_grade(conn, grade_id)?;
    Ok(Week {
        monday: schedule_for_day(conn, grade_id, SchoolDay::Monday)?,
        tuesday: schedule_for_day(conn, grade_id, SchoolDay::Tuesday)?,
        wednesday: schedule_for_day(conn, grade_id, SchoolDay::Wednesday)?,
        thursday: schedule_for_day(conn, grade_id, SchoolDay::Thursday)?,
        friday: schedule_for_day(conn, grade_id, SchoolDay::Friday)?,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub date: String,
    pub day_of_week: Option<SchoolDay>,
    pub schedule: Option<Schedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The schedule of the weekday `date` falls on (today when absent). Weekends have none.
pub fn for_date(conn: &Connection, grade_id: &str, date: Option<&str>) -> CoreResult<DaySchedule> {
    let day = match date.filter(|s| !s.trim().is_empty()) {
        Some(raw) => dates::parse_day("date", raw)?,
        None => dates::today(),
    };
    let date = dates::format_day(day);
    let Some(weekday) = SchoolDay::from_weekday(day.weekday()) else {
        return Ok(DaySchedule {
            date,
            day_of_week: None,
            schedule: None,
            message: Some("No school on weekends".to_string()),
        });
    };
    grades::get_grade(conn, grade_id)?;
    let schedule = schedule_for_day(conn, grade_id, weekday)?;
    let message = schedule
        .is_none()
        .then(|| format!("No schedule set for {}", weekday.as_str()));
    Ok(DaySchedule {
        date,
        day_of_week: Some(weekday),
        schedule,
        message,
    })
}
