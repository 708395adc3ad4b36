//! Classroom capacity allocation.
//!
//! `current_count` on a classroom is a denormalized occupancy counter. Callers pair every
//! `occupy` with the student write that assigns the classroom and every `release` with the
//! write that takes it away; `recount` rebuilds the counters from the student table.

use crate::dates::now_timestamp;
use crate::error::{CoreError, CoreResult};
use crate::grades;
use crate::model::{Classroom, Grade};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

const SUFFIXES: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const CLASSROOM_COLUMNS: &str =
    "id, grade_id, name, suffix, capacity, current_count, is_active";

fn classroom_from_row(r: &Row<'_>) -> rusqlite::Result<Classroom> {
    Ok(Classroom {
        id: r.get(0)?,
        grade_id: r.get(1)?,
        name: r.get(2)?,
        suffix: r.get(3)?,
        capacity: r.get(4)?,
        current_count: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
    })
}

/// Suffix of the `n`th section (0-based): `A`..`Z`, then the numeral `n + 1`.
pub fn suffix_for(n: usize) -> String {
    match SUFFIXES.get(n) {
        Some(b) => (*b as char).to_string(),
        None => (n + 1).to_string(),
    }
}

pub fn get_classroom(conn: &Connection, classroom_id: &str) -> CoreResult<Classroom> {
    conn.query_row(
        &format!("SELECT {CLASSROOM_COLUMNS} FROM classrooms WHERE id = ?"),
        [classroom_id],
        classroom_from_row,
    )
    .optional()?
    .ok_or(CoreError::NotFound("classroom"))
}

pub fn list_classrooms(conn: &Connection, grade_id: &str) -> CoreResult<Vec<Classroom>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLASSROOM_COLUMNS} FROM classrooms
         WHERE grade_id = ? AND is_active = 1
         ORDER BY suffix"
    ))?;
    let rows = stmt
        .query_map([grade_id], classroom_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns a classroom of `grade_id` with spare capacity, provisioning a new section when
/// every existing one is full. The returned classroom's count is NOT incremented.
pub fn allocate(conn: &Connection, grade_id: &str) -> CoreResult<Classroom> {
    let grade = grades::get_grade(conn, grade_id)?;
    let open = conn
        .query_row(
            &format!(
                "SELECT {CLASSROOM_COLUMNS} FROM classrooms
                 WHERE grade_id = ? AND is_active = 1 AND current_count < capacity
                 ORDER BY suffix
                 LIMIT 1"
            ),
            [grade_id],
            classroom_from_row,
        )
        .optional()?;
    match open {
        Some(c) => Ok(c),
        None => provision(conn, &grade),
    }
}

/// Creates the next section of `grade`: suffix by existing section count, skipping any
/// suffix already taken, with the grade's current capacity.
pub fn provision(conn: &Connection, grade: &Grade) -> CoreResult<Classroom> {
    let mut stmt = conn.prepare("SELECT suffix FROM classrooms WHERE grade_id = ?")?;
    let used: HashSet<String> = stmt
        .query_map([&grade.id], |r| r.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    let mut n = used.len();
    let mut suffix = suffix_for(n);
    while used.contains(&suffix) {
        n += 1;
        suffix = suffix_for(n);
    }

    let classroom = Classroom {
        id: Uuid::new_v4().to_string(),
        grade_id: grade.id.clone(),
        name: format!("{}-{}", grade.name, suffix),
        suffix,
        capacity: grade.max_capacity_per_class,
        current_count: 0,
        is_active: true,
    };
    conn.execute(
        "INSERT INTO classrooms(id, grade_id, name, suffix, capacity, current_count, is_active,
           created_at)
         VALUES(?, ?, ?, ?, ?, 0, 1, ?)",
        (
            &classroom.id,
            &classroom.grade_id,
            &classroom.name,
            &classroom.suffix,
            classroom.capacity,
            now_timestamp(),
        ),
    )?;
    info!(
        grade = %grade.name,
        classroom = %classroom.name,
        capacity = classroom.capacity,
        "provisioned classroom"
    );
    Ok(classroom)
}

fn adjust(conn: &Connection, classroom_id: &str, delta: i64) -> CoreResult<i64> {
    let count: Option<i64> = conn
        .query_row(
            "UPDATE classrooms SET current_count = current_count + ? WHERE id = ?
             RETURNING current_count",
            (delta, classroom_id),
            |r| r.get(0),
        )
        .optional()?;
    count.ok_or(CoreError::NotFound("classroom"))
}

/// Records one more student in the classroom.
pub fn occupy(conn: &Connection, classroom_id: &str) -> CoreResult<()> {
    adjust(conn, classroom_id, 1)?;
    Ok(())
}

/// Records one fewer student in the classroom. No clamping: an unmatched release shows up as a
/// negative count, which `recount` repairs.
pub fn release(conn: &Connection, classroom_id: &str) -> CoreResult<()> {
    let count = adjust(conn, classroom_id, -1)?;
    if count < 0 {
        warn!(classroom_id, count, "classroom count went negative");
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CountCorrection {
    pub classroom_id: String,
    pub name: String,
    pub stored: i64,
    pub actual: i64,
}

/// Rebuilds `current_count` from the students referencing each classroom. Status changes never
/// move the counter, so every referencing student counts.
pub fn recount(conn: &Connection, grade_id: Option<&str>) -> CoreResult<Vec<CountCorrection>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.current_count,
           (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id) AS actual
         FROM classrooms c
         WHERE ?1 IS NULL OR c.grade_id = ?1
         ORDER BY c.grade_id, c.suffix",
    )?;
    let rows = stmt
        .query_map([grade_id], |r| {
            Ok(CountCorrection {
                classroom_id: r.get(0)?,
                name: r.get(1)?,
                stored: r.get(2)?,
                actual: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut corrections = Vec::new();
    for row in rows {
        if row.stored == row.actual {
            continue;
        }
        conn.execute(
            "UPDATE classrooms SET current_count = ? WHERE id = ?",
            (row.actual, &row.classroom_id),
        )?;
        warn!(
            classroom = %row.name,
            stored = row.stored,
            actual = row.actual,
            "corrected classroom count"
        );
        corrections.push(row);
    }
    Ok(corrections)
}
