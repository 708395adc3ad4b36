use crate::allocator::{self, list_classrooms};
use crate::dates::now_timestamp;
use crate::enrollment;
use crate::error::{unique_or_db, CoreError, CoreResult};
use crate::model::{Classroom, Grade, Student};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

const GRADE_COLUMNS: &str =
    "id, name, sort_order, description, teacher_id, max_capacity_per_class, is_active, created_at";

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: r.get(0)?,
        name: r.get(1)?,
        order: r.get(2)?,
        description: r.get(3)?,
        teacher_id: r.get(4)?,
        max_capacity_per_class: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub teacher_id: Option<String>,
    pub max_capacity_per_class: Option<i64>,
    pub order: Option<i64>,
}

pub fn get_grade(conn: &Connection, grade_id: &str) -> CoreResult<Grade> {
    conn.query_row(
        &format!("SELECT {GRADE_COLUMNS} FROM grades WHERE id = ?"),
        [grade_id],
        grade_from_row,
    )
    .optional()?
    .ok_or(CoreError::NotFound("grade"))
}

fn check_capacity(cap: Option<i64>) -> CoreResult<()> {
    match cap {
        Some(c) if c <= 0 => Err(CoreError::invalid(
            "maxCapacityPerClass",
            "maxCapacityPerClass must be positive",
        )),
        _ => Ok(()),
    }
}

/// Creates a grade at the end of the ordering together with its first section `<name>-A`.
pub fn create_grade(
    conn: &Connection,
    input: &GradeInput,
    default_capacity: i64,
) -> CoreResult<(Grade, Classroom)> {
    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::missing_fields(vec!["name".to_string()]))?
        .to_string();
    check_capacity(input.max_capacity_per_class)?;

    let taken = conn
        .query_row("SELECT 1 FROM grades WHERE name = ?", [&name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if taken {
        return Err(CoreError::conflict("Grade with this name already exists"));
    }

    let order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM grades",
        [],
        |r| r.get(0),
    )?;
    let grade = Grade {
        id: Uuid::new_v4().to_string(),
        name,
        order,
        description: input.description.clone(),
        teacher_id: input.teacher_id.clone().filter(|s| !s.is_empty()),
        max_capacity_per_class: input.max_capacity_per_class.unwrap_or(default_capacity),
        is_active: true,
        created_at: now_timestamp(),
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO grades(id, name, sort_order, description, teacher_id,
           max_capacity_per_class, is_active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &grade.id,
            &grade.name,
            grade.order,
            grade.description.as_deref(),
            grade.teacher_id.as_deref(),
            grade.max_capacity_per_class,
            &grade.created_at,
        ),
    )
    .map_err(|e| unique_or_db(e, "Grade with this name already exists"))?;
    let first = allocator::provision(&tx, &grade)?;
    tx.commit()?;

    info!(grade = %grade.name, order = grade.order, "created grade");
    Ok((grade, first))
}

/// Patches a grade. Existing classrooms keep the capacity they were created with.
pub fn update_grade(conn: &Connection, grade_id: &str, input: &GradeInput) -> CoreResult<Grade> {
    let mut grade = get_grade(conn, grade_id)?;
    check_capacity(input.max_capacity_per_class)?;

    if let Some(name) = input.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        grade.name = name.to_string();
    }
    if let Some(d) = &input.description {
        grade.description = Some(d.clone());
    }
    if let Some(t) = &input.teacher_id {
        grade.teacher_id = if t.is_empty() { None } else { Some(t.clone()) };
    }
    if let Some(c) = input.max_capacity_per_class {
        grade.max_capacity_per_class = c;
    }
    if let Some(o) = input.order {
        grade.order = o;
    }

    conn.execute(
        "UPDATE grades SET name = ?, sort_order = ?, description = ?, teacher_id = ?,
           max_capacity_per_class = ?
         WHERE id = ?",
        (
            &grade.name,
            grade.order,
            grade.description.as_deref(),
            grade.teacher_id.as_deref(),
            grade.max_capacity_per_class,
            &grade.id,
        ),
    )
    .map_err(|e| unique_or_db(e, "Grade name or order already in use"))?;
    Ok(grade)
}

/// Deletes a grade with its classrooms and schedules, unassigning any staff attached to it.
///
/// Refused while any student or any marked attendance day references the grade, so attendance
/// history is never lost with it.
pub fn delete_grade(conn: &Connection, grade_id: &str) -> CoreResult<()> {
    let grade = get_grade(conn, grade_id)?;
    let students: i64 = conn.query_row(
        "SELECT COUNT(*) FROM students WHERE grade_id = ?",
        [grade_id],
        |r| r.get(0),
    )?;
    if students > 0 {
        return Err(CoreError::conflict(format!(
            "Cannot delete grade with {} students. Please transfer students first.",
            students
        )));
    }
    let marked_days: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance
         WHERE grade_id = ?1
            OR classroom_id IN (SELECT id FROM classrooms WHERE grade_id = ?1)",
        [grade_id],
        |r| r.get(0),
    )?;
    if marked_days > 0 {
        return Err(CoreError::conflict(format!(
            "Cannot delete grade with {} marked attendance days.",
            marked_days
        )));
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM schedule_periods WHERE schedule_id IN (
           SELECT id FROM schedules WHERE grade_id = ?
         )",
        [grade_id],
    )?;
    tx.execute("DELETE FROM schedules WHERE grade_id = ?", [grade_id])?;
    tx.execute(
        "UPDATE staff SET assigned_grade_id = NULL WHERE assigned_grade_id = ?",
        [grade_id],
    )?;
    tx.execute("DELETE FROM classrooms WHERE grade_id = ?", [grade_id])?;
    tx.execute("DELETE FROM grades WHERE id = ?", [grade_id])?;
    tx.commit()?;

    info!(grade = %grade.name, "deleted grade");
    Ok(())
}

pub struct GradeOverview {
    pub grade: Grade,
    pub classrooms: Vec<Classroom>,
    pub student_count: i64,
}

/// Active grades in order, with sections and active student counts.
pub fn list_grades(conn: &Connection) -> CoreResult<Vec<GradeOverview>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GRADE_COLUMNS} FROM grades WHERE is_active = 1 ORDER BY sort_order"
    ))?;
    let grades = stmt
        .query_map([], grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(grades.len());
    for grade in grades {
        let classrooms = list_classrooms(conn, &grade.id)?;
        let student_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM students WHERE grade_id = ? AND status = 'active'",
            [&grade.id],
            |r| r.get(0),
        )?;
        out.push(GradeOverview {
            grade,
            classrooms,
            student_count,
        });
    }
    Ok(out)
}

pub struct GradeDetail {
    pub grade: Grade,
    pub classrooms: Vec<Classroom>,
    pub students: Vec<Student>,
}

pub fn grade_detail(conn: &Connection, grade_id: &str) -> CoreResult<GradeDetail> {
    let grade = get_grade(conn, grade_id)?;
    let classrooms = list_classrooms(conn, grade_id)?;
    let students = enrollment::list_students(
        conn,
        &enrollment::StudentFilter {
            grade_id: Some(grade_id.to_string()),
            status: Some("active".to_string()),
            search: None,
        },
    )?;
    Ok(GradeDetail {
        grade,
        classrooms,
        students,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn input(name: &str) -> GradeInput {
        GradeInput {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn grades_get_sequential_order_and_a_first_section() {
        let conn = db::open_memory();
        let (g1, a) = create_grade(&conn, &input("Baby Care"), 29).unwrap();
        let (g2, _) = create_grade(&conn, &input("Play Group"), 29).unwrap();
        assert_eq!(g1.order, 1);
        assert_eq!(g2.order, 2);
        assert_eq!(g1.max_capacity_per_class, 29);
        assert_eq!(a.name, "Baby Care-A");
        assert_eq!(a.capacity, 29);

        let listed = list_grades(&conn).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].classrooms.len(), 1);
        assert_eq!(listed[0].student_count, 0);
    }

    #[test]
    fn duplicate_grade_name_conflicts() {
        let conn = db::open_memory();
        create_grade(&conn, &input("PP1"), 29).unwrap();
        let e = create_grade(&conn, &input("PP1"), 29).unwrap_err();
        assert!(matches!(e, CoreError::Conflict(_)));
    }

    #[test]
    fn capacity_change_does_not_resync_existing_sections() {
        let conn = db::open_memory();
        let (g, a) = create_grade(&conn, &input("PP2"), 29).unwrap();
        let updated = update_grade(
            &conn,
            &g.id,
            &GradeInput {
                max_capacity_per_class: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.max_capacity_per_class, 10);
        assert_eq!(allocator::get_classroom(&conn, &a.id).unwrap().capacity, 29);
        let b = allocator::provision(&conn, &updated).unwrap();
        assert_eq!(b.capacity, 10);
    }

    #[test]
    fn empty_grade_can_be_deleted() {
        let conn = db::open_memory();
        let (g, a) = create_grade(&conn, &input("Grade 1"), 29).unwrap();
        delete_grade(&conn, &g.id).unwrap();
        assert!(matches!(get_grade(&conn, &g.id), Err(CoreError::NotFound("grade"))));
        assert!(matches!(
            allocator::get_classroom(&conn, &a.id),
            Err(CoreError::NotFound("classroom"))
        ));
    }

    #[test]
    fn grade_with_attendance_history_is_kept() {
        use crate::attendance::{self, MarkInput, RecordInput};
        use crate::enrollment::tests::{enroll, grade};
        use crate::promotion;

        let conn = db::open_memory();
        let (g1, a1) = grade(&conn, "Grade 1", 29);
        let (g2, _) = grade(&conn, "Grade 2", 29);
        let s = enroll(&conn, "SEC/2024/0001", &g1.id, &a1.id);
        attendance::mark(
            &conn,
            &MarkInput {
                date: Some("2024-03-01".to_string()),
                grade: Some(g1.id.clone()),
                classroom: Some(a1.id.clone()),
                records: Some(vec![RecordInput {
                    student_id: Some(s.id.clone()),
                    status: Some("present".to_string()),
                }]),
            },
            "t",
        )
        .unwrap();
        promotion::promote(&conn, &g1.id, &g2.id, &[s.id.clone()]).unwrap();

        let e = delete_grade(&conn, &g1.id).unwrap_err();
        assert!(matches!(e, CoreError::Conflict(_)));
        assert!(get_grade(&conn, &g1.id).is_ok());
        let history = attendance::student_history(&conn, &s.id, None, None).unwrap();
        assert_eq!(history.records.len(), 1);
        assert_eq!(history.records[0].classroom_id, a1.id);
    }
}
