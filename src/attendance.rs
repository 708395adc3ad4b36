//! Daily attendance, one document per classroom per calendar day.
//!
//! The `(date, classroom_id)` unique index is what makes marking idempotent: an insert that
//! loses a race against another insert for the same day is retried as an update.

use crate::allocator;
use crate::dates::{self, now_timestamp};
use crate::enrollment;
use crate::error::{is_unique_violation, CoreError, CoreResult};
use crate::grades;
use crate::model::{
    Attendance, AttendanceRecord, AttendanceStats, AttendanceStatus, Classroom, Student,
    StudentStatus,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

const ATTENDANCE_COLUMNS: &str =
    "id, date, grade_id, classroom_id, marked_by, last_edited_by, last_edited_at, created_at";

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<Attendance> {
    Ok(Attendance {
        id: r.get(0)?,
        date: r.get(1)?,
        grade_id: r.get(2)?,
        classroom_id: r.get(3)?,
        records: Vec::new(),
        marked_by: r.get(4)?,
        last_edited_by: r.get(5)?,
        last_edited_at: r.get(6)?,
        created_at: r.get(7)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceView {
    #[serde(flatten)]
    pub attendance: Attendance,
    pub stats: AttendanceStats,
}

impl From<Attendance> for AttendanceView {
    fn from(attendance: Attendance) -> Self {
        let stats = attendance.stats();
        Self { attendance, stats }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    #[serde(alias = "student")]
    pub student_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkInput {
    pub date: Option<String>,
    #[serde(alias = "gradeId")]
    pub grade: Option<String>,
    #[serde(alias = "classroomId")]
    pub classroom: Option<String>,
    pub records: Option<Vec<RecordInput>>,
}

/// Parses submitted marks: closed status values, one mark per student, and every student an
/// active member of `classroom_id`.
fn validate_records(
    conn: &Connection,
    classroom_id: &str,
    input: &[RecordInput],
) -> CoreResult<Vec<AttendanceRecord>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(input.len());
    for (i, rec) in input.iter().enumerate() {
        let student_id = rec
            .student_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::missing_fields(vec![format!("records[{i}].student")]))?;
        let status = AttendanceStatus::parse_field(
            &format!("records[{i}].status"),
            rec.status.as_deref().unwrap_or_default(),
        )?;
        if !seen.insert(student_id.to_string()) {
            return Err(CoreError::invalid(
                &format!("records[{i}].student"),
                format!("student {} is marked more than once", student_id),
            ));
        }
        let student = enrollment::get_student(conn, student_id)?;
        if student.classroom_id != classroom_id {
            return Err(CoreError::invalid(
                &format!("records[{i}].student"),
                format!("student {} is not in this classroom", student.admission_no),
            ));
        }
        if student.status != StudentStatus::Active {
            return Err(CoreError::invalid(
                &format!("records[{i}].student"),
                format!(
                    "student {} is {} and cannot be marked",
                    student.admission_no,
                    student.status.as_str()
                ),
            ));
        }
        out.push(AttendanceRecord {
            student_id: student_id.to_string(),
            status,
        });
    }
    Ok(out)
}

fn replace_records(
    conn: &Connection,
    attendance_id: &str,
    records: &[AttendanceRecord],
) -> CoreResult<()> {
    conn.execute(
        "DELETE FROM attendance_records WHERE attendance_id = ?",
        [attendance_id],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO attendance_records(attendance_id, student_id, status, sort_order)
         VALUES(?, ?, ?, ?)",
    )?;
    for (i, rec) in records.iter().enumerate() {
        stmt.execute((attendance_id, &rec.student_id, rec.status, i as i64))?;
    }
    Ok(())
}

fn stamp_edit(conn: &Connection, attendance_id: &str, actor_id: &str) -> CoreResult<()> {
    conn.execute(
        "UPDATE attendance SET last_edited_by = ?, last_edited_at = ? WHERE id = ?",
        (actor_id, now_timestamp(), attendance_id),
    )?;
    Ok(())
}

fn find_for_day(conn: &Connection, day: &str, classroom_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM attendance WHERE date = ? AND classroom_id = ?",
            (day, classroom_id),
            |r| r.get(0),
        )
        .optional()?)
}

pub fn get_attendance(conn: &Connection, attendance_id: &str) -> CoreResult<Attendance> {
    let mut att = conn
        .query_row(
            &format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?"),
            [attendance_id],
            attendance_from_row,
        )
        .optional()?
        .ok_or(CoreError::NotFound("attendance"))?;
    att.records = load_records(conn, &att.id)?;
    Ok(att)
}

fn load_records(conn: &Connection, attendance_id: &str) -> CoreResult<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, status FROM attendance_records
         WHERE attendance_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([attendance_id], |r| {
            Ok(AttendanceRecord {
                student_id: r.get(0)?,
                status: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Result of a mark: the stored document and whether this call created it.
#[derive(Debug)]
pub struct Marked {
    pub attendance: Attendance,
    pub created: bool,
}

/// Creates or replaces the attendance of one classroom for one day.
pub fn mark(conn: &Connection, input: &MarkInput, actor_id: &str) -> CoreResult<Marked> {
    let mut missing = Vec::new();
    for (field, value) in [
        ("date", &input.date),
        ("grade", &input.grade),
        ("classroom", &input.classroom),
    ] {
        if value.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push(field.to_string());
        }
    }
    if input.records.is_none() {
        missing.push("records".to_string());
    }
    if !missing.is_empty() {
        return Err(CoreError::missing_fields(missing));
    }

    let day = dates::parse_day("date", input.date.as_deref().unwrap_or_default())?;
    let day = dates::format_day(day);
    let grade = grades::get_grade(conn, input.grade.as_deref().unwrap_or_default())?;
    let classroom = allocator::get_classroom(conn, input.classroom.as_deref().unwrap_or_default())?;
    if classroom.grade_id != grade.id {
        return Err(CoreError::conflict(
            "classroom does not belong to selected grade",
        ));
    }
    let records = validate_records(
        conn,
        &classroom.id,
        input.records.as_deref().unwrap_or_default(),
    )?;

    let tx = conn.unchecked_transaction()?;
    let (id, created) = match find_for_day(&tx, &day, &classroom.id)? {
        Some(id) => (id, false),
        None => {
            let id = Uuid::new_v4().to_string();
            let inserted = tx.execute(
                "INSERT INTO attendance(id, date, grade_id, classroom_id, marked_by, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, &day, &grade.id, &classroom.id, actor_id, now_timestamp()),
            );
            match inserted {
                Ok(_) => (id, true),
                Err(e) if is_unique_violation(&e) => {
                    debug!(
                        date = %day,
                        classroom = %classroom.name,
                        "attendance created concurrently; updating"
                    );
                    let existing = find_for_day(&tx, &day, &classroom.id)?
                        .ok_or(CoreError::NotFound("attendance"))?;
                    (existing, false)
                }
                Err(e) => return Err(e.into()),
            }
        }
    };
    replace_records(&tx, &id, &records)?;
    if !created {
        stamp_edit(&tx, &id, actor_id)?;
    }
    tx.commit()?;

    info!(
        date = %day,
        classroom = %classroom.name,
        records = records.len(),
        created,
        "attendance marked"
    );
    Ok(Marked {
        attendance: get_attendance(conn, &id)?,
        created,
    })
}

/// Replaces the marks of an existing document by id.
pub fn update_records(
    conn: &Connection,
    attendance_id: &str,
    records: &[RecordInput],
    actor_id: &str,
) -> CoreResult<Attendance> {
    let att = get_attendance(conn, attendance_id)?;
    let records = validate_records(conn, &att.classroom_id, records)?;
    let tx = conn.unchecked_transaction()?;
    replace_records(&tx, attendance_id, &records)?;
    stamp_edit(&tx, attendance_id, actor_id)?;
    tx.commit()?;
    get_attendance(conn, attendance_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkingSheet {
    pub classroom: Classroom,
    pub date: String,
    pub students: Vec<Student>,
    pub attendance: Option<AttendanceView>,
}

/// Active students of a classroom plus whatever was already marked for `date`. Read-only.
pub fn marking_sheet(
    conn: &Connection,
    classroom_id: &str,
    date: &str,
) -> CoreResult<MarkingSheet> {
    let classroom = allocator::get_classroom(conn, classroom_id)?;
    let day = dates::format_day(dates::parse_day("date", date)?);
    let students = enrollment::students_in_classroom(conn, classroom_id)?;
    let attendance = match find_for_day(conn, &day, classroom_id)? {
        Some(id) => Some(get_attendance(conn, &id)?.into()),
        None => None,
    };
    Ok(MarkingSheet {
        classroom,
        date: day,
        students,
        attendance,
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceFilter {
    pub date: Option<String>,
    #[serde(alias = "grade")]
    pub grade_id: Option<String>,
    #[serde(alias = "classroom")]
    pub classroom_id: Option<String>,
}

pub fn list_attendance(
    conn: &Connection,
    filter: &AttendanceFilter,
) -> CoreResult<Vec<Attendance>> {
    let day = match filter.date.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => Some(dates::format_day(dates::parse_day("date", raw)?)),
        None => None,
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
         WHERE (?1 IS NULL OR date = ?1)
           AND (?2 IS NULL OR grade_id = ?2)
           AND (?3 IS NULL OR classroom_id = ?3)
         ORDER BY date DESC, created_at DESC"
    ))?;
    let mut docs = stmt
        .query_map(
            (
                day,
                filter.grade_id.as_deref().filter(|s| !s.is_empty()),
                filter.classroom_id.as_deref().filter(|s| !s.is_empty()),
            ),
            attendance_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for doc in &mut docs {
        doc.records = load_records(conn, &doc.id)?;
    }
    Ok(docs)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: String,
    pub classroom_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    #[serde(flatten)]
    pub counts: AttendanceStats,
    pub attendance_rate: f64,
}

impl From<AttendanceStats> for HistoryStats {
    fn from(counts: AttendanceStats) -> Self {
        let attendance_rate = if counts.total == 0 {
            0.0
        } else {
            let attended = (counts.present + counts.late) as f64;
            (attended / counts.total as f64 * 1000.0).round() / 10.0
        };
        Self {
            counts,
            attendance_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistory {
    pub student_id: String,
    pub records: Vec<HistoryEntry>,
    pub stats: HistoryStats,
}

/// Per-day marks of one student, newest first, with late counted as attended.
///
/// Marks outlive the student row, so a removed student still has a history.
pub fn student_history(
    conn: &Connection,
    student_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> CoreResult<StudentHistory> {
    let bound = |field: &str, raw: Option<&str>| -> CoreResult<Option<String>> {
        match raw.filter(|s| !s.trim().is_empty()) {
            Some(s) => Ok(Some(dates::format_day(dates::parse_day(field, s)?))),
            None => Ok(None),
        }
    };
    let start = bound("startDate", start)?;
    let end = bound("endDate", end)?;

    let mut stmt = conn.prepare(
        "SELECT a.date, a.classroom_id, r.status
         FROM attendance_records r JOIN attendance a ON a.id = r.attendance_id
         WHERE r.student_id = ?1
           AND (?2 IS NULL OR a.date >= ?2)
           AND (?3 IS NULL OR a.date <= ?3)
         ORDER BY a.date DESC",
    )?;
    let records = stmt
        .query_map((student_id, start, end), |r| {
            Ok(HistoryEntry {
                date: r.get(0)?,
                classroom_id: r.get(1)?,
                status: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let stats = AttendanceStats::tally(records.iter().map(|e| &e.status)).into();
    Ok(StudentHistory {
        student_id: student_id.to_string(),
        records,
        stats,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomDay {
    pub attendance_id: String,
    pub grade_id: String,
    pub classroom_id: String,
    pub classroom_name: String,
    pub stats: AttendanceStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub date: String,
    pub classrooms: Vec<ClassroomDay>,
    pub overall: AttendanceStats,
}

pub fn day_summary(conn: &Connection, date: Option<&str>) -> CoreResult<DaySummary> {
    let day = match date.filter(|s| !s.trim().is_empty()) {
        Some(raw) => dates::parse_day("date", raw)?,
        None => dates::today(),
    };
    let day = dates::format_day(day);
    let docs = list_attendance(
        conn,
        &AttendanceFilter {
            date: Some(day.clone()),
            ..Default::default()
        },
    )?;

    let mut overall = AttendanceStats::default();
    let mut classrooms = Vec::with_capacity(docs.len());
    for doc in docs {
        let stats = doc.stats();
        overall.add(stats);
        let classroom_name = allocator::get_classroom(conn, &doc.classroom_id)
            .map(|c| c.name)
            .unwrap_or_default();
        classrooms.push(ClassroomDay {
            attendance_id: doc.id,
            grade_id: doc.grade_id,
            classroom_id: doc.classroom_id,
            classroom_name,
            stats,
        });
    }
    classrooms.sort_by(|a, b| a.classroom_name.cmp(&b.classroom_name));
    Ok(DaySummary {
        date: day,
        classrooms,
        overall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::enrollment::tests::{enroll, grade};

    struct Fixture {
        conn: Connection,
        grade_id: String,
        classroom_id: String,
        students: Vec<String>,
    }

    fn fixture() -> Fixture {
        let conn = db::open_memory();
        let (g, a) = grade(&conn, "Grade 1", 29);
        let students = (1..=3)
            .map(|i| enroll(&conn, &format!("SEC/2024/000{i}"), &g.id, &a.id).id)
            .collect();
        Fixture {
            conn,
            grade_id: g.id,
            classroom_id: a.id,
            students,
        }
    }

    fn marks(f: &Fixture, date: &str, statuses: &[&str]) -> MarkInput {
        MarkInput {
            date: Some(date.to_string()),
            grade: Some(f.grade_id.clone()),
            classroom: Some(f.classroom_id.clone()),
            records: Some(
                f.students
                    .iter()
                    .zip(statuses)
                    .map(|(s, st)| RecordInput {
                        student_id: Some(s.clone()),
                        status: Some(st.to_string()),
                    })
                    .collect(),
            ),
        }
    }

    #[test]
    fn remarking_a_day_updates_the_single_document() {
        let f = fixture();
        let day_one = marks(&f, "2024-03-01", &["present", "present", "absent"]);
        let first = mark(&f.conn, &day_one, "t1").unwrap();
        assert!(first.created);
        assert_eq!(first.attendance.stats().present, 2);

        let again = marks(&f, "2024-03-01T08:00:00", &["present", "late", "late"]);
        let second = mark(&f.conn, &again, "t2").unwrap();
        assert!(!second.created);
        assert_eq!(second.attendance.id, first.attendance.id);
        assert_eq!(
            second.attendance.stats(),
            AttendanceStats {
                present: 1,
                absent: 0,
                late: 2,
                total: 3
            }
        );
        assert_eq!(second.attendance.marked_by, "t1");
        assert_eq!(second.attendance.last_edited_by.as_deref(), Some("t2"));

        let n: i64 = f
            .conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn unique_index_rejects_raw_duplicate_day() {
        let f = fixture();
        mark(&f.conn, &marks(&f, "2024-03-01", &["present"]), "t").unwrap();
        let e = f
            .conn
            .execute(
                "INSERT INTO attendance(id, date, grade_id, classroom_id, marked_by, created_at)
                 VALUES('dup', '2024-03-01', ?, ?, 't', 'now')",
                (&f.grade_id, &f.classroom_id),
            )
            .unwrap_err();
        assert!(is_unique_violation(&e));
    }

    #[test]
    fn bad_marks_are_rejected() {
        let f = fixture();
        let excused = marks(&f, "2024-03-01", &["present", "excused"]);
        let e = mark(&f.conn, &excused, "t").unwrap_err();
        assert!(matches!(e, CoreError::Validation { .. }));

        let mut dup = marks(&f, "2024-03-01", &["present"]);
        if let Some(records) = dup.records.as_mut() {
            records.push(records[0].clone());
        }
        assert!(matches!(
            mark(&f.conn, &dup, "t"),
            Err(CoreError::Validation { .. })
        ));

        let mut ghost = marks(&f, "2024-03-01", &["present"]);
        ghost.records = Some(vec![RecordInput {
            student_id: Some("ghost".to_string()),
            status: Some("absent".to_string()),
        }]);
        assert!(matches!(
            mark(&f.conn, &ghost, "t"),
            Err(CoreError::NotFound("student"))
        ));

        let (other, _) = grade(&f.conn, "Grade 2", 29);
        let mut mismatch = marks(&f, "2024-03-01", &["present"]);
        mismatch.grade = Some(other.id);
        assert!(matches!(mark(&f.conn, &mismatch, "t"), Err(CoreError::Conflict(_))));

        assert!(list_attendance(&f.conn, &AttendanceFilter::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn history_counts_late_as_attended() {
        let f = fixture();
        let s = f.students[0].clone();
        mark(&f.conn, &marks(&f, "2024-03-01", &["present"]), "t").unwrap();
        mark(&f.conn, &marks(&f, "2024-03-02", &["late"]), "t").unwrap();
        mark(&f.conn, &marks(&f, "2024-03-03", &["absent"]), "t").unwrap();

        let h = student_history(&f.conn, &s, None, None).unwrap();
        assert_eq!(h.records.len(), 3);
        assert_eq!(h.records[0].date, "2024-03-03");
        assert_eq!(h.stats.attendance_rate, 66.7);

        let ranged = student_history(&f.conn, &s, Some("2024-03-02"), Some("2024-03-02")).unwrap();
        assert_eq!(ranged.records.len(), 1);
        assert_eq!(ranged.stats.attendance_rate, 100.0);
    }

    #[test]
    fn sheet_and_summary_reflect_marks() {
        let f = fixture();
        let sheet = marking_sheet(&f.conn, &f.classroom_id, "2024-03-01").unwrap();
        assert_eq!(sheet.students.len(), 3);
        assert!(sheet.attendance.is_none());

        let day = marks(&f, "2024-03-01", &["present", "absent", "late"]);
        let m = mark(&f.conn, &day, "t").unwrap();
        let updated = update_records(
            &f.conn,
            &m.attendance.id,
            &[RecordInput {
                student_id: Some(f.students[0].clone()),
                status: Some("absent".to_string()),
            }],
            "t2",
        )
        .unwrap();
        assert_eq!(updated.records.len(), 1);

        let sheet = marking_sheet(&f.conn, &f.classroom_id, "2024-03-01").unwrap();
        assert_eq!(sheet.attendance.map(|a| a.stats.absent), Some(1));

        let summary = day_summary(&f.conn, Some("2024-03-01")).unwrap();
        assert_eq!(summary.classrooms.len(), 1);
        assert_eq!(summary.overall.total, 1);
        assert_eq!(summary.classrooms[0].classroom_name, "Grade 1-A");
    }

    fn fields_of(e: CoreError) -> Vec<String> {
        match e {
            CoreError::Validation { fields, .. } => fields,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn only_active_members_of_the_classroom_can_be_marked() {
        let f = fixture();
        let g = grades::get_grade(&f.conn, &f.grade_id).unwrap();
        let b = allocator::provision(&f.conn, &g).unwrap();
        let outsider = enroll(&f.conn, "SEC/2024/0009", &f.grade_id, &b.id);

        let mut foreign = marks(&f, "2024-03-01", &["present"]);
        if let Some(records) = foreign.records.as_mut() {
            records.push(RecordInput {
                student_id: Some(outsider.id.clone()),
                status: Some("present".to_string()),
            });
        }
        let e = mark(&f.conn, &foreign, "t").unwrap_err();
        assert_eq!(fields_of(e), vec!["records[1].student".to_string()]);

        enrollment::update_student(
            &f.conn,
            &crate::config::SchoolConfig::default(),
            &f.students[1],
            &enrollment::StudentInput {
                status: Some("transferred".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let e = mark(&f.conn, &marks(&f, "2024-03-01", &["present", "absent"]), "t").unwrap_err();
        assert_eq!(fields_of(e), vec!["records[1].student".to_string()]);
        assert!(list_attendance(&f.conn, &AttendanceFilter::default())
            .unwrap()
            .is_empty());

        let m = mark(&f.conn, &marks(&f, "2024-03-01", &["present"]), "t").unwrap();
        let e = update_records(
            &f.conn,
            &m.attendance.id,
            &[RecordInput {
                student_id: Some(outsider.id),
                status: Some("late".to_string()),
            }],
            "t2",
        )
        .unwrap_err();
        assert_eq!(fields_of(e), vec!["records[0].student".to_string()]);
        assert_eq!(get_attendance(&f.conn, &m.attendance.id).unwrap().records.len(), 1);
    }

    #[test]
    fn marks_survive_student_removal() {
        let f = fixture();
        let (s1, s2) = (f.students[0].clone(), f.students[1].clone());
        let m = mark(&f.conn, &marks(&f, "2024-03-01", &["present", "absent"]), "t").unwrap();

        enrollment::delete_student(&f.conn, &s2).unwrap();

        let doc = get_attendance(&f.conn, &m.attendance.id).unwrap();
        assert_eq!(doc.stats().total, 2);
        assert_eq!(doc.stats().absent, 1);
        assert_eq!(doc.records[0].student_id, s1);
        assert_eq!(day_summary(&f.conn, Some("2024-03-01")).unwrap().overall.total, 2);

        let gone = student_history(&f.conn, &s2, None, None).unwrap();
        assert_eq!(gone.records.len(), 1);
        assert_eq!(gone.records[0].status, AttendanceStatus::Absent);
    }
}
