use crate::allocator;
use crate::dates::now_timestamp;
use crate::error::{CoreError, CoreResult};
use crate::grades;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    NotInSourceGrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub student_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    pub promoted_count: usize,
    pub promoted: Vec<String>,
    pub skipped: Vec<Skipped>,
}

/// Moves each listed student from `source_grade_id` into a classroom of `target_grade_id`.
///
/// Students are handled one at a time, each in its own transaction, so the classroom picked for
/// one student already reflects everyone promoted before it. Students that are unknown or not in
/// the source grade are reported in `skipped` and leave every counter untouched.
pub fn promote(
    conn: &Connection,
    source_grade_id: &str,
    target_grade_id: &str,
    student_ids: &[String],
) -> CoreResult<PromotionOutcome> {
    if source_grade_id == target_grade_id {
        return Err(CoreError::invalid(
            "targetGradeId",
            "targetGradeId must differ from the source grade",
        ));
    }
    let source = grades::get_grade(conn, source_grade_id)?;
    let target = grades::get_grade(conn, target_grade_id)?;

    let mut out = PromotionOutcome::default();
    for student_id in student_ids {
        let tx = conn.unchecked_transaction()?;
        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT grade_id, classroom_id FROM students WHERE id = ?",
                [student_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let skip = match &current {
            None => Some(SkipReason::NotFound),
            Some((grade_id, _)) if grade_id != source_grade_id => {
                Some(SkipReason::NotInSourceGrade)
            }
            Some(_) => None,
        };
        if let Some(reason) = skip {
            info!(student_id = %student_id, ?reason, grade = %source.name, "promotion skipped");
            out.skipped.push(Skipped {
                student_id: student_id.clone(),
                reason,
            });
            continue;
        }
        let Some((_, old_classroom)) = current else {
            continue;
        };

        allocator::release(&tx, &old_classroom)?;
        let classroom = allocator::allocate(&tx, &target.id)?;
        allocator::occupy(&tx, &classroom.id)?;
        tx.execute(
            "UPDATE students SET grade_id = ?, classroom_id = ?, updated_at = ? WHERE id = ?",
            (&target.id, &classroom.id, now_timestamp(), student_id),
        )?;
        tx.commit()?;
        out.promoted.push(student_id.clone());
    }
    out.promoted_count = out.promoted.len();

    info!(
        from = %source.name,
        to = %target.name,
        promoted = out.promoted_count,
        skipped = out.skipped.len(),
        "promotion finished"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::enrollment::tests::{enroll, grade};
    use crate::enrollment::get_student;

    fn count(conn: &Connection, classroom_id: &str) -> i64 {
        allocator::get_classroom(conn, classroom_id)
            .unwrap()
            .current_count
    }

    #[test]
    fn student_outside_source_grade_is_skipped_without_touching_counters() {
        let conn = db::open_memory();
        let (ga, a) = grade(&conn, "Grade A", 29);
        let (gb, b) = grade(&conn, "Grade B", 29);
        let (gc, c) = grade(&conn, "Grade C", 29);
        let s1 = enroll(&conn, "SEC/2024/0001", &ga.id, &a.id);
        let s2 = enroll(&conn, "SEC/2024/0002", &gc.id, &c.id);

        let out = promote(
            &conn,
            &ga.id,
            &gb.id,
            &[s1.id.clone(), s2.id.clone(), "missing".to_string()],
        )
        .unwrap();

        assert_eq!(out.promoted_count, 1);
        assert_eq!(out.promoted, vec![s1.id.clone()]);
        assert_eq!(
            out.skipped,
            vec![
                Skipped {
                    student_id: s2.id.clone(),
                    reason: SkipReason::NotInSourceGrade
                },
                Skipped {
                    student_id: "missing".to_string(),
                    reason: SkipReason::NotFound
                },
            ]
        );

        assert_eq!(count(&conn, &a.id), 0);
        assert_eq!(count(&conn, &b.id), 1);
        assert_eq!(count(&conn, &c.id), 1);
        let moved = get_student(&conn, &s1.id).unwrap();
        assert_eq!(moved.grade_id, gb.id);
        assert_eq!(moved.classroom_id, b.id);
        assert_eq!(get_student(&conn, &s2.id).unwrap().grade_id, gc.id);
    }

    #[test]
    fn promotion_fills_target_sections_in_order() {
        let conn = db::open_memory();
        let (src, a) = grade(&conn, "Grade 1", 29);
        let (dst, _) = grade(&conn, "Grade 2", 2);
        let ids: Vec<String> = (1..=3)
            .map(|i| enroll(&conn, &format!("SEC/2024/000{i}"), &src.id, &a.id).id)
            .collect();

        let out = promote(&conn, &src.id, &dst.id, &ids).unwrap();
        assert_eq!(out.promoted_count, 3);

        let sections = allocator::list_classrooms(&conn, &dst.id).unwrap();
        let names: Vec<_> = sections.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Grade 2-A", "Grade 2-B"]);
        assert_eq!(sections[0].current_count, 2);
        assert_eq!(sections[1].current_count, 1);
        assert_eq!(count(&conn, &a.id), 0);
    }

    #[test]
    fn same_grade_or_unknown_target_is_rejected() {
        let conn = db::open_memory();
        let (g, _) = grade(&conn, "Grade 1", 29);
        assert!(matches!(
            promote(&conn, &g.id, &g.id, &[]),
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            promote(&conn, &g.id, "nope", &[]),
            Err(CoreError::NotFound("grade"))
        ));
    }
}
