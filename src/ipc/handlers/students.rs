use crate::dates;
use crate::enrollment::{self, StudentFilter, StudentInput};
use crate::fees::{self, FeeView};
use crate::ipc::helpers::{get_required_str, parse_params, require_actor, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::sequence;
use serde_json::json;

fn handle_next_admission_no(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        let next = sequence::next_admission_no(conn, &cfg.id_prefix, dates::current_year())?;
        Ok(json!({ "admissionNo": next }))
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let filter: StudentFilter = parse_params(&req.params)?;
        let students = enrollment::list_students(conn, &filter)?
            .into_iter()
            .map(|s| enrollment::populate(conn, s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "students": to_json(&students)? }))
    })
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let student = enrollment::populate(conn, enrollment::get_student(conn, &student_id)?)?;
        let fees: Vec<FeeView> = fees::fees_for_student(conn, &student_id)?
            .into_iter()
            .map(FeeView::from)
            .collect();
        Ok(json!({
            "student": to_json(&student)?,
            "fees": to_json(&fees)?,
        }))
    })
}

fn handle_students_by_classroom(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        crate::allocator::get_classroom(conn, &classroom_id)?;
        let students = enrollment::students_in_classroom(conn, &classroom_id)?;
        Ok(json!({ "students": to_json(&students)? }))
    })
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        let actor = require_actor(req)?;
        let input: StudentInput = parse_params(&req.params)?;
        let student = enrollment::create_student(conn, cfg, &input, &actor.id)?;
        let view = enrollment::populate(conn, student)?;
        Ok(json!({ "student": to_json(&view)? }))
    })
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        require_actor(req)?;
        let student_id = get_required_str(&req.params, "studentId")?;
        let input: StudentInput = parse_params(&req.params)?;
        let student = enrollment::update_student(conn, cfg, &student_id, &input)?;
        let view = enrollment::populate(conn, student)?;
        Ok(json!({ "student": to_json(&view)? }))
    })
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let student_id = get_required_str(&req.params, "studentId")?;
        enrollment::delete_student(conn, &student_id)?;
        Ok(json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.nextAdmissionNo" => Some(handle_next_admission_no(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.byClassroom" => Some(handle_students_by_classroom(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
