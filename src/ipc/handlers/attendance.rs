use crate::attendance::{self, AttendanceFilter, AttendanceView, MarkInput, RecordInput};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, parse_params, require_actor, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::json;

fn handle_attendance_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let actor = require_actor(req)?;
        let input: MarkInput = parse_params(&req.params)?;
        let marked = attendance::mark(conn, &input, &actor.id)?;
        Ok(json!({
            "attendance": to_json(&AttendanceView::from(marked.attendance))?,
            "created": marked.created,
        }))
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    attendance_id: String,
    records: Vec<RecordInput>,
}

fn handle_attendance_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let actor = require_actor(req)?;
        let p: UpdateParams = parse_params(&req.params)?;
        let att = attendance::update_records(conn, &p.attendance_id, &p.records, &actor.id)?;
        Ok(json!({ "attendance": to_json(&AttendanceView::from(att))? }))
    })
}

fn handle_attendance_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let id = get_required_str(&req.params, "attendanceId")?;
        let att = attendance::get_attendance(conn, &id)?;
        Ok(json!({ "attendance": to_json(&AttendanceView::from(att))? }))
    })
}

fn handle_marking_sheet(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let classroom_id = get_required_str(&req.params, "classroomId")?;
        let date = get_required_str(&req.params, "date")?;
        to_json(&attendance::marking_sheet(conn, &classroom_id, &date)?)
    })
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let filter: AttendanceFilter = parse_params(&req.params)?;
        let docs: Vec<AttendanceView> = attendance::list_attendance(conn, &filter)?
            .into_iter()
            .map(AttendanceView::from)
            .collect();
        Ok(json!({ "attendance": to_json(&docs)? }))
    })
}

fn handle_student_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let history = attendance::student_history(
            conn,
            &student_id,
            get_opt_str(&req.params, "startDate"),
            get_opt_str(&req.params, "endDate"),
        )?;
        to_json(&history)
    })
}

fn handle_attendance_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        to_json(&attendance::day_summary(conn, get_opt_str(&req.params, "date"))?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(handle_attendance_mark(state, req)),
        "attendance.update" => Some(handle_attendance_update(state, req)),
        "attendance.get" => Some(handle_attendance_get(state, req)),
        "attendance.markingSheet" => Some(handle_marking_sheet(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.studentHistory" => Some(handle_student_history(state, req)),
        "attendance.summary" => Some(handle_attendance_summary(state, req)),
        _ => None,
    }
}
