use crate::enrollment;
use crate::grades::{self, GradeInput};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, parse_params, require_actor, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::promotion;
use serde::Deserialize;
use serde_json::json;

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let mut out = Vec::new();
        for g in grades::list_grades(conn)? {
            let mut item = to_json(&g.grade)?;
            let views: Vec<_> = g.classrooms.iter().map(|c| c.view()).collect();
            item["classrooms"] = to_json(&views)?;
            item["classroomCount"] = json!(g.classrooms.len());
            item["studentCount"] = json!(g.student_count);
            out.push(item);
        }
        Ok(json!({ "grades": out }))
    })
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let grade_id = get_required_str(&req.params, "gradeId")?;
        let detail = grades::grade_detail(conn, &grade_id)?;
        let views: Vec<_> = detail.classrooms.iter().map(|c| c.view()).collect();
        let students = detail
            .students
            .into_iter()
            .map(|s| enrollment::populate(conn, s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "grade": to_json(&detail.grade)?,
            "classrooms": to_json(&views)?,
            "students": to_json(&students)?,
        }))
    })
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        require_actor(req)?;
        let input: GradeInput = parse_params(&req.params)?;
        let (grade, classroom) = grades::create_grade(conn, &input, cfg.default_capacity)?;
        Ok(json!({
            "grade": to_json(&grade)?,
            "classroom": to_json(&classroom.view())?,
        }))
    })
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let grade_id = get_required_str(&req.params, "gradeId")?;
        let input: GradeInput = parse_params(&req.params)?;
        let grade = grades::update_grade(conn, &grade_id, &input)?;
        Ok(json!({ "grade": to_json(&grade)? }))
    })
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let grade_id = get_required_str(&req.params, "gradeId")?;
        grades::delete_grade(conn, &grade_id)?;
        Ok(json!({ "ok": true }))
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteParams {
    grade_id: String,
    target_grade_id: String,
    student_ids: Vec<String>,
}

fn handle_grades_promote(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let actor = require_actor(req)?;
        let p: PromoteParams = parse_params(&req.params)?;
        if p.student_ids.is_empty() {
            return Err(HandlerErr::bad_params("studentIds must not be empty"));
        }
        tracing::info!(actor = %actor.id, students = p.student_ids.len(), "promotion requested");
        let outcome = promotion::promote(conn, &p.grade_id, &p.target_grade_id, &p.student_ids)?;
        to_json(&outcome)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.promote" => Some(handle_grades_promote(state, req)),
        _ => None,
    }
}
