use crate::allocator;
use crate::grades;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_actor, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_classrooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let grade_id = get_required_str(&req.params, "gradeId")?;
        grades::get_grade(conn, &grade_id)?;
        let classrooms = allocator::list_classrooms(conn, &grade_id)?;
        let views: Vec<_> = classrooms.iter().map(|c| c.view()).collect();
        Ok(json!({ "classrooms": to_json(&views)? }))
    })
}

fn handle_classrooms_allocate(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let grade_id = get_required_str(&req.params, "gradeId")?;
        let classroom = allocator::allocate(conn, &grade_id)?;
        Ok(json!({ "classroom": to_json(&classroom.view())? }))
    })
}

fn handle_classrooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let grade_id = get_required_str(&req.params, "gradeId")?;
        let grade = grades::get_grade(conn, &grade_id)?;
        let classroom = allocator::provision(conn, &grade)?;
        Ok(json!({ "classroom": to_json(&classroom.view())? }))
    })
}

fn handle_classrooms_recount(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let corrections = allocator::recount(conn, get_opt_str(&req.params, "gradeId"))?;
        Ok(json!({ "corrections": to_json(&corrections)? }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classrooms.list" => Some(handle_classrooms_list(state, req)),
        "classrooms.allocate" => Some(handle_classrooms_allocate(state, req)),
        "classrooms.create" => Some(handle_classrooms_create(state, req)),
        "classrooms.recount" => Some(handle_classrooms_recount(state, req)),
        _ => None,
    }
}
