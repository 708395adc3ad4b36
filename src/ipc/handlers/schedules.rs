use crate::ipc::helpers::{
    get_opt_str, get_required_str, parse_params, require_actor, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::schedules::{self, PeriodInput};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertParams {
    grade_id: String,
    day_of_week: String,
    #[serde(default)]
    periods: Vec<PeriodInput>,
}

fn handle_schedules_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let actor = require_actor(req)?;
        let p: UpsertParams = parse_params(&req.params)?;
        let schedule =
            schedules::upsert_schedule(conn, &p.grade_id, &p.day_of_week, &p.periods, &actor.id)?;
        Ok(json!({ "schedule": to_json(&schedule)? }))
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    schedule_id: String,
    #[serde(default)]
    periods: Vec<PeriodInput>,
}

fn handle_schedules_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let p: UpdateParams = parse_params(&req.params)?;
        let schedule = schedules::update_schedule(conn, &p.schedule_id, &p.periods)?;
        Ok(json!({ "schedule": to_json(&schedule)? }))
    })
}

fn handle_schedules_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let id = get_required_str(&req.params, "scheduleId")?;
        Ok(json!({ "schedule": to_json(&schedules::get_schedule(conn, &id)?)? }))
    })
}

fn handle_schedules_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let id = get_required_str(&req.params, "scheduleId")?;
        schedules::delete_schedule(conn, &id)?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_schedules_delete_for_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let grade_id = get_required_str(&req.params, "gradeId")?;
        let deleted = schedules::delete_grade_schedules(conn, &grade_id)?;
        Ok(json!({ "deletedCount": deleted }))
    })
}

fn handle_schedules_week(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let grade_id = get_required_str(&req.params, "gradeId")?;
        Ok(json!({ "week": to_json(&schedules::week(conn, &grade_id)?)? }))
    })
}

fn handle_schedules_today(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let grade_id = get_required_str(&req.params, "gradeId")?;
        to_json(&schedules::for_date(conn, &grade_id, get_opt_str(&req.params, "date"))?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedules.upsert" => Some(handle_schedules_upsert(state, req)),
        "schedules.update" => Some(handle_schedules_update(state, req)),
        "schedules.get" => Some(handle_schedules_get(state, req)),
        "schedules.delete" => Some(handle_schedules_delete(state, req)),
        "schedules.deleteForGrade" => Some(handle_schedules_delete_for_grade(state, req)),
        "schedules.week" => Some(handle_schedules_week(state, req)),
        "schedules.today" => Some(handle_schedules_today(state, req)),
        _ => None,
    }
}
