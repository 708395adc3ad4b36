use crate::ipc::helpers::{get_required_str, parse_params, require_actor, to_json, with_db};
use crate::ipc::types::{AppState, Request};
use crate::staff::{self, StaffFilter, StaffInput};
use serde_json::json;

fn handle_staff_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let filter: StaffFilter = parse_params(&req.params)?;
        let members = staff::list_staff(conn, &filter)?
            .into_iter()
            .map(|s| staff::populate(conn, s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "count": members.len(), "staff": to_json(&members)? }))
    })
}

fn handle_staff_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let staff_id = get_required_str(&req.params, "staffId")?;
        let view = staff::populate(conn, staff::get_staff(conn, &staff_id)?)?;
        Ok(json!({ "staff": to_json(&view)? }))
    })
}

fn handle_staff_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        let actor = require_actor(req)?;
        let input: StaffInput = parse_params(&req.params)?;
        let member = staff::create_staff(conn, cfg, &input, &actor.id)?;
        let view = staff::populate(conn, member)?;
        Ok(json!({ "staff": to_json(&view)? }))
    })
}

fn handle_staff_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        require_actor(req)?;
        let staff_id = get_required_str(&req.params, "staffId")?;
        let input: StaffInput = parse_params(&req.params)?;
        let member = staff::update_staff(conn, cfg, &staff_id, &input)?;
        let view = staff::populate(conn, member)?;
        Ok(json!({ "staff": to_json(&view)? }))
    })
}

fn handle_staff_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let staff_id = get_required_str(&req.params, "staffId")?;
        staff::delete_staff(conn, &staff_id)?;
        Ok(json!({ "ok": true }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staff.list" => Some(handle_staff_list(state, req)),
        "staff.get" => Some(handle_staff_get(state, req)),
        "staff.create" => Some(handle_staff_create(state, req)),
        "staff.update" => Some(handle_staff_update(state, req)),
        "staff.delete" => Some(handle_staff_delete(state, req)),
        _ => None,
    }
}
