use crate::dates;
use crate::fees::{self, FeeFilter, FeeInput, FeeView};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, parse_params, require_actor, to_json, with_db,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn views(fees: Vec<crate::model::Fee>) -> Vec<FeeView> {
    fees.into_iter().map(FeeView::from).collect()
}

fn handle_fees_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let actor = require_actor(req)?;
        let input: FeeInput = parse_params(&req.params)?;
        let fee = fees::create_fee(conn, &input, &actor.id)?;
        Ok(json!({ "fee": to_json(&FeeView::from(fee))? }))
    })
}

fn handle_fees_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let fee_id = get_required_str(&req.params, "feeId")?;
        let fee = fees::get_fee(conn, &fee_id)?;
        Ok(json!({ "fee": to_json(&FeeView::from(fee))? }))
    })
}

fn handle_fees_pay(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, cfg| {
        let actor = require_actor(req)?;
        let fee_id = get_required_str(&req.params, "feeId")?;
        let fee = fees::pay_fee(
            conn,
            &cfg.id_prefix,
            &fee_id,
            get_opt_str(&req.params, "paymentMethod"),
            &actor.id,
        )?;
        Ok(json!({ "fee": to_json(&FeeView::from(fee))? }))
    })
}

fn handle_fees_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        require_actor(req)?;
        let fee_id = get_required_str(&req.params, "feeId")?;
        fees::delete_fee(conn, &fee_id)?;
        Ok(json!({ "ok": true }))
    })
}

fn handle_fees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let filter: FeeFilter = parse_params(&req.params)?;
        let (list, totals) = fees::list_fees(conn, &filter)?;
        Ok(json!({
            "fees": to_json(&views(list))?,
            "totals": to_json(&totals)?,
        }))
    })
}

fn handle_fees_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let student_id = get_required_str(&req.params, "studentId")?;
        let (list, summary) = fees::student_fees(conn, &student_id)?;
        Ok(json!({
            "fees": to_json(&views(list))?,
            "summary": to_json(&summary)?,
        }))
    })
}

fn handle_fees_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let year = req
            .params
            .get("year")
            .and_then(|v| v.as_i64())
            .map(|y| y as i32)
            .unwrap_or_else(dates::current_year);
        to_json(&fees::year_summary(conn, year)?)
    })
}

fn handle_fees_receipt(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_db(state, req, |conn, _| {
        let fee_id = get_required_str(&req.params, "feeId")?;
        to_json(&fees::receipt(conn, &fee_id)?)
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.create" => Some(handle_fees_create(state, req)),
        "fees.get" => Some(handle_fees_get(state, req)),
        "fees.pay" => Some(handle_fees_pay(state, req)),
        "fees.delete" => Some(handle_fees_delete(state, req)),
        "fees.list" => Some(handle_fees_list(state, req)),
        "fees.student" => Some(handle_fees_student(state, req)),
        "fees.summary" => Some(handle_fees_summary(state, req)),
        "fees.receipt" => Some(handle_fees_receipt(state, req)),
        _ => None,
    }
}
