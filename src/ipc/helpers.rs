use crate::config::SchoolConfig;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{Actor, AppState, Request};
use crate::model::Role;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Runs a handler body against the open workspace, or answers `no_workspace`.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &SchoolConfig) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &state.config) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

/// Deserializes the whole params object; a missing object reads as `{}`.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let value = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| HandlerErr::bad_params(format!("invalid params: {}", e)))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", key)))
}

pub fn get_opt_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

/// The acting user of a mutating request. Roles are validated but not enforced.
pub fn require_actor(req: &Request) -> Result<Actor, HandlerErr> {
    let actor = req
        .actor
        .clone()
        .filter(|a| !a.id.trim().is_empty())
        .ok_or_else(|| HandlerErr::new("no_actor", format!("{} requires an actor", req.method)))?;
    if Role::parse_with_legacy(&actor.role).is_none() {
        let allowed: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
        return Err(HandlerErr::bad_params(format!(
            "actor.role must be one of {}, got {:?}",
            allowed.join("|"),
            actor.role
        )));
    }
    Ok(actor)
}

pub fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::new("internal", e.to_string()))
}
