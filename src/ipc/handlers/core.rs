use crate::config::SchoolConfig;
use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// Opens (creating if needed) the workspace database and its school settings.
///
/// On failure the previously selected workspace stays active.
pub fn open_workspace(state: &mut AppState, path: &Path) -> Result<(), HandlerErr> {
    let config = SchoolConfig::load(path)
        .map_err(|e| HandlerErr::new("config_invalid", format!("{e:#}")))?;
    let conn = db::open_db(path).map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    info!(
        workspace = %path.to_string_lossy(),
        id_prefix = %config.id_prefix,
        "workspace opened"
    );
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.config = config;
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return HandlerErr::bad_params("missing params.path").response(&req.id);
    };
    match open_workspace(state, &path) {
        Ok(()) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "config": {
                    "idPrefix": state.config.id_prefix,
                    "defaultCapacity": state.config.default_capacity,
                    "photoUrlPrefix": state.config.photo_url_prefix,
                }
            }),
        ),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
