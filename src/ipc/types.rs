use std::path::PathBuf;

use crate::config::SchoolConfig;
use rusqlite::Connection;
use serde::Deserialize;

/// The signed-in staff member a request is made on behalf of.
#[derive(Debug, Deserialize, Clone)]
pub struct Actor {
    pub id: String,
    pub role: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub actor: Option<Actor>,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: SchoolConfig,
}
