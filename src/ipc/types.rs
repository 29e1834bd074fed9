use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One line of the stdin protocol. Unknown methods fall through the
/// router to a `not_implemented` error.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Session state for the request loop. Both fields stay empty until
/// `workspace.select` opens a timetable database.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
        }
    }
}
