use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;

use crate::debounce::Debouncer;
use crate::notice::Notice;
use crate::resolver::Resolver;
use crate::settings::SearchSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Per-process UI state that outlives a single request.
pub struct Session {
    pub cascades: HashMap<String, Resolver>,
    pub search: Debouncer<String>,
    pub notices: Vec<Notice>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            cascades: HashMap::new(),
            search: Debouncer::new(Duration::from_millis(
                SearchSettings::default().debounce_ms,
            )),
            notices: Vec::new(),
        }
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Session,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            session: Session::new(),
        }
    }
}
