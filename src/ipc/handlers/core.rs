use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::settings::SearchSettings;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            let search = SearchSettings::load(&conn).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "search settings unreadable, using defaults");
                SearchSettings::default()
            });
            // Selections and pending searches belong to the previous workspace.
            state.session.cascades.clear();
            state.session.search.cancel();
            state
                .session
                .search
                .set_delay(Duration::from_millis(search.debounce_ms));

            state.workspace = Some(path.clone());
            state.db = Some(conn);
            tracing::info!(workspace = %path.to_string_lossy(), "workspace selected");
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_notices_drain(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut notices = state.session.take_notices();
    for r in state.session.cascades.values_mut() {
        notices.extend(r.drain_notices());
    }
    ok(&req.id, json!({ "notices": notices }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "notices.drain" => Some(handle_notices_drain(state, req)),
        _ => None,
    }
}
