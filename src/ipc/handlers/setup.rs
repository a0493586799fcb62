use crate::ipc::error::{err, ok};
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use crate::settings::{load_section, update_section, SearchSettings, SetupSection};
use serde_json::{json, Map, Value};
use std::time::Duration;

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let Some(section_name) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown section: {}", section_name),
            None,
        );
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let updated = match update_section(conn, section, patch) {
        Ok(Ok(v)) => v,
        Ok(Err(msg)) => {
            return err(
                &req.id,
                "bad_params",
                msg,
                Some(json!({ "section": section.name() })),
            )
        }
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    if matches!(section, SetupSection::Search) {
        let delay = SearchSettings::load(conn)
            .map(|s| s.debounce_ms)
            .unwrap_or(SearchSettings::default().debounce_ms);
        state.session.search.set_delay(Duration::from_millis(delay));
    }
    ok(&req.id, json!({ "section": section.name(), "value": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
