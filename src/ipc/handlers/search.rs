use crate::ipc::error::{err, ok};
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use crate::notice::Notice;
use crate::records::text_field;
use crate::settings::SearchSettings;
use crate::store::{DocumentStore, SqliteStore};
use serde_json::json;
use std::time::{Duration, Instant};

/// Case-insensitive substring match on student name or admission number, in
/// store order.
fn find_students(
    store: &dyn DocumentStore,
    query: &str,
    settings: &SearchSettings,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let needle = query.trim().to_lowercase();
    if needle.chars().count() < settings.min_chars {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for doc in store.list("students_flat")? {
        let name = text_field(&doc.body, &["studentName", "name"]);
        let adm = text_field(&doc.body, &["admissionNumber", "admissionNo"]);
        if !name.to_lowercase().contains(&needle) && !adm.to_lowercase().contains(&needle) {
            continue;
        }
        out.push(json!({
            "key": doc.key,
            "admissionNumber": adm,
            "studentName": name,
            "standard": text_field(&doc.body, &["standard"]),
            "section": text_field(&doc.body, &["section"]),
        }));
        if out.len() >= settings.max_results {
            break;
        }
    }
    Ok(out)
}

fn load_settings(state: &AppState) -> SearchSettings {
    let Some(conn) = state.db.as_ref() else {
        return SearchSettings::default();
    };
    SearchSettings::load(conn).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "search settings unreadable, using defaults");
        SearchSettings::default()
    })
}

fn handle_search_input(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return no_workspace(req);
    }
    let Some(text) = req.params.get("text").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing text", None);
    };
    let settings = load_settings(state);
    let search = &mut state.session.search;
    search.set_delay(Duration::from_millis(settings.debounce_ms));
    let token = search.schedule(text.to_string(), Instant::now());
    ok(
        &req.id,
        json!({
            "token": token,
            "dueInMs": settings.debounce_ms,
        }),
    )
}

fn handle_search_poll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = Instant::now();
    let Some((token, query)) = state.session.search.take_due(now) else {
        return match state.session.search.remaining(now) {
            Some(left) => ok(
                &req.id,
                json!({
                    "status": "pending",
                    "token": state.session.search.pending_token(),
                    "dueInMs": left.as_millis() as u64,
                }),
            ),
            None => ok(&req.id, json!({ "status": "idle" })),
        };
    };

    let settings = load_settings(state);
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let results = match find_students(&SqliteStore::new(conn), &query, &settings) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "student search failed");
            state
                .session
                .notices
                .push(Notice::error(format!("Search failed: {}", e)));
            Vec::new()
        }
    };
    ok(
        &req.id,
        json!({
            "status": "ready",
            "token": token,
            "query": query,
            "results": results,
        }),
    )
}

fn handle_search_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cancelled = state.session.search.cancel();
    ok(&req.id, json!({ "cancelled": cancelled }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "search.input" => Some(handle_search_input(state, req)),
        "search.poll" => Some(handle_search_poll(state, req)),
        "search.cancel" => Some(handle_search_cancel(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{FailingStore, MemoryStore};

    fn students() -> MemoryStore {
        MemoryStore::with(
            "students_flat",
            vec![
                json!({"admissionNumber": "A101", "studentName": "Asha Rao", "standard": "5"}),
                json!({"admissionNumber": "A102", "studentName": "Ravi Kumar", "standard": "5"}),
                json!({"admissionNumber": "B201", "studentName": "Ashwin Das", "standard": "6"}),
            ],
        )
    }

    fn names(v: &[serde_json::Value]) -> Vec<&str> {
        v.iter().map(|r| r["studentName"].as_str().unwrap()).collect()
    }

    #[test]
    fn matches_name_or_admission_number_case_insensitively() {
        let s = SearchSettings::default();
        let hits = find_students(&students(), "ASH", &s).unwrap();
        assert_eq!(names(&hits), vec!["Asha Rao", "Ashwin Das"]);
        let hits = find_students(&students(), "b2", &s).unwrap();
        assert_eq!(names(&hits), vec!["Ashwin Das"]);
    }

    #[test]
    fn short_queries_and_limits() {
        let mut s = SearchSettings::default();
        assert!(find_students(&students(), "a", &s).unwrap().is_empty());
        s.max_results = 1;
        assert_eq!(find_students(&students(), "as", &s).unwrap().len(), 1);
    }

    #[test]
    fn store_failure_propagates() {
        assert!(find_students(&FailingStore, "asha", &SearchSettings::default()).is_err());
    }
}
