use crate::error::DeskError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{fail, no_workspace, required_str};
use crate::ipc::types::{AppState, Request};
use crate::notice::Notice;
use crate::resolver::{CascadeSpec, FetchRequest, Resolver};
use crate::store::{DocumentStore, SqliteStore};
use serde_json::json;

fn defer_fetch(req: &Request) -> bool {
    req.params
        .get("deferFetch")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn cascade_not_open(req: &Request, name: &str) -> serde_json::Value {
    fail(
        req,
        DeskError::not_found(format!("cascade {} is not open", name))
            .with_details(json!({ "cascade": name })),
    )
}

/// Result shape shared by every call that may have issued a fetch.
fn selection_result(resolver: &Resolver, pending: Option<&FetchRequest>) -> serde_json::Value {
    json!({
        "snapshot": resolver.snapshot(),
        "pendingFetch": pending,
    })
}

fn handle_cascades(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let cascades: Vec<CascadeSpec> = CascadeSpec::preset_names()
        .iter()
        .filter_map(|n| CascadeSpec::named(n))
        .collect();
    ok(&req.id, json!({ "cascades": cascades }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(spec) = CascadeSpec::named(&name) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown cascade: {}", name),
            Some(json!({ "known": CascadeSpec::preset_names() })),
        );
    };

    let mut resolver = Resolver::new(spec);
    let mut pending = resolver.open();
    if !defer_fetch(req) {
        if let Some(fetch) = pending.take() {
            resolver.resolve(&SqliteStore::new(conn), &fetch);
        }
    }
    let result = selection_result(&resolver, pending.as_ref());
    state.session.cascades.insert(name, resolver);
    ok(&req.id, result)
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match state.session.cascades.get(&name) {
        Some(r) => ok(&req.id, selection_result(r, None)),
        None => cascade_not_open(req, &name),
    }
}

fn handle_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level = match required_str(req, "level") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // An empty or missing value clears the level.
    let value = req
        .params
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let Some(resolver) = state.session.cascades.get_mut(&name) else {
        return cascade_not_open(req, &name);
    };

    let mut pending = match resolver.set_selection(&level, &value) {
        Ok(p) => p,
        Err(e) => return fail(req, e),
    };
    if !defer_fetch(req) {
        if let Some(fetch) = pending.take() {
            resolver.resolve(&SqliteStore::new(conn), &fetch);
        }
    }
    ok(&req.id, selection_result(resolver, pending.as_ref()))
}

fn handle_complete_fetch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(seq) = req.params.get("ticket").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing ticket", None);
    };
    let Some(resolver) = state.session.cascades.get_mut(&name) else {
        return cascade_not_open(req, &name);
    };
    let applied = if let Some(fetch) = resolver.ticket(seq).cloned() {
        resolver.resolve(&SqliteStore::new(conn), &fetch)
    } else if resolver.take_superseded(seq) {
        false
    } else {
        return fail(
            req,
            DeskError::not_found(format!("unknown or already completed ticket: {}", seq)),
        );
    };
    ok(
        &req.id,
        json!({
            "applied": applied,
            "snapshot": resolver.snapshot(),
        }),
    )
}

fn handle_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(resolver) = state.session.cascades.get_mut(&name) else {
        return cascade_not_open(req, &name);
    };
    resolver.reset();
    ok(&req.id, selection_result(resolver, None))
}

fn handle_records(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "cascade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(resolver) = state.session.cascades.get(&name) else {
        return cascade_not_open(req, &name);
    };
    if !resolver.is_complete() {
        let missing: Vec<&str> = resolver
            .spec()
            .levels
            .iter()
            .filter(|l| resolver.value(&l.name).unwrap_or("").is_empty())
            .map(|l| l.name.as_str())
            .collect();
        return err(
            &req.id,
            "bad_params",
            "selection is incomplete",
            Some(json!({ "missing": missing })),
        );
    }

    let source = resolver.spec().records.clone();
    let filters = resolver.record_filters();
    let docs = match SqliteStore::new(conn).query(&source.collection, &filters) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(cascade = %name, error = %e, "record fetch failed");
            state
                .session
                .notices
                .push(Notice::error(format!("Could not load records: {}", e)));
            Vec::new()
        }
    };
    let records: Vec<serde_json::Value> = docs
        .iter()
        .map(|d| match source.kind {
            Some(kind) => serde_json::to_value(kind.normalize(&d.body)).unwrap_or_default(),
            None => d.body.clone(),
        })
        .collect();

    ok(
        &req.id,
        json!({
            "collection": source.collection,
            "records": records,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "selection.cascades" => Some(handle_cascades(state, req)),
        "selection.open" => Some(handle_open(state, req)),
        "selection.get" => Some(handle_get(state, req)),
        "selection.set" => Some(handle_set(state, req)),
        "selection.completeFetch" => Some(handle_complete_fetch(state, req)),
        "selection.reset" => Some(handle_reset(state, req)),
        "selection.records" => Some(handle_records(state, req)),
        _ => None,
    }
}
