use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{DocumentStore, Filter, SqliteStore};
use serde_json::json;
use uuid::Uuid;

fn parse_filters(req: &Request) -> Result<Vec<Filter>, serde_json::Value> {
    match req.params.get("filters") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Object(map)) => Ok(map
            .iter()
            .map(|(field, value)| Filter::eq(field.as_str(), value.clone()))
            .collect()),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            "filters must be an object of field: value",
            None,
        )),
    }
}

fn handle_store_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).get(&collection, &key) {
        Ok(Some(doc)) => ok(&req.id, json!({ "key": doc.key, "body": doc.body })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "document not found",
            Some(json!({ "collection": collection, "key": key })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_store_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).list(&collection) {
        Ok(docs) => ok(&req.id, json!({ "documents": docs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_store_query(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let filters = match parse_filters(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).query(&collection, &filters) {
        Ok(docs) => ok(&req.id, json!({ "documents": docs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_store_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(body) = req.params.get("body").filter(|b| b.is_object()) else {
        return err(&req.id, "bad_params", "body must be an object", None);
    };
    let key = req
        .params
        .get("key")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match SqliteStore::new(conn).upsert_merge(&collection, &key, body) {
        Ok(doc) => ok(&req.id, json!({ "key": doc.key, "body": doc.body })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_store_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).delete(&collection, &key) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "store.get" => Some(handle_store_get(state, req)),
        "store.list" => Some(handle_store_list(state, req)),
        "store.query" => Some(handle_store_query(state, req)),
        "store.upsert" => Some(handle_store_upsert(state, req)),
        "store.delete" => Some(handle_store_delete(state, req)),
        _ => None,
    }
}
