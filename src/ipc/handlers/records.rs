use crate::error::DeskError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, fail, required_str};
use crate::ipc::types::{AppState, Request};
use crate::notice::Notice;
use crate::records::{
    parse_backend_payload, text_field, validate_assignment_save, validate_mark_save, RecordKind,
};
use crate::store::{composite_key, DocumentStore, Filter, SqliteStore};
use serde_json::{json, Value};
use uuid::Uuid;

/// Key for an imported document. Records that carry their natural identity keep
/// it so re-importing the same payload merges instead of duplicating.
fn import_key(kind: Option<RecordKind>, item: &Value) -> String {
    let natural = match kind {
        Some(RecordKind::Fee) => {
            let bill = text_field(item, &["billNumber", "billNo", "receiptNo"]);
            if bill.is_empty() {
                String::new()
            } else {
                composite_key(&[
                    &bill,
                    &text_field(item, &["admissionNumber", "admissionNo"]),
                    &text_field(item, &["feeHead", "feeHeadName", "head"]),
                ])
            }
        }
        Some(RecordKind::Mark) => {
            let adm = text_field(item, &["admissionNumber", "admissionNo"]);
            if adm.is_empty() {
                String::new()
            } else {
                composite_key(&[
                    "marks",
                    &text_field(item, &["academicYear"]),
                    &text_field(item, &["term"]),
                    &text_field(item, &["standard"]),
                    &text_field(item, &["section"]),
                    &text_field(item, &["examType", "exam"]),
                    &text_field(item, &["subject", "subjectName"]),
                    &adm,
                ])
            }
        }
        Some(RecordKind::Assignment) => {
            let id = text_field(item, &["assignmentId"]);
            let adm = text_field(item, &["admissionNumber", "admissionNo"]);
            if id.is_empty() || adm.is_empty() {
                String::new()
            } else {
                composite_key(&[&id, &adm])
            }
        }
        None => text_field(item, &["id", "_id", "key"]),
    };
    if natural.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        natural
    }
}

fn handle_records_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let collection = match required_str(req, "collection") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        None => None,
        Some(k) => match RecordKind::parse(k) {
            Some(kind) => Some(kind),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown record kind: {}", k),
                    None,
                )
            }
        },
    };
    let Some(payload) = req.params.get("payload") else {
        return err(&req.id, "bad_params", "missing payload", None);
    };
    let items = match parse_backend_payload(payload) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(req, DeskError::new("db_tx_failed", e.to_string())),
    };
    let store = SqliteStore::new(&tx);
    let mut imported = 0usize;
    let mut skipped = 0usize;
    for item in &items {
        if !item.is_object() {
            skipped += 1;
            continue;
        }
        let key = import_key(kind, item);
        if let Err(e) = store.upsert_merge(&collection, &key, item) {
            return fail(req, DeskError::db_update(e).with_details(json!({ "key": key })));
        }
        imported += 1;
    }
    if let Err(e) = tx.commit() {
        return fail(req, DeskError::new("db_commit_failed", e.to_string()));
    }
    tracing::info!(collection = %collection, imported, skipped, "records imported");
    if skipped > 0 {
        state.session.notices.push(Notice::info(format!(
            "Skipped {} row(s) that were not objects",
            skipped
        )));
    }
    ok(&req.id, json!({ "imported": imported, "skipped": skipped }))
}

fn handle_marks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let save = match validate_mark_save(&req.params) {
        Ok(v) => v,
        Err(fields) => return fail(req, DeskError::validation(fields)),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(req, DeskError::new("db_tx_failed", e.to_string())),
    };
    let store = SqliteStore::new(&tx);
    let now = chrono::Utc::now().to_rfc3339();
    let mut keys = Vec::with_capacity(save.entries.len());
    for entry in &save.entries {
        let key = composite_key(&[
            "marks",
            &save.academic_year,
            &save.term,
            &save.standard,
            &save.section,
            &save.exam_type,
            &save.subject,
            &entry.admission_number,
        ]);
        let mut body = json!({
            "academicYear": save.academic_year,
            "term": save.term,
            "standard": save.standard,
            "section": save.section,
            "examType": save.exam_type,
            "subject": save.subject,
            "admissionNumber": entry.admission_number,
            "maxMarks": save.max_marks,
            "marks": entry.marks,
            "updatedAt": now,
        });
        if !entry.student_name.is_empty() {
            body["studentName"] = json!(entry.student_name);
        }
        if let Err(e) = store.upsert_merge("marksflat", &key, &body) {
            return fail(req, DeskError::db_update(e).with_details(json!({ "key": key })));
        }
        keys.push(key);
    }
    if let Err(e) = tx.commit() {
        return fail(req, DeskError::new("db_commit_failed", e.to_string()));
    }
    state.session.notices.push(Notice::info(format!(
        "Marks saved for {} student(s)",
        keys.len()
    )));
    ok(&req.id, json!({ "saved": keys.len(), "keys": keys }))
}

fn student_name(store: &SqliteStore<'_>, admission_number: &str) -> String {
    store
        .query(
            "students_flat",
            &[Filter::eq("admissionNumber", admission_number)],
        )
        .ok()
        .and_then(|docs| docs.into_iter().next())
        .map(|d| text_field(&d.body, &["studentName", "name"]))
        .unwrap_or_default()
}

fn handle_assignments_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let save = match validate_assignment_save(&req.params) {
        Ok(v) => v,
        Err(fields) => return fail(req, DeskError::validation(fields)),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(req, DeskError::new("db_tx_failed", e.to_string())),
    };
    let store = SqliteStore::new(&tx);
    let assignment_id = req
        .params
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().to_rfc3339();
    let due = save.due_date.format("%Y-%m-%d").to_string();

    let mut saved = 0usize;
    for adm in &save.admission_numbers {
        let key = composite_key(&[&assignment_id, adm]);
        let mut body = json!({
            "assignmentId": assignment_id,
            "academicYear": save.academic_year,
            "term": save.term,
            "standard": save.standard,
            "section": save.section,
            "subject": save.subject,
            "title": save.title,
            "description": save.description,
            "dueDate": due,
            "maxMarks": save.max_marks,
            "admissionNumber": adm,
            "studentName": student_name(&store, adm),
            "updatedAt": now,
        });
        // Re-saving must not reset a status the student already progressed.
        match store.get("studentAssignmentsFlat", &key) {
            Ok(Some(_)) => {}
            Ok(None) => body["status"] = json!("assigned"),
            Err(e) => return fail(req, DeskError::db_query(e)),
        }
        if let Err(e) = store.upsert_merge("studentAssignmentsFlat", &key, &body) {
            return fail(req, DeskError::db_update(e).with_details(json!({ "key": key })));
        }
        saved += 1;
    }
    if let Err(e) = tx.commit() {
        return fail(req, DeskError::new("db_commit_failed", e.to_string()));
    }
    tracing::info!(assignment = %assignment_id, saved, "assignment saved");
    state
        .session
        .notices
        .push(Notice::info(format!("Assignment \"{}\" saved", save.title)));
    ok(
        &req.id,
        json!({ "assignmentId": assignment_id, "saved": saved }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.import" => Some(handle_records_import(state, req)),
        "marks.save" => Some(handle_marks_save(state, req)),
        "assignments.save" => Some(handle_assignments_save(state, req)),
        _ => None,
    }
}
