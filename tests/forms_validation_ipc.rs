mod test_support;

use serde_json::json;
use test_support::{error_code, import, open_workspace, request, request_ok};

#[test]
fn marks_save_reports_field_errors_without_writing() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-marks-save");

    let rejected = request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "academicYear": "2024-2025",
            "term": "Term 1",
            "standard": "5",
            "examType": "Midterm",
            "subject": "Maths",
            "maxMarks": 50,
            "entries": [
                { "admissionNumber": "A101", "marks": 60 },
                { "admissionNumber": "", "marks": "abc" }
            ]
        }),
    );
    assert_eq!(error_code(&rejected), "validation_failed");
    let fields = &rejected["error"]["details"]["fields"];
    assert_eq!(fields["section"], "required");
    assert!(fields.get("entries[0].marks").is_some());
    assert_eq!(fields["entries[1].admissionNumber"], "required");
    assert_eq!(fields["entries[1].marks"], "must be a number");

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "store.list",
        json!({ "collection": "marksflat" }),
    );
    assert_eq!(stored["documents"].as_array().map(|d| d.len()), Some(0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn marks_save_merges_on_the_composite_key() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-marks-merge");
    let base = json!({
        "academicYear": "2024-2025",
        "term": "Term 1",
        "standard": "5",
        "section": "A",
        "examType": "Midterm",
        "subject": "Maths",
        "maxMarks": 50,
        "entries": [{ "admissionNumber": "A101", "studentName": "Asha", "marks": 42 }]
    });
    let saved = request_ok(&mut stdin, &mut reader, "1", "marks.save", base.clone());
    assert_eq!(saved["saved"], 1);
    assert_eq!(
        saved["keys"][0],
        "marks_2024-2025_Term-1_5_A_Midterm_Maths_A101"
    );

    let drained = request_ok(&mut stdin, &mut reader, "1b", "notices.drain", json!({}));
    let notices = drained["notices"].as_array().expect("notices");
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0]["level"], "info");
    let again_drained = request_ok(&mut stdin, &mut reader, "1c", "notices.drain", json!({}));
    assert_eq!(again_drained["notices"].as_array().map(|n| n.len()), Some(0));

    let mut again = base;
    again["entries"] = json!([{ "admissionNumber": "A101", "marks": "44.5" }]);
    let _ = request_ok(&mut stdin, &mut reader, "2", "marks.save", again);

    let doc = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "store.get",
        json!({ "collection": "marksflat", "key": "marks_2024-2025_Term-1_5_A_Midterm_Maths_A101" }),
    );
    assert_eq!(doc["body"]["marks"], 44.5);
    // Fields absent from the second save survive the merge.
    assert_eq!(doc["body"]["studentName"], "Asha");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.marks",
        json!({ "academicYear": "2024-2025", "term": "Term 1", "standard": "5", "examType": "Midterm" }),
    );
    assert_eq!(report["grandTotals"]["marks"], 44.5);
    assert_eq!(report["grandTotals"]["maxMarks"], 50.0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn assignment_save_fans_out_per_student() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-assignments");
    import(
        &mut stdin,
        &mut reader,
        "students_flat",
        None,
        json!([
            { "admissionNumber": "A101", "studentName": "Asha", "standard": "5", "section": "A" },
            { "admissionNumber": "A102", "studentName": "Ravi", "standard": "5", "section": "A" }
        ]),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "1",
        "assignments.save",
        json!({ "academicYear": "2024-2025", "title": "Fractions", "dueDate": "soon" }),
    );
    assert_eq!(error_code(&missing), "validation_failed");
    let fields = &missing["error"]["details"]["fields"];
    assert_eq!(fields["dueDate"], "must be a date");
    assert!(fields.get("admissionNumbers").is_some());

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.save",
        json!({
            "assignmentId": "asg-1",
            "academicYear": "2024-2025",
            "term": "Term 1",
            "standard": "5",
            "section": "A",
            "subject": "Maths",
            "title": "Fractions",
            "dueDate": "15/07/2024",
            "maxMarks": 10,
            "admissionNumbers": ["A101", "A102"]
        }),
    );
    assert_eq!(saved["assignmentId"], "asg-1");
    assert_eq!(saved["saved"], 2);

    let doc = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "store.get",
        json!({ "collection": "studentAssignmentsFlat", "key": "asg-1_A102" }),
    );
    assert_eq!(doc["body"]["studentName"], "Ravi");
    assert_eq!(doc["body"]["dueDate"], "2024-07-15");
    assert_eq!(doc["body"]["status"], "assigned");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.assignments",
        json!({ "academicYear": "2024-2025", "term": "Term 1", "standard": "5", "subject": "Maths" }),
    );
    assert_eq!(report["recordCount"], 2);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failed_multi_row_writes_leave_nothing_behind() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-write-atomic");

    let conn = rusqlite::Connection::open(workspace.join("schooldesk.sqlite3")).expect("open db");
    conn.execute_batch(
        "CREATE TRIGGER reject_a2 BEFORE INSERT ON documents
         WHEN NEW.doc_key LIKE '%A2'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
    )
    .expect("create trigger");
    drop(conn);

    let rejected = request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "academicYear": "2024-2025",
            "term": "Term 1",
            "standard": "5",
            "section": "A",
            "examType": "Midterm",
            "subject": "Maths",
            "maxMarks": 50,
            "entries": [
                { "admissionNumber": "A1", "marks": 40 },
                { "admissionNumber": "A2", "marks": 35 }
            ]
        }),
    );
    assert_eq!(error_code(&rejected), "db_update_failed");
    let marks = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "store.list",
        json!({ "collection": "marksflat" }),
    );
    assert_eq!(marks["documents"].as_array().map(|d| d.len()), Some(0));

    let rejected = request(
        &mut stdin,
        &mut reader,
        "3",
        "records.import",
        json!({
            "collection": "imported",
            "payload": [{ "id": "A1" }, { "id": "A2" }]
        }),
    );
    assert_eq!(error_code(&rejected), "db_update_failed");
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "store.list",
        json!({ "collection": "imported" }),
    );
    assert_eq!(imported["documents"].as_array().map(|d| d.len()), Some(0));

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "records.import",
        json!({ "collection": "imported", "payload": [{ "id": "B1" }] }),
    );
    assert_eq!(saved["imported"], 1);

    let _ = std::fs::remove_dir_all(workspace);
}
