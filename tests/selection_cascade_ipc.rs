mod test_support;

use serde_json::{json, Value};
use test_support::{error_code, import, open_workspace, request, request_ok};

fn level<'a>(snapshot: &'a Value, name: &str) -> &'a Value {
    snapshot["levels"]
        .as_array()
        .expect("levels")
        .iter()
        .find(|l| l["name"] == name)
        .unwrap_or_else(|| panic!("level {} missing", name))
}

fn option_values(level: &Value) -> Vec<String> {
    level["options"]
        .as_array()
        .expect("options")
        .iter()
        .map(|o| o["value"].as_str().unwrap_or("").to_string())
        .collect()
}

fn seed_exams(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
) {
    import(
        stdin,
        reader,
        "academicYears",
        None,
        json!([{ "year": "2024-2025" }, { "year": "2023-2024" }, { "year": "2024-2025" }]),
    );
    import(
        stdin,
        reader,
        "createdExamFlat",
        None,
        json!([
            { "academicYear": "2024-2025", "term": "Term 1", "standard": "5", "section": "A", "examType": "Midterm", "subject": "Maths" },
            { "academicYear": "2024-2025", "term": "Term 1", "standard": "5", "section": "A", "examType": "Midterm", "subject": "Science" },
            { "academicYear": "2024-2025", "term": "Term 2", "standard": "5", "section": "A", "examType": "Final", "subject": "Maths" },
            { "academicYear": "2023-2024", "term": "Annual", "standard": "4", "section": "B", "examType": "Final", "subject": "English" }
        ]),
    );
}

#[test]
fn selecting_down_the_chain_and_changing_the_root_clears_descendants() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-cascade");
    seed_exams(&mut stdin, &mut reader);

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "selection.open",
        json!({ "cascade": "marksEntry" }),
    );
    let root = level(&opened["snapshot"], "academicYear");
    assert_eq!(root["state"], "populated");
    assert_eq!(option_values(root), vec!["2024-2025", "2023-2024"]);

    let chain = [
        ("academicYear", "2024-2025"),
        ("term", "Term 1"),
        ("standard", "5"),
        ("section", "A"),
        ("examType", "Midterm"),
    ];
    let mut last = Value::Null;
    for (i, (name, value)) in chain.iter().enumerate() {
        last = request_ok(
            &mut stdin,
            &mut reader,
            &format!("set-{}", i),
            "selection.set",
            json!({ "cascade": "marksEntry", "level": name, "value": value }),
        );
    }
    assert_eq!(
        option_values(level(&last["snapshot"], "subject")),
        vec!["Maths", "Science"]
    );
    let done = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "subject", "value": "Maths" }),
    );
    assert_eq!(done["snapshot"]["complete"], true);

    let changed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "academicYear", "value": "2023-2024" }),
    );
    let snap = &changed["snapshot"];
    assert_eq!(snap["complete"], false);
    assert_eq!(option_values(level(snap, "term")), vec!["Annual"]);
    for name in ["standard", "section", "examType", "subject"] {
        let l = level(snap, name);
        assert_eq!(l["value"], "", "{} kept a stale value", name);
        assert!(option_values(l).is_empty(), "{} kept stale options", name);
    }

    let rejected = request(
        &mut stdin,
        &mut reader,
        "4",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "term", "value": "Term 1" }),
    );
    assert_eq!(error_code(&rejected), "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn superseded_and_cleared_fetches_are_discarded() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-cascade-stale");
    seed_exams(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "selection.open",
        json!({ "cascade": "marksEntry" }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "academicYear", "value": "2024-2025", "deferFetch": true }),
    );
    let first_ticket = first["pendingFetch"]["seq"].as_u64().expect("first ticket");
    assert_eq!(level(&first["snapshot"], "term")["state"], "loading");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "academicYear", "value": "2023-2024", "deferFetch": true }),
    );
    let second_ticket = second["pendingFetch"]["seq"].as_u64().expect("second ticket");
    assert_ne!(first_ticket, second_ticket);

    // The late answer for the old year must not land.
    let stale = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "selection.completeFetch",
        json!({ "cascade": "marksEntry", "ticket": first_ticket }),
    );
    assert_eq!(stale["applied"], false);
    assert_eq!(level(&stale["snapshot"], "term")["state"], "loading");

    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "selection.completeFetch",
        json!({ "cascade": "marksEntry", "ticket": second_ticket }),
    );
    assert_eq!(fresh["applied"], true);
    assert_eq!(option_values(level(&fresh["snapshot"], "term")), vec!["Annual"]);

    // Clearing the root while a child fetch is in flight.
    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "term", "value": "Annual", "deferFetch": true }),
    );
    let ticket = pending["pendingFetch"]["seq"].as_u64().expect("standard ticket");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "selection.set",
        json!({ "cascade": "marksEntry", "level": "academicYear", "value": "" }),
    );
    let late = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "selection.completeFetch",
        json!({ "cascade": "marksEntry", "ticket": ticket }),
    );
    assert_eq!(late["applied"], false);
    let snap = &late["snapshot"];
    assert_eq!(level(snap, "academicYear")["value"], "");
    for name in ["term", "standard", "section", "examType", "subject"] {
        assert!(option_values(level(snap, name)).is_empty(), "{} not cleared", name);
    }

    let gone = request(
        &mut stdin,
        &mut reader,
        "9",
        "selection.completeFetch",
        json!({ "cascade": "marksEntry", "ticket": ticket }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn complete_selection_loads_filtered_records() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-cascade-records");
    seed_exams(&mut stdin, &mut reader);
    import(
        &mut stdin,
        &mut reader,
        "marksflat",
        Some("mark"),
        json!([
            { "academicYear": "2024-2025", "term": "Term 1", "standard": 5, "section": "A", "examType": "Midterm", "subject": "Maths", "admissionNo": "A101", "name": "Asha", "marksObtained": "45", "maxMarks": 50 },
            { "academicYear": "2024-2025", "term": "Term 1", "standard": 5, "section": "A", "examType": "Midterm", "subject": "Science", "admissionNo": "A101", "name": "Asha", "marks": 30, "maxMarks": 50 }
        ]),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "selection.open",
        json!({ "cascade": "marksEntry" }),
    );
    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "selection.records",
        json!({ "cascade": "marksEntry" }),
    );
    assert_eq!(error_code(&early), "bad_params");

    for (i, (name, value)) in [
        ("academicYear", "2024-2025"),
        ("term", "Term 1"),
        ("standard", "5"),
        ("section", "A"),
        ("examType", "Midterm"),
        ("subject", "Maths"),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("set-{}", i),
            "selection.set",
            json!({ "cascade": "marksEntry", "level": name, "value": value }),
        );
    }

    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "selection.records",
        json!({ "cascade": "marksEntry" }),
    );
    let records = loaded["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["admissionNumber"], "A101");
    assert_eq!(records[0]["studentName"], "Asha");
    assert_eq!(records[0]["marks"], 45.0);

    let _ = std::fs::remove_dir_all(workspace);
}
