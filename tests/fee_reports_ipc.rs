mod test_support;

use serde_json::{json, Value};
use test_support::{error_code, import, open_workspace, request, request_ok};

fn kinds(result: &Value) -> Vec<String> {
    result["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["kind"].as_str().unwrap_or("").to_string())
        .collect()
}

fn seed_fees(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
) {
    import(
        stdin,
        reader,
        "feeCollectionsFlat",
        Some("fee"),
        json!([
            { "billNo": "B1", "admissionNo": "A1", "studentName": "Asha", "feeHead": "Tuition", "amount": 100, "concession": 0, "date": "2024-01-01" },
            { "billNo": "B2", "admissionNo": "A1", "studentName": "Asha", "feeHead": "Transport", "amount": 50, "concession": 20, "date": "2024-01-01" },
            { "billNo": "B3", "admissionNo": "A2", "studentName": "Ravi", "feeHead": "Tuition", "amount": "abc", "date": "2024-01-02" },
            { "billNo": "B4", "admissionNo": "A3", "studentName": "Mina", "feeHead": "Tuition", "amount": 999, "date": "2024-03-01" }
        ]),
    );
}

#[test]
fn fee_collection_groups_by_day_and_student() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-fee-report");
    seed_fees(&mut stdin, &mut reader);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.feeCollection",
        json!({ "fromDate": "2024-01-01", "toDate": "2024-01-31" }),
    );
    assert_eq!(
        kinds(&report),
        vec![
            "header", "data", "data", "concession", "subtotal", "header", "data", "subtotal",
            "total"
        ]
    );
    let rows = report["rows"].as_array().expect("rows");
    assert_eq!(rows[0]["label"], "01/01/2024");
    assert_eq!(rows[1]["span"], 2);
    assert_eq!(rows[2]["span"], 0);
    assert_eq!(rows[3]["amount"], -20.0);
    // Concession is shown, not deducted.
    assert_eq!(rows[4]["amount"], 150.0);
    assert_eq!(rows[6]["amount"], 0.0);
    assert_eq!(report["grandTotal"], 150.0);
    assert_eq!(report["concessionTotal"], 20.0);
    assert_eq!(report["recordCount"], 3);

    let heads = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.feeHeadWise",
        json!({ "fromDate": "2024-01-01", "toDate": "2024-12-31" }),
    );
    let labels: Vec<&str> = heads["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter(|r| r["kind"] == "header")
        .map(|r| r["label"].as_str().unwrap_or(""))
        .collect();
    assert_eq!(labels, vec!["Tuition", "Transport"]);
    assert_eq!(heads["grandTotal"], 1149.0);

    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "reports.billWise",
        json!({ "fromDate": "2024-01-01" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exports_render_the_same_report() {
    let (workspace, _child, mut stdin, mut reader) = open_workspace("schooldesk-fee-export");
    seed_fees(&mut stdin, &mut reader);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "school", "patch": { "name": "Green Valley School" } }),
    );
    let range = json!({ "fromDate": "2024-01-01", "toDate": "2024-01-01" });

    let csv = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exports.csv",
        json!({ "report": "feeCollection", "params": range }),
    );
    let text = csv["content"].as_str().expect("csv text");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "\"Admission No\",\"Bill No\",\"Fee Head\",\"Mode\",\"Amount\""
    );
    assert_eq!(lines[1], "\"Date: 01/01/2024\"");
    assert_eq!(lines[2], "\"A1 - Asha\",\"B1\",\"Tuition\",\"\",100.00");
    assert_eq!(lines[4], "\"Concession\",\"\",\"\",\"\",-20.00");
    assert_eq!(lines[5], "\"Subtotal\",\"\",\"\",\"\",150.00");
    assert_eq!(lines.last().copied(), Some("\"Grand Total\",\"\",\"\",\"\",150.00"));

    let html_path = workspace.join("out").join("fees.html");
    let html = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exports.printHtml",
        json!({ "report": "feeCollection", "params": range, "outPath": html_path.to_string_lossy() }),
    );
    assert_eq!(html["format"], "html");
    let written = std::fs::read_to_string(&html_path).expect("read html export");
    assert!(written.contains("<h1>Green Valley School</h1>"));
    assert!(written.contains("window.print()"));
    assert!(written.contains("row-concession"));
    assert!(written.contains("<td class=\"num\">₹150.00</td>"));

    let layout = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exports.pageLayout",
        json!({ "report": "feeCollection", "params": range }),
    );
    let doc = &layout["content"];
    assert_eq!(doc["widthMm"], 210.0);
    assert_eq!(doc["orientation"], "portrait");
    let pages = doc["pages"].as_array().expect("pages");
    assert_eq!(pages.len(), 1);
    assert!(pages[0]["footer"]
        .as_str()
        .unwrap_or("")
        .ends_with("Page 1 of 1"));
    assert_eq!(pages[0]["brandLines"][0], "Green Valley School");

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exports.csv",
        json!({ "report": "billWise", "params": { "fromDate": "2025-01-01", "toDate": "2025-01-31" } }),
    );
    assert!(empty["content"]
        .as_str()
        .unwrap_or("")
        .ends_with("\"No data available\"\n"));

    let unknown = request(
        &mut stdin,
        &mut reader,
        "6",
        "exports.csv",
        json!({ "report": "payroll", "params": range }),
    );
    assert_eq!(error_code(&unknown), "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}
