use super::reports::{build_report, BuiltReport};
use crate::export::{to_csv, to_page_layout, to_print_html, ReportTable};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{fail, no_workspace, required_str};
use crate::ipc::types::{AppState, Request};
use crate::settings::ReportBranding;
use crate::store::SqliteStore;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy)]
enum Target {
    Csv,
    PrintHtml,
    PageLayout,
}

fn write_output(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn generated_at() -> String {
    chrono::Local::now().format("%d/%m/%Y %H:%M").to_string()
}

fn table_for(report: &BuiltReport, branding: &ReportBranding) -> ReportTable {
    ReportTable::build(
        &report.title,
        &report.subtitle,
        report.kind,
        &report.spec,
        &report.aggregation,
        &branding.no_data_text,
    )
}

fn handle_export(state: &mut AppState, req: &Request, target: Target) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let name = match required_str(req, "report") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let params = req.params.get("params").cloned().unwrap_or_else(|| json!({}));
    let out_path = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);

    let report = match build_report(&SqliteStore::new(conn), &name, &params) {
        Ok(r) => r,
        Err(e) => return fail(req, e),
    };
    let branding = match ReportBranding::load(conn) {
        Ok(b) => b,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let table = table_for(&report, &branding);
    let stamp = generated_at();

    let (format, body) = match target {
        Target::Csv => ("csv", json!(to_csv(&table))),
        Target::PrintHtml => ("html", json!(to_print_html(&table, &branding, &stamp))),
        Target::PageLayout => ("pageLayout", json!(to_page_layout(&table, &branding, &stamp))),
    };

    let Some(path) = out_path else {
        return ok(
            &req.id,
            json!({
                "report": report.name,
                "format": format,
                "recordCount": report.aggregation.record_count,
                "content": body,
            }),
        );
    };

    let text = match &body {
        serde_json::Value::String(s) => s.clone(),
        other => match serde_json::to_string_pretty(other) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
        },
    };
    if let Err(e) = write_output(&path, &text) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": path.to_string_lossy() })),
        );
    }
    tracing::info!(report = %report.name, format, path = %path.to_string_lossy(), "report exported");
    ok(
        &req.id,
        json!({
            "report": report.name,
            "format": format,
            "recordCount": report.aggregation.record_count,
            "path": path.to_string_lossy(),
            "bytes": text.len(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exports.csv" => Some(handle_export(state, req, Target::Csv)),
        "exports.printHtml" => Some(handle_export(state, req, Target::PrintHtml)),
        "exports.pageLayout" => Some(handle_export(state, req, Target::PageLayout)),
        _ => None,
    }
}
