use crate::aggregate::{aggregate, AggregateSpec, Aggregation, GroupKey, SumField};
use crate::error::DeskError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, fail, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::records::{date_sort_key, display_date, FlatRecord, RecordKind};
use crate::store::{DocumentStore, Filter};
use serde_json::{json, Value};

/// A report after querying and aggregating; exports render the same value.
pub struct BuiltReport {
    pub name: String,
    pub title: String,
    pub subtitle: String,
    pub kind: RecordKind,
    pub spec: AggregateSpec,
    pub aggregation: Aggregation,
}

pub const REPORT_NAMES: [&str; 5] = [
    "feeCollection",
    "billWise",
    "feeHeadWise",
    "marks",
    "assignments",
];

fn required_param(params: &Value, key: &str) -> Result<String, DeskError> {
    optional_str(params, key).ok_or_else(|| DeskError::bad_params(format!("missing {}", key)))
}

fn required_date(params: &Value, key: &str) -> Result<String, DeskError> {
    let raw = required_param(params, key)?;
    date_sort_key(&raw).ok_or_else(|| {
        DeskError::bad_params(format!("{} is not a date", key))
            .with_details(json!({ "field": key, "value": raw }))
    })
}

fn parse_list<T>(
    params: &Value,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<Vec<T>>, DeskError> {
    let Some(v) = params.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(items) = v.as_array() else {
        return Err(DeskError::bad_params(format!("{} must be an array", key)));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(&parse)
                .ok_or_else(|| DeskError::bad_params(format!("unknown {} entry: {}", key, item)))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Preset grouping unless the caller overrides `groupBy` / `sumFields`.
fn spec_with_overrides(params: &Value, preset: AggregateSpec) -> Result<AggregateSpec, DeskError> {
    let keys = parse_list(params, "groupBy", GroupKey::parse)?;
    let fields = parse_list(params, "sumFields", SumField::parse)?;
    if keys.is_none() && fields.is_none() {
        return Ok(preset);
    }
    AggregateSpec::new(
        keys.unwrap_or(preset.group_keys),
        fields.unwrap_or(preset.sum_fields),
        preset.concession_field,
    )
    .map_err(DeskError::bad_params)
}

fn load_records(
    store: &dyn DocumentStore,
    collection: &str,
    filters: &[Filter],
    kind: RecordKind,
) -> Result<Vec<FlatRecord>, DeskError> {
    let docs = store.query(collection, filters).map_err(DeskError::db_query)?;
    Ok(docs.iter().map(|d| kind.normalize(&d.body)).collect())
}

fn equality_filters(params: &Value, keys: &[&str]) -> Vec<Filter> {
    keys.iter()
        .filter_map(|k| optional_str(params, k).map(|v| Filter::eq(*k, v)))
        .collect()
}

fn fee_report(
    store: &dyn DocumentStore,
    name: &str,
    params: &Value,
) -> Result<BuiltReport, DeskError> {
    let from = required_date(params, "fromDate")?;
    let to = required_date(params, "toDate")?;
    if from > to {
        return Err(DeskError::bad_params("fromDate must not be after toDate"));
    }
    let (title, preset) = match name {
        "feeCollection" => ("Fee Collection Report", AggregateSpec::fee_collection()),
        "billWise" => ("Bill-wise Collection Report", AggregateSpec::bill_wise()),
        _ => ("Fee Head-wise Collection Report", AggregateSpec::fee_head_wise()),
    };
    let spec = spec_with_overrides(params, preset)?;

    let filters = equality_filters(params, &["academicYear", "schoolId"]);
    let all = load_records(store, "feeCollectionsFlat", &filters, RecordKind::Fee)?;
    let total = all.len();
    let records: Vec<FlatRecord> = all
        .into_iter()
        .filter(|r| match r {
            FlatRecord::Fee(f) => date_sort_key(&f.date)
                .map(|d| d >= from && d <= to)
                .unwrap_or(false),
            _ => false,
        })
        .collect();
    if records.len() < total {
        tracing::debug!(
            report = name,
            kept = records.len(),
            total,
            "fee records outside the date range dropped"
        );
    }

    Ok(BuiltReport {
        name: name.to_string(),
        title: title.to_string(),
        subtitle: format!("From {} to {}", display_date(&from), display_date(&to)),
        kind: RecordKind::Fee,
        aggregation: aggregate(&records, &spec),
        spec,
    })
}

fn subtitle_of(parts: &[Option<String>]) -> String {
    parts
        .iter()
        .flatten()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn marks_report(store: &dyn DocumentStore, params: &Value) -> Result<BuiltReport, DeskError> {
    let year = required_param(params, "academicYear")?;
    let term = required_param(params, "term")?;
    let standard = required_param(params, "standard")?;
    let exam = required_param(params, "examType")?;
    let section = optional_str(params, "section");
    let spec = spec_with_overrides(params, AggregateSpec::subject_student())?;

    let mut filters = vec![
        Filter::eq("academicYear", year.as_str()),
        Filter::eq("term", term.as_str()),
        Filter::eq("standard", standard.as_str()),
        Filter::eq("examType", exam.as_str()),
    ];
    filters.extend(equality_filters(params, &["section"]));
    let records = load_records(store, "marksflat", &filters, RecordKind::Mark)?;

    let class = match &section {
        Some(s) => format!("Std {} {}", standard, s),
        None => format!("Std {}", standard),
    };
    Ok(BuiltReport {
        name: "marks".to_string(),
        title: "Marks Report".to_string(),
        subtitle: subtitle_of(&[Some(year), Some(term), Some(class), Some(exam)]),
        kind: RecordKind::Mark,
        aggregation: aggregate(&records, &spec),
        spec,
    })
}

fn assignments_report(store: &dyn DocumentStore, params: &Value) -> Result<BuiltReport, DeskError> {
    let year = required_param(params, "academicYear")?;
    let term = required_param(params, "term")?;
    let standard = required_param(params, "standard")?;
    let spec = spec_with_overrides(params, AggregateSpec::subject_student())?;

    let mut filters = vec![
        Filter::eq("academicYear", year.as_str()),
        Filter::eq("term", term.as_str()),
        Filter::eq("standard", standard.as_str()),
    ];
    filters.extend(equality_filters(params, &["section", "subject"]));
    let records = load_records(store, "studentAssignmentsFlat", &filters, RecordKind::Assignment)?;

    Ok(BuiltReport {
        name: "assignments".to_string(),
        title: "Assignment Report".to_string(),
        subtitle: subtitle_of(&[
            Some(year),
            Some(term),
            Some(format!("Std {}", standard)),
            optional_str(params, "section"),
            optional_str(params, "subject"),
        ]),
        kind: RecordKind::Assignment,
        aggregation: aggregate(&records, &spec),
        spec,
    })
}

pub fn build_report(
    store: &dyn DocumentStore,
    name: &str,
    params: &Value,
) -> Result<BuiltReport, DeskError> {
    match name {
        "feeCollection" | "billWise" | "feeHeadWise" => fee_report(store, name, params),
        "marks" => marks_report(store, params),
        "assignments" => assignments_report(store, params),
        _ => Err(DeskError::bad_params(format!("unknown report: {}", name))
            .with_details(json!({ "known": REPORT_NAMES }))),
    }
}

fn report_result(r: &BuiltReport) -> Value {
    json!({
        "report": r.name,
        "title": r.title,
        "subtitle": r.subtitle,
        "groupBy": r.spec.group_keys,
        "sumFields": r.spec.sum_fields,
        "rows": r.aggregation.rows,
        "grandTotal": r.aggregation.grand_total,
        "grandTotals": r.aggregation.grand_totals,
        "concessionTotal": r.aggregation.concession_total,
        "recordCount": r.aggregation.record_count,
    })
}

fn handle_report(state: &mut AppState, req: &Request, name: &str) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match build_report(&crate::store::SqliteStore::new(conn), name, &req.params) {
        Ok(r) => ok(&req.id, report_result(&r)),
        Err(e) => fail(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let name = req.method.strip_prefix("reports.")?;
    if !REPORT_NAMES.contains(&name) {
        return None;
    }
    Some(handle_report(state, req, name))
}
