use anyhow::anyhow;
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Best-effort numeric read. Anything that is not a finite number or a numeric
/// string reads as 0; a partial report is preferred over a blocked one.
pub fn coerce_number(v: &Value) -> f64 {
    let n = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse::<f64>().unwrap_or(0.0)
        }
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn first_present<'a>(body: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| body.get(*n))
        .find(|v| !v.is_null())
}

pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub fn text_field(body: &Value, names: &[&str]) -> String {
    first_present(body, names).map(value_text).unwrap_or_default()
}

pub fn number_field(body: &Value, names: &[&str]) -> f64 {
    first_present(body, names).map(coerce_number).unwrap_or(0.0)
}

pub fn parse_date(v: &Value) -> Option<NaiveDate> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|d| d.date_naive()),
        Value::String(s) => parse_date_str(s),
        _ => None,
    }
}

pub fn parse_date_str(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d/%m/%Y") {
        return Some(d);
    }
    // Naive timestamps such as 2024-01-01T09:30:00.
    s.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

/// `DD/MM/YYYY`, or the raw text when it is not a recognizable date.
pub fn display_date(raw: &str) -> String {
    match parse_date_str(raw) {
        Some(d) => d.format("%d/%m/%Y").to_string(),
        None => raw.trim().to_string(),
    }
}

/// `YYYY-MM-DD` for range comparisons.
pub fn date_sort_key(raw: &str) -> Option<String> {
    parse_date_str(raw).map(|d| d.format("%Y-%m-%d").to_string())
}

fn date_text(body: &Value, names: &[&str]) -> String {
    match first_present(body, names) {
        Some(v @ Value::Number(_)) => parse_date(v)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => text_field(body, names),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecord {
    pub bill_number: String,
    pub date: String,
    pub admission_number: String,
    pub student_name: String,
    pub standard: String,
    pub section: String,
    pub fee_head: String,
    pub amount: f64,
    pub concession: f64,
    pub payment_mode: String,
}

impl FeeRecord {
    pub fn from_value(body: &Value) -> Self {
        Self {
            bill_number: text_field(body, &["billNumber", "billNo", "receiptNo"]),
            date: date_text(body, &["date", "paymentDate", "createdAt", "timestamp"]),
            admission_number: text_field(body, &["admissionNumber", "admissionNo"]),
            student_name: text_field(body, &["studentName", "name"]),
            standard: text_field(body, &["standard", "className"]),
            section: text_field(body, &["section"]),
            fee_head: text_field(body, &["feeHead", "feeHeadName", "head"]),
            amount: number_field(body, &["amount", "paidAmount"]),
            concession: number_field(body, &["concession", "concessionAmount"]),
            payment_mode: text_field(body, &["paymentMode", "mode"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRecord {
    pub academic_year: String,
    pub term: String,
    pub standard: String,
    pub section: String,
    pub exam_type: String,
    pub subject: String,
    pub admission_number: String,
    pub student_name: String,
    pub marks: f64,
    pub max_marks: f64,
}

impl MarkRecord {
    pub fn from_value(body: &Value) -> Self {
        Self {
            academic_year: text_field(body, &["academicYear"]),
            term: text_field(body, &["term"]),
            standard: text_field(body, &["standard"]),
            section: text_field(body, &["section"]),
            exam_type: text_field(body, &["examType", "exam"]),
            subject: text_field(body, &["subject", "subjectName"]),
            admission_number: text_field(body, &["admissionNumber", "admissionNo"]),
            student_name: text_field(body, &["studentName", "name"]),
            marks: number_field(body, &["marks", "marksObtained"]),
            max_marks: number_field(body, &["maxMarks", "totalMarks"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub academic_year: String,
    pub term: String,
    pub standard: String,
    pub section: String,
    pub subject: String,
    pub assignment_id: String,
    pub title: String,
    pub admission_number: String,
    pub student_name: String,
    pub due_date: String,
    pub status: String,
    pub marks: f64,
    pub max_marks: f64,
}

impl AssignmentRecord {
    pub fn from_value(body: &Value) -> Self {
        Self {
            academic_year: text_field(body, &["academicYear"]),
            term: text_field(body, &["term"]),
            standard: text_field(body, &["standard"]),
            section: text_field(body, &["section"]),
            subject: text_field(body, &["subject", "subjectName"]),
            assignment_id: text_field(body, &["assignmentId", "id"]),
            title: text_field(body, &["title", "assignmentTitle"]),
            admission_number: text_field(body, &["admissionNumber", "admissionNo"]),
            student_name: text_field(body, &["studentName", "name"]),
            due_date: date_text(body, &["dueDate"]),
            status: text_field(body, &["status"]),
            marks: number_field(body, &["marks", "marksObtained"]),
            max_marks: number_field(body, &["maxMarks", "totalMarks"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FlatRecord {
    Fee(FeeRecord),
    Mark(MarkRecord),
    Assignment(AssignmentRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Fee,
    Mark,
    Assignment,
}

impl RecordKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fee" => Some(Self::Fee),
            "mark" => Some(Self::Mark),
            "assignment" => Some(Self::Assignment),
            _ => None,
        }
    }

    pub fn normalize(self, body: &Value) -> FlatRecord {
        match self {
            Self::Fee => FlatRecord::Fee(FeeRecord::from_value(body)),
            Self::Mark => FlatRecord::Mark(MarkRecord::from_value(body)),
            Self::Assignment => FlatRecord::Assignment(AssignmentRecord::from_value(body)),
        }
    }
}

/// Unwraps a backend reply: `{success, data, message?}`, a raw array, or an
/// object carrying `error`.
pub fn parse_backend_payload(payload: &Value) -> anyhow::Result<Vec<Value>> {
    match payload {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(obj) => {
            if let Some(e) = obj.get("error").filter(|e| !e.is_null()) {
                let msg = e
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| e.get("message").and_then(|m| m.as_str()).map(str::to_string))
                    .unwrap_or_else(|| e.to_string());
                return Err(anyhow!("backend error: {}", msg));
            }
            if obj.get("success").and_then(|v| v.as_bool()) == Some(false) {
                let msg = obj
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("request was not successful");
                return Err(anyhow!("backend error: {}", msg));
            }
            match obj.get("data") {
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(_) => Err(anyhow!("backend data must be an array")),
            }
        }
        _ => Err(anyhow!("unrecognized backend payload")),
    }
}

pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkEntry {
    pub admission_number: String,
    pub student_name: String,
    pub marks: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkSave {
    pub academic_year: String,
    pub term: String,
    pub standard: String,
    pub section: String,
    pub exam_type: String,
    pub subject: String,
    pub max_marks: f64,
    pub entries: Vec<MarkEntry>,
}

fn required_text(params: &Value, key: &str, errors: &mut FieldErrors) -> String {
    let v = text_field(params, &[key]);
    if v.is_empty() {
        errors.insert(key.to_string(), "required".to_string());
    }
    v
}

/// Number typed by the user: absent/blank is `None`, anything else must parse.
fn optional_input_number(v: Option<&Value>) -> Result<Option<f64>, ()> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().filter(|x| x.is_finite()).map(Some).ok_or(()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

pub fn validate_mark_save(params: &Value) -> Result<MarkSave, FieldErrors> {
    let mut errors = FieldErrors::new();
    let academic_year = required_text(params, "academicYear", &mut errors);
    let term = required_text(params, "term", &mut errors);
    let standard = required_text(params, "standard", &mut errors);
    let section = required_text(params, "section", &mut errors);
    let exam_type = required_text(params, "examType", &mut errors);
    let subject = required_text(params, "subject", &mut errors);

    let max_marks = match optional_input_number(params.get("maxMarks")) {
        Ok(Some(v)) if v > 0.0 => v,
        Ok(_) => {
            errors.insert("maxMarks".into(), "must be greater than 0".into());
            0.0
        }
        Err(()) => {
            errors.insert("maxMarks".into(), "must be a number".into());
            0.0
        }
    };

    let mut entries = Vec::new();
    match params.get("entries").and_then(|v| v.as_array()) {
        None => {
            errors.insert("entries".into(), "required".into());
        }
        Some(items) if items.is_empty() => {
            errors.insert("entries".into(), "must not be empty".into());
        }
        Some(items) => {
            for (i, item) in items.iter().enumerate() {
                let admission_number = text_field(item, &["admissionNumber"]);
                if admission_number.is_empty() {
                    errors.insert(format!("entries[{i}].admissionNumber"), "required".into());
                }
                let marks = match optional_input_number(item.get("marks")) {
                    Ok(Some(m)) if m < 0.0 || (max_marks > 0.0 && m > max_marks) => {
                        errors.insert(
                            format!("entries[{i}].marks"),
                            format!("must be between 0 and {}", max_marks),
                        );
                        None
                    }
                    Ok(m) => m,
                    Err(()) => {
                        errors.insert(format!("entries[{i}].marks"), "must be a number".into());
                        None
                    }
                };
                entries.push(MarkEntry {
                    admission_number,
                    student_name: text_field(item, &["studentName", "name"]),
                    marks,
                });
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(MarkSave {
        academic_year,
        term,
        standard,
        section,
        exam_type,
        subject,
        max_marks,
        entries,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSave {
    pub academic_year: String,
    pub term: String,
    pub standard: String,
    pub section: String,
    pub subject: String,
    pub title: String,
    pub description: String,
    pub due_date: NaiveDate,
    pub max_marks: f64,
    pub admission_numbers: Vec<String>,
}

pub fn validate_assignment_save(params: &Value) -> Result<AssignmentSave, FieldErrors> {
    let mut errors = FieldErrors::new();
    let academic_year = required_text(params, "academicYear", &mut errors);
    let term = required_text(params, "term", &mut errors);
    let standard = required_text(params, "standard", &mut errors);
    let section = required_text(params, "section", &mut errors);
    let subject = required_text(params, "subject", &mut errors);
    let title = required_text(params, "title", &mut errors);
    if title.chars().count() > 200 {
        errors.insert("title".into(), "length must be <= 200".into());
    }

    let due_raw = text_field(params, &["dueDate"]);
    let due_date = if due_raw.is_empty() {
        errors.insert("dueDate".into(), "required".into());
        None
    } else {
        let parsed = parse_date_str(&due_raw);
        if parsed.is_none() {
            errors.insert("dueDate".into(), "must be a date".into());
        }
        parsed
    };

    let max_marks = match optional_input_number(params.get("maxMarks")) {
        Ok(Some(v)) if v >= 0.0 => v,
        Ok(None) => 0.0,
        _ => {
            errors.insert("maxMarks".into(), "must be a non-negative number".into());
            0.0
        }
    };

    let admission_numbers: Vec<String> = params
        .get("admissionNumbers")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(value_text)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if admission_numbers.is_empty() {
        errors.insert("admissionNumbers".into(), "select at least one student".into());
    }

    match (errors.is_empty(), due_date) {
        (true, Some(due_date)) => Ok(AssignmentSave {
            academic_year,
            term,
            standard,
            section,
            subject,
            title,
            description: text_field(params, &["description"]),
            due_date,
            max_marks,
            admission_numbers,
        }),
        _ => Err(errors),
    }
}
