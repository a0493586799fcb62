use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupSection {
    School,
    Reports,
    Search,
    Printer,
}

impl SetupSection {
    pub const ALL: [SetupSection; 4] = [Self::School, Self::Reports, Self::Search, Self::Printer];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "reports" => Some(Self::Reports),
            "search" => Some(Self::Search),
            "printer" => Some(Self::Printer),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::Reports => "reports",
            Self::Search => "search",
            Self::Printer => "printer",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::Reports => "setup.reports",
            Self::Search => "setup.search",
            Self::Printer => "setup.printer",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "name": "",
            "address": "",
            "phone": "",
            "affiliation": ""
        }),
        SetupSection::Reports => json!({
            "currencySymbol": "₹",
            "showGeneratedAt": true,
            "noDataText": "No data available"
        }),
        SetupSection::Search => json!({
            "debounceMs": 300,
            "minChars": 2,
            "maxResults": 20
        }),
        SetupSection::Printer => json!({
            "marginMm": 12,
            "fontScale": 100
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "name" | "affiliation" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "address" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 240)?));
                }
                "phone" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "currencySymbol" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 4)?));
                }
                "showGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "noDataText" => {
                    let s = parse_string_max(v, k, 80)?;
                    if s.is_empty() {
                        return Err("noDataText must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Search => match k.as_str() {
                "debounceMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 5000)?));
                }
                "minChars" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10)?));
                }
                "maxResults" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 200)?));
                }
                _ => return Err(format!("unknown search field: {}", k)),
            },
            SetupSection::Printer => match k.as_str() {
                "marginMm" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 30)?));
                }
                "fontScale" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 60, 160)?));
                }
                _ => return Err(format!("unknown printer field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values must not block the setup screen.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring saved settings");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

fn str_of(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string()
}

fn i64_of(v: &Value, key: &str, fallback: i64) -> i64 {
    v.get(key).and_then(|x| x.as_i64()).unwrap_or(fallback)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportBranding {
    pub school_name: String,
    pub address: String,
    pub phone: String,
    pub affiliation: String,
    pub currency_symbol: String,
    pub show_generated_at: bool,
    pub no_data_text: String,
    pub margin_mm: f64,
    pub font_scale: f64,
}

impl Default for ReportBranding {
    fn default() -> Self {
        Self::from_sections(
            &default_section(SetupSection::School),
            &default_section(SetupSection::Reports),
            &default_section(SetupSection::Printer),
        )
    }
}

impl ReportBranding {
    fn from_sections(school: &Value, reports: &Value, printer: &Value) -> Self {
        Self {
            school_name: str_of(school, "name"),
            address: str_of(school, "address"),
            phone: str_of(school, "phone"),
            affiliation: str_of(school, "affiliation"),
            currency_symbol: str_of(reports, "currencySymbol"),
            show_generated_at: reports
                .get("showGeneratedAt")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            no_data_text: str_of(reports, "noDataText"),
            margin_mm: i64_of(printer, "marginMm", 12) as f64,
            font_scale: i64_of(printer, "fontScale", 100) as f64 / 100.0,
        }
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self::from_sections(
            &load_section(conn, SetupSection::School)?,
            &load_section(conn, SetupSection::Reports)?,
            &load_section(conn, SetupSection::Printer)?,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSettings {
    pub debounce_ms: u64,
    pub min_chars: usize,
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self::from_section(&default_section(SetupSection::Search))
    }
}

impl SearchSettings {
    fn from_section(v: &Value) -> Self {
        Self {
            debounce_ms: i64_of(v, "debounceMs", 300).max(0) as u64,
            min_chars: i64_of(v, "minChars", 2).max(1) as usize,
            max_results: i64_of(v, "maxResults", 20).max(1) as usize,
        }
    }

    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        Ok(Self::from_section(&load_section(conn, SetupSection::Search)?))
    }
}
