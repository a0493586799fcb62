//! Render targets for grouped reports. CSV, print HTML and the A4 page model
//! all consume the same [`ReportTable`], built once from an [`Aggregation`].

use crate::aggregate::{AggregateSpec, Aggregation, GroupedRow, SumField};
use crate::records::{display_date, FlatRecord, RecordKind};
use crate::settings::ReportBranding;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LineKind {
    Header,
    Data,
    Concession,
    Subtotal,
    Total,
    NoData,
}

impl LineKind {
    fn css_class(self) -> &'static str {
        match self {
            Self::Header => "row-header",
            Self::Data => "row-data",
            Self::Concession => "row-concession",
            Self::Subtotal => "row-subtotal",
            Self::Total => "row-total",
            Self::NoData => "row-no-data",
        }
    }

    fn is_summary(self) -> bool {
        matches!(self, Self::Concession | Self::Subtotal | Self::Total)
    }

    fn height_mm(self) -> f64 {
        match self {
            Self::Header | Self::Subtotal => 8.0,
            Self::Total => 9.0,
            Self::Data | Self::Concession | Self::NoData => 7.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    fn rendered(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => money(*n),
        }
    }
}

/// Two-decimal rendering; rounding happens here and nowhere earlier.
pub fn money(v: f64) -> String {
    let v = if v.abs() < 0.005 { 0.0 } else { v };
    format!("{:.2}", v)
}

/// `money` with the symbol after any sign: `-₹20.00`.
pub fn money_with(symbol: &str, v: f64) -> String {
    let plain = money(v);
    match plain.strip_prefix('-') {
        Some(rest) => format!("-{}{}", symbol, rest),
        None => format!("{}{}", symbol, plain),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableLine {
    pub kind: LineKind,
    /// Header and no-data lines carry a single cell spanning the table.
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTable {
    pub title: String,
    pub subtitle: String,
    pub columns: Vec<String>,
    pub numeric_from: usize,
    /// Fee amounts; marks and assignment totals are plain numbers.
    pub monetary: bool,
    pub lines: Vec<TableLine>,
}

fn detail_columns(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Fee => &["Bill No", "Fee Head", "Mode"],
        RecordKind::Mark => &["Exam", "Subject"],
        RecordKind::Assignment => &["Assignment", "Due Date", "Status"],
    }
}

fn detail_cells(r: &FlatRecord) -> Vec<Cell> {
    match r {
        FlatRecord::Fee(f) => vec![
            Cell::text(&f.bill_number),
            Cell::text(&f.fee_head),
            Cell::text(&f.payment_mode),
        ],
        FlatRecord::Mark(m) => vec![Cell::text(&m.exam_type), Cell::text(&m.subject)],
        FlatRecord::Assignment(a) => vec![
            Cell::text(&a.title),
            Cell::text(display_date(&a.due_date)),
            Cell::text(&a.status),
        ],
    }
}

fn totals_cells(spec: &AggregateSpec, pick: impl Fn(SumField) -> f64) -> Vec<Cell> {
    spec.sum_fields.iter().map(|f| Cell::Number(pick(*f))).collect()
}

impl ReportTable {
    pub fn build(
        title: &str,
        subtitle: &str,
        kind: RecordKind,
        spec: &AggregateSpec,
        agg: &Aggregation,
        no_data_text: &str,
    ) -> Self {
        let group_label = spec
            .group_keys
            .last()
            .map(|k| k.label())
            .unwrap_or("Group");
        let details = detail_columns(kind);
        let mut columns = vec![group_label.to_string()];
        columns.extend(details.iter().map(|s| s.to_string()));
        let numeric_from = columns.len();
        columns.extend(spec.sum_fields.iter().map(|f| f.label().to_string()));

        let blanks = || vec![Cell::text(""); details.len()];
        let mut lines = Vec::with_capacity(agg.rows.len().max(1));
        for row in &agg.rows {
            let line = match row {
                GroupedRow::Header { key, label } => TableLine {
                    kind: LineKind::Header,
                    cells: vec![Cell::text(format!("{}: {}", key.label(), label))],
                },
                GroupedRow::Data {
                    group,
                    span,
                    shared,
                    record,
                    values,
                    ..
                } => {
                    let first = if *span > 0 {
                        match shared.as_ref().and_then(|s| s.get("studentName")) {
                            Some(name) if !group.contains(name.as_str()) => {
                                format!("{} - {}", group, name)
                            }
                            _ => group.clone(),
                        }
                    } else {
                        String::new()
                    };
                    let mut cells = vec![Cell::Text(first)];
                    cells.extend(detail_cells(record));
                    cells.extend(totals_cells(spec, |f| {
                        values.get(&f).copied().unwrap_or(0.0)
                    }));
                    TableLine {
                        kind: LineKind::Data,
                        cells,
                    }
                }
                GroupedRow::Concession { amount, .. } => {
                    let mut cells = vec![Cell::text("Concession")];
                    cells.extend(blanks());
                    for (i, _) in spec.sum_fields.iter().enumerate() {
                        cells.push(if i == 0 {
                            Cell::Number(*amount)
                        } else {
                            Cell::text("")
                        });
                    }
                    TableLine {
                        kind: LineKind::Concession,
                        cells,
                    }
                }
                GroupedRow::Subtotal { totals, .. } => {
                    let mut cells = vec![Cell::text("Subtotal")];
                    cells.extend(blanks());
                    cells.extend(totals_cells(spec, |f| totals.get(&f).copied().unwrap_or(0.0)));
                    TableLine {
                        kind: LineKind::Subtotal,
                        cells,
                    }
                }
                GroupedRow::Total { totals, .. } => {
                    let mut cells = vec![Cell::text("Grand Total")];
                    cells.extend(blanks());
                    cells.extend(totals_cells(spec, |f| totals.get(&f).copied().unwrap_or(0.0)));
                    TableLine {
                        kind: LineKind::Total,
                        cells,
                    }
                }
            };
            lines.push(line);
        }
        if agg.is_empty() {
            lines.push(TableLine {
                kind: LineKind::NoData,
                cells: vec![Cell::text(no_data_text)],
            });
        }

        Self {
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            columns,
            numeric_from,
            monetary: kind == RecordKind::Fee,
            lines,
        }
    }

    /// Printed form of a cell. Summary amounts carry the currency symbol.
    fn display(&self, kind: LineKind, cell: &Cell, symbol: &str) -> String {
        match cell {
            Cell::Number(n) if self.monetary && kind.is_summary() => money_with(symbol, *n),
            _ => cell.rendered(),
        }
    }
}

fn csv_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn csv_cell(c: &Cell) -> String {
    match c {
        Cell::Text(s) => csv_quote(s),
        Cell::Number(n) => money(*n),
    }
}

pub fn to_csv(table: &ReportTable) -> String {
    let mut out = String::new();
    let header: Vec<String> = table.columns.iter().map(|c| csv_quote(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for line in &table.lines {
        let cells: Vec<String> = line.cells.iter().map(csv_cell).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

const PRINT_CSS: &str = "body{font-family:Arial,Helvetica,sans-serif;margin:0;color:#222}\
.brand{text-align:center;margin-bottom:8px}\
.brand h1{font-size:18px;margin:0}\
.brand p{font-size:11px;margin:2px 0}\
h2{font-size:14px;text-align:center;margin:6px 0}\
.subtitle{font-size:11px;text-align:center;margin-bottom:8px}\
table{width:100%;border-collapse:collapse;font-size:11px}\
th,td{border:1px solid #999;padding:3px 5px}\
th{background:#e8e8e8}\
td.num{text-align:right}\
tr.row-header td{background:#f3f3f3;font-weight:bold}\
tr.row-concession td{color:#b00020;font-style:italic}\
tr.row-subtotal td{font-weight:bold;background:#fafafa}\
tr.row-total td{font-weight:bold;background:#ddd;border-top:2px solid #333}\
tr.row-no-data td{text-align:center;color:#777}\
footer{font-size:10px;text-align:right;margin-top:8px}\
@media print{thead{display:table-header-group}tr{page-break-inside:avoid}}";

pub fn to_print_html(table: &ReportTable, branding: &ReportBranding, generated_at: &str) -> String {
    let cols = table.columns.len();
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title>", escape_html(&table.title)));
    html.push_str(&format!(
        "<style>@page{{size:A4 portrait;margin:{}mm}}{}</style></head><body>\n",
        branding.margin_mm, PRINT_CSS
    ));

    html.push_str("<div class=\"brand\">");
    if !branding.school_name.is_empty() {
        html.push_str(&format!("<h1>{}</h1>", escape_html(&branding.school_name)));
    }
    for line in [&branding.affiliation, &branding.address, &branding.phone] {
        if !line.is_empty() {
            html.push_str(&format!("<p>{}</p>", escape_html(line)));
        }
    }
    html.push_str("</div>\n");
    html.push_str(&format!("<h2>{}</h2>\n", escape_html(&table.title)));
    if !table.subtitle.is_empty() {
        html.push_str(&format!(
            "<div class=\"subtitle\">{}</div>\n",
            escape_html(&table.subtitle)
        ));
    }

    html.push_str("<table><thead><tr>");
    for c in &table.columns {
        html.push_str(&format!("<th>{}</th>", escape_html(c)));
    }
    html.push_str("</tr></thead><tbody>\n");
    for line in &table.lines {
        html.push_str(&format!("<tr class=\"{}\">", line.kind.css_class()));
        if matches!(line.kind, LineKind::Header | LineKind::NoData) {
            let text = line.cells.first().map(Cell::rendered).unwrap_or_default();
            html.push_str(&format!("<td colspan=\"{}\">{}</td>", cols, escape_html(&text)));
        } else {
            for c in &line.cells {
                match c {
                    Cell::Number(_) => html.push_str(&format!(
                        "<td class=\"num\">{}</td>",
                        escape_html(&table.display(line.kind, c, &branding.currency_symbol))
                    )),
                    Cell::Text(s) => html.push_str(&format!("<td>{}</td>", escape_html(s))),
                }
            }
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody></table>\n");
    if branding.show_generated_at {
        html.push_str(&format!(
            "<footer>Generated on {}</footer>\n",
            escape_html(generated_at)
        ));
    }
    html.push_str("<script>window.onload=function(){window.print();};</script>\n");
    html.push_str("</body></html>\n");
    html
}

pub const A4_WIDTH_MM: f64 = 210.0;
pub const A4_HEIGHT_MM: f64 = 297.0;
const BRAND_BLOCK_MM: f64 = 26.0;
const COLUMN_HEADER_MM: f64 = 8.0;
const FOOTER_MM: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Align {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnLayout {
    pub title: String,
    pub x_mm: f64,
    pub width_mm: f64,
    pub align: Align,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedLine {
    pub y_mm: f64,
    pub height_mm: f64,
    pub kind: LineKind,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayout {
    pub number: usize,
    pub brand_lines: Vec<String>,
    pub title: String,
    pub lines: Vec<PlacedLine>,
    pub footer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLayout {
    pub width_mm: f64,
    pub height_mm: f64,
    pub orientation: &'static str,
    pub margin_mm: f64,
    pub columns: Vec<ColumnLayout>,
    pub pages: Vec<PageLayout>,
}

fn column_layout(table: &ReportTable, left: f64, usable: f64) -> Vec<ColumnLayout> {
    // The group column gets double weight.
    let weights: Vec<f64> = (0..table.columns.len())
        .map(|i| if i == 0 { 2.0 } else { 1.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut x = left;
    table
        .columns
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(i, (title, w))| {
            let width = usable * w / total;
            let col = ColumnLayout {
                title: title.clone(),
                x_mm: x,
                width_mm: width,
                align: if i >= table.numeric_from {
                    Align::Right
                } else {
                    Align::Left
                },
            };
            x += width;
            col
        })
        .collect()
}

/// Lays the table out on A4 portrait pages for a PDF renderer. Every page
/// repeats the brand block and column header; rows never cross the footer.
pub fn to_page_layout(
    table: &ReportTable,
    branding: &ReportBranding,
    generated_at: &str,
) -> DocumentLayout {
    let margin = branding.margin_mm;
    let scale = if branding.font_scale > 0.0 {
        branding.font_scale
    } else {
        1.0
    };
    let usable_width = A4_WIDTH_MM - 2.0 * margin;
    let body_top = margin + BRAND_BLOCK_MM + COLUMN_HEADER_MM * scale;
    let body_bottom = A4_HEIGHT_MM - margin - FOOTER_MM;

    let brand_lines: Vec<String> = [
        &branding.school_name,
        &branding.affiliation,
        &branding.address,
        &branding.phone,
    ]
    .into_iter()
    .filter(|s| !s.is_empty())
    .cloned()
    .collect();

    let mut pages: Vec<Vec<PlacedLine>> = vec![Vec::new()];
    let mut y = body_top;
    for line in &table.lines {
        let h = line.kind.height_mm() * scale;
        let page_has_rows = pages.last().is_some_and(|p| !p.is_empty());
        if y + h > body_bottom && page_has_rows {
            pages.push(Vec::new());
            y = body_top;
        }
        if let Some(page) = pages.last_mut() {
            page.push(PlacedLine {
                y_mm: y,
                height_mm: h,
                kind: line.kind,
                cells: line
                    .cells
                    .iter()
                    .map(|c| table.display(line.kind, c, &branding.currency_symbol))
                    .collect(),
            });
        }
        y += h;
    }

    let page_count = pages.len();
    let pages = pages
        .into_iter()
        .enumerate()
        .map(|(i, lines)| {
            let mut footer = format!("Page {} of {}", i + 1, page_count);
            if branding.show_generated_at {
                footer = format!("Generated on {} | {}", generated_at, footer);
            }
            PageLayout {
                number: i + 1,
                brand_lines: brand_lines.clone(),
                title: table.title.clone(),
                lines,
                footer,
            }
        })
        .collect();

    DocumentLayout {
        width_mm: A4_WIDTH_MM,
        height_mm: A4_HEIGHT_MM,
        orientation: "portrait",
        margin_mm: margin,
        columns: column_layout(table, margin, usable_width),
        pages,
    }
}
