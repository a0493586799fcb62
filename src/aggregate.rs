use crate::records::{date_sort_key, display_date, FlatRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupKey {
    Date,
    AdmissionNumber,
    BillNumber,
    FeeHead,
    Subject,
    Student,
    ExamType,
}

impl GroupKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "date" => Some(Self::Date),
            "admissionNumber" => Some(Self::AdmissionNumber),
            "billNumber" => Some(Self::BillNumber),
            "feeHead" => Some(Self::FeeHead),
            "subject" => Some(Self::Subject),
            "student" => Some(Self::Student),
            "examType" => Some(Self::ExamType),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Date => "Date",
            Self::AdmissionNumber => "Admission No",
            Self::BillNumber => "Bill No",
            Self::FeeHead => "Fee Head",
            Self::Subject => "Subject",
            Self::Student => "Student",
            Self::ExamType => "Exam",
        }
    }

    fn raw(self, r: &FlatRecord) -> &str {
        match (self, r) {
            (Self::Date, FlatRecord::Fee(f)) => &f.date,
            (Self::Date, FlatRecord::Assignment(a)) => &a.due_date,
            (Self::Date, FlatRecord::Mark(_)) => "",
            (Self::AdmissionNumber | Self::Student, FlatRecord::Fee(f)) => &f.admission_number,
            (Self::AdmissionNumber | Self::Student, FlatRecord::Mark(m)) => &m.admission_number,
            (Self::AdmissionNumber | Self::Student, FlatRecord::Assignment(a)) => {
                &a.admission_number
            }
            (Self::BillNumber, FlatRecord::Fee(f)) => &f.bill_number,
            (Self::FeeHead, FlatRecord::Fee(f)) => &f.fee_head,
            (Self::Subject, FlatRecord::Mark(m)) => &m.subject,
            (Self::Subject, FlatRecord::Assignment(a)) => &a.subject,
            (Self::ExamType, FlatRecord::Mark(m)) => &m.exam_type,
            (Self::BillNumber | Self::FeeHead, _) | (Self::Subject | Self::ExamType, FlatRecord::Fee(_)) => "",
            (Self::ExamType, FlatRecord::Assignment(_)) => "",
        }
    }

    /// Partition identity. Dates group by calendar day regardless of time of day.
    fn identity(self, r: &FlatRecord) -> String {
        let raw = self.raw(r);
        match self {
            Self::Date => date_sort_key(raw).unwrap_or_else(|| raw.trim().to_string()),
            _ => raw.trim().to_string(),
        }
    }

    fn display(self, r: &FlatRecord) -> String {
        let raw = self.raw(r);
        match self {
            Self::Date => display_date(raw),
            Self::Student => {
                let name = student_name(r);
                if name.is_empty() {
                    raw.to_string()
                } else {
                    format!("{} ({})", name, raw)
                }
            }
            _ => raw.to_string(),
        }
    }
}

fn student_name(r: &FlatRecord) -> &str {
    match r {
        FlatRecord::Fee(f) => &f.student_name,
        FlatRecord::Mark(m) => &m.student_name,
        FlatRecord::Assignment(a) => &a.student_name,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SumField {
    Amount,
    Concession,
    Marks,
    MaxMarks,
}

impl SumField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "amount" => Some(Self::Amount),
            "concession" => Some(Self::Concession),
            "marks" => Some(Self::Marks),
            "maxMarks" => Some(Self::MaxMarks),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Amount => "Amount",
            Self::Concession => "Concession",
            Self::Marks => "Marks",
            Self::MaxMarks => "Max Marks",
        }
    }

    pub fn value(self, r: &FlatRecord) -> f64 {
        match (self, r) {
            (Self::Amount, FlatRecord::Fee(f)) => f.amount,
            (Self::Concession, FlatRecord::Fee(f)) => f.concession,
            (Self::Marks, FlatRecord::Mark(m)) => m.marks,
            (Self::MaxMarks, FlatRecord::Mark(m)) => m.max_marks,
            (Self::Marks, FlatRecord::Assignment(a)) => a.marks,
            (Self::MaxMarks, FlatRecord::Assignment(a)) => a.max_marks,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpec {
    pub group_keys: Vec<GroupKey>,
    /// The first field is the primary amount carried by subtotal and total rows.
    pub sum_fields: Vec<SumField>,
    pub concession_field: Option<SumField>,
}

impl AggregateSpec {
    pub fn new(
        group_keys: Vec<GroupKey>,
        sum_fields: Vec<SumField>,
        concession_field: Option<SumField>,
    ) -> Result<Self, String> {
        if group_keys.is_empty() || group_keys.len() > 2 {
            return Err("groupBy must name one or two keys".into());
        }
        if sum_fields.is_empty() {
            return Err("sumFields must name at least one field".into());
        }
        Ok(Self {
            group_keys,
            sum_fields,
            concession_field,
        })
    }

    pub fn fee_collection() -> Self {
        Self {
            group_keys: vec![GroupKey::Date, GroupKey::AdmissionNumber],
            sum_fields: vec![SumField::Amount],
            concession_field: Some(SumField::Concession),
        }
    }

    pub fn bill_wise() -> Self {
        Self {
            group_keys: vec![GroupKey::Date, GroupKey::BillNumber],
            sum_fields: vec![SumField::Amount],
            concession_field: Some(SumField::Concession),
        }
    }

    pub fn fee_head_wise() -> Self {
        Self {
            group_keys: vec![GroupKey::FeeHead],
            sum_fields: vec![SumField::Amount],
            concession_field: Some(SumField::Concession),
        }
    }

    pub fn subject_student() -> Self {
        Self {
            group_keys: vec![GroupKey::Subject, GroupKey::Student],
            sum_fields: vec![SumField::Marks, SumField::MaxMarks],
            concession_field: None,
        }
    }

    fn primary(&self) -> SumField {
        self.sum_fields[0]
    }
}

pub type Totals = BTreeMap<SumField, f64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupedRow {
    Header {
        key: GroupKey,
        label: String,
    },
    Data {
        group: String,
        /// Rows in this inner group on the first row, 0 on the rows it spans.
        span: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        shared: Option<BTreeMap<String, String>>,
        record: FlatRecord,
        amount: f64,
        values: Totals,
    },
    Concession {
        group: String,
        amount: f64,
    },
    Subtotal {
        group: String,
        amount: f64,
        totals: Totals,
    },
    Total {
        amount: f64,
        totals: Totals,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub rows: Vec<GroupedRow>,
    pub grand_total: f64,
    pub grand_totals: Totals,
    /// Informational; never deducted from subtotals or the grand total.
    pub concession_total: f64,
    pub record_count: usize,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct Group<'a> {
    display: String,
    members: Vec<&'a FlatRecord>,
}

/// Insertion-ordered partition: groups appear in first-seen key order.
fn partition<'a, I>(records: I, key: GroupKey) -> Vec<Group<'a>>
where
    I: IntoIterator<Item = &'a FlatRecord>,
{
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for r in records {
        let id = key.identity(r);
        match index.get(&id) {
            Some(&i) => groups[i].members.push(r),
            None => {
                index.insert(id, groups.len());
                groups.push(Group {
                    display: key.display(r),
                    members: vec![r],
                });
            }
        }
    }
    groups
}

fn shared_fields(key: GroupKey, r: &FlatRecord) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut put = |name: &str, v: &str| {
        if !v.trim().is_empty() {
            out.insert(name.to_string(), v.trim().to_string());
        }
    };
    match (key, r) {
        (GroupKey::Date, _) => put("date", &key.display(r)),
        (GroupKey::AdmissionNumber | GroupKey::Student, FlatRecord::Fee(f)) => {
            put("admissionNumber", &f.admission_number);
            put("studentName", &f.student_name);
            put("standard", &f.standard);
            put("section", &f.section);
        }
        (GroupKey::AdmissionNumber | GroupKey::Student, FlatRecord::Mark(m)) => {
            put("admissionNumber", &m.admission_number);
            put("studentName", &m.student_name);
        }
        (GroupKey::AdmissionNumber | GroupKey::Student, FlatRecord::Assignment(a)) => {
            put("admissionNumber", &a.admission_number);
            put("studentName", &a.student_name);
        }
        (GroupKey::BillNumber, FlatRecord::Fee(f)) => {
            put("billNumber", &f.bill_number);
            put("admissionNumber", &f.admission_number);
            put("studentName", &f.student_name);
            put("paymentMode", &f.payment_mode);
        }
        (GroupKey::FeeHead, _) => put("feeHead", key.raw(r)),
        (GroupKey::Subject, _) => put("subject", key.raw(r)),
        (GroupKey::ExamType, _) => put("examType", key.raw(r)),
        (GroupKey::BillNumber, _) => {}
    }
    out
}

fn add_into(totals: &mut Totals, field: SumField, v: f64) {
    *totals.entry(field).or_insert(0.0) += v;
}

/// Groups flat records into render-ready rows with per-group subtotals and a
/// grand total. Pure: the same input always yields the same rows.
pub fn aggregate(records: &[FlatRecord], spec: &AggregateSpec) -> Aggregation {
    let mut rows = Vec::new();
    let mut grand_total = 0.0;
    let mut grand_totals = Totals::new();
    let mut concession_total = 0.0;

    if records.is_empty() {
        return Aggregation {
            rows,
            grand_total,
            grand_totals,
            concession_total,
            record_count: 0,
        };
    }

    let outer_key = spec.group_keys[0];
    let inner_key = spec.group_keys.get(1).copied();
    let primary = spec.primary();

    for outer in partition(records, outer_key) {
        rows.push(GroupedRow::Header {
            key: outer_key,
            label: outer.display.clone(),
        });

        let (inner_groups, span_key) = match inner_key {
            Some(k) => (partition(outer.members.iter().copied(), k), k),
            None => (
                vec![Group {
                    display: outer.display.clone(),
                    members: outer.members.clone(),
                }],
                outer_key,
            ),
        };

        for inner in inner_groups {
            let mut group_totals = Totals::new();
            for f in &spec.sum_fields {
                group_totals.insert(*f, 0.0);
            }
            let mut group_concession = 0.0;
            let span = inner.members.len();

            for (i, r) in inner.members.iter().enumerate() {
                let mut values = Totals::new();
                for f in &spec.sum_fields {
                    let v = f.value(r);
                    values.insert(*f, v);
                    add_into(&mut group_totals, *f, v);
                }
                if let Some(cf) = spec.concession_field {
                    group_concession += cf.value(r);
                }
                rows.push(GroupedRow::Data {
                    group: inner.display.clone(),
                    span: if i == 0 { span } else { 0 },
                    shared: (i == 0).then(|| shared_fields(span_key, r)),
                    record: (*r).clone(),
                    amount: primary.value(r),
                    values,
                });
            }

            if group_concession > 0.0 {
                rows.push(GroupedRow::Concession {
                    group: inner.display.clone(),
                    amount: -group_concession,
                });
                concession_total += group_concession;
            }

            let subtotal = group_totals.get(&primary).copied().unwrap_or(0.0);
            for (f, v) in &group_totals {
                add_into(&mut grand_totals, *f, *v);
            }
            grand_total += subtotal;
            rows.push(GroupedRow::Subtotal {
                group: inner.display,
                amount: subtotal,
                totals: group_totals,
            });
        }
    }

    rows.push(GroupedRow::Total {
        amount: grand_total,
        totals: grand_totals.clone(),
    });

    Aggregation {
        rows,
        grand_total,
        grand_totals,
        concession_total,
        record_count: records.len(),
    }
}
