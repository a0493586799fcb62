use crate::error::DeskError;
use crate::notice::Notice;
use crate::records::{text_field, RecordKind};
use crate::store::{DocumentStore, Filter};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// One level of a cascade and where its options come from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSpec {
    /// Selection key, also the field name used when this level filters its descendants.
    pub name: String,
    pub label: String,
    pub collection: String,
    /// Attribute read from `collection` to produce option values.
    pub field: String,
    pub label_field: Option<String>,
    /// Ancestors used as store filters; `None` filters on every ancestor.
    pub scope: Option<Vec<String>>,
}

impl LevelSpec {
    pub fn new(name: &str, label: &str, collection: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            collection: collection.to_string(),
            field: field.to_string(),
            label_field: None,
            scope: None,
        }
    }

    pub fn labelled_by(mut self, field: &str) -> Self {
        self.label_field = Some(field.to_string());
        self
    }

    pub fn scoped(mut self, ancestors: &[&str]) -> Self {
        self.scope = Some(ancestors.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Distinct option values for this level in first-occurrence order. Any empty
    /// ancestor short-circuits to an empty list without touching the store.
    pub fn fetch_options(
        &self,
        store: &dyn DocumentStore,
        ancestors: &[(String, String)],
    ) -> anyhow::Result<Vec<OptionItem>> {
        if ancestors.iter().any(|(_, v)| v.trim().is_empty()) {
            return Ok(Vec::new());
        }
        let filters: Vec<Filter> = ancestors
            .iter()
            .filter(|(name, _)| match &self.scope {
                Some(scope) => scope.iter().any(|s| s == name),
                None => true,
            })
            .map(|(name, value)| Filter::eq(name.as_str(), value.as_str()))
            .collect();

        let docs = store.query(&self.collection, &filters)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for d in docs {
            let value = text_field(&d.body, &[self.field.as_str()]);
            if value.is_empty() || !seen.insert(value.clone()) {
                continue;
            }
            let label = self
                .label_field
                .as_deref()
                .map(|f| text_field(&d.body, &[f]))
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| value.clone());
            out.push(OptionItem { value, label });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSource {
    pub collection: String,
    #[serde(skip)]
    pub kind: Option<RecordKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeSpec {
    pub name: String,
    pub levels: Vec<LevelSpec>,
    pub records: RecordSource,
}

impl CascadeSpec {
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "marksEntry" => Some(Self::marks_entry()),
            "assignments" => Some(Self::assignments()),
            "examSetup" => Some(Self::exam_setup()),
            "students" => Some(Self::students()),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["marksEntry", "assignments", "examSetup", "students"]
    }

    /// academicYear → term → standard → section → examType → subject, over created exams.
    pub fn marks_entry() -> Self {
        Self {
            name: "marksEntry".into(),
            levels: vec![
                LevelSpec::new("academicYear", "Academic Year", "academicYears", "year"),
                LevelSpec::new("term", "Term", "createdExamFlat", "term"),
                LevelSpec::new("standard", "Standard", "createdExamFlat", "standard"),
                LevelSpec::new("section", "Section", "createdExamFlat", "section"),
                LevelSpec::new("examType", "Exam", "createdExamFlat", "examType"),
                LevelSpec::new("subject", "Subject", "createdExamFlat", "subject"),
            ],
            records: RecordSource {
                collection: "marksflat".into(),
                kind: Some(RecordKind::Mark),
            },
        }
    }

    pub fn assignments() -> Self {
        Self {
            name: "assignments".into(),
            levels: vec![
                LevelSpec::new("academicYear", "Academic Year", "academicYears", "year"),
                LevelSpec::new("term", "Term", "createdExamFlat", "term").scoped(&["academicYear"]),
                LevelSpec::new("standard", "Standard", "students_flat", "standard")
                    .scoped(&["academicYear"]),
                LevelSpec::new("section", "Section", "students_flat", "section")
                    .scoped(&["academicYear", "standard"]),
                LevelSpec::new("subject", "Subject", "teachers_flat", "subject")
                    .scoped(&["academicYear", "standard", "section"]),
            ],
            records: RecordSource {
                collection: "studentAssignmentsFlat".into(),
                kind: Some(RecordKind::Assignment),
            },
        }
    }

    pub fn exam_setup() -> Self {
        Self {
            name: "examSetup".into(),
            levels: vec![
                LevelSpec::new("academicYear", "Academic Year", "academicYears", "year"),
                LevelSpec::new("term", "Term", "createdExamFlat", "term"),
                LevelSpec::new("standard", "Standard", "createdExamFlat", "standard"),
                LevelSpec::new("subject", "Subject", "createdExamFlat", "subject"),
            ],
            records: RecordSource {
                collection: "createdExamFlat".into(),
                kind: None,
            },
        }
    }

    pub fn students() -> Self {
        Self {
            name: "students".into(),
            levels: vec![
                LevelSpec::new("academicYear", "Academic Year", "academicYears", "year"),
                LevelSpec::new("standard", "Standard", "students_flat", "standard"),
                LevelSpec::new("section", "Section", "students_flat", "section"),
                LevelSpec::new("admissionNumber", "Student", "students_flat", "admissionNumber")
                    .labelled_by("studentName"),
            ],
            records: RecordSource {
                collection: "students_flat".into(),
                kind: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionItem {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelState {
    Empty,
    Loading,
    Populated(Vec<OptionItem>),
    Selected {
        options: Vec<OptionItem>,
        value: String,
    },
}

impl LevelState {
    fn options(&self) -> &[OptionItem] {
        match self {
            Self::Populated(options) | Self::Selected { options, .. } => options,
            Self::Empty | Self::Loading => &[],
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::Selected { value, .. } => value,
            _ => "",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Loading => "loading",
            Self::Populated(_) => "populated",
            Self::Selected { .. } => "selected",
        }
    }
}

/// Ticket for one option fetch. Only the latest ticket issued for a level may
/// write that level's options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub level: String,
    #[serde(skip)]
    pub index: usize,
    pub seq: u64,
    pub ancestors: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct LevelSlot {
    state: LevelState,
    latest: Option<u64>,
}

impl LevelSlot {
    fn empty() -> Self {
        Self {
            state: LevelState::Empty,
            latest: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSnapshot {
    pub name: String,
    pub label: String,
    pub state: &'static str,
    pub options: Vec<OptionItem>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeSnapshot {
    pub cascade: String,
    pub levels: Vec<LevelSnapshot>,
    pub complete: bool,
}

/// Superseded tickets remembered so a late completion reads as stale, not unknown.
const RETIRED_TICKETS: usize = 64;

pub struct Resolver {
    spec: CascadeSpec,
    slots: Vec<LevelSlot>,
    next_seq: u64,
    /// Live tickets only: at most one per level.
    issued: BTreeMap<u64, FetchRequest>,
    retired: VecDeque<u64>,
    notices: Vec<Notice>,
}

impl Resolver {
    pub fn new(spec: CascadeSpec) -> Self {
        let slots = spec.levels.iter().map(|_| LevelSlot::empty()).collect();
        Self {
            spec,
            slots,
            next_seq: 1,
            issued: BTreeMap::new(),
            retired: VecDeque::new(),
            notices: Vec::new(),
        }
    }

    pub fn spec(&self) -> &CascadeSpec {
        &self.spec
    }

    fn index_of(&self, level: &str) -> Result<usize, DeskError> {
        self.spec
            .levels
            .iter()
            .position(|l| l.name == level)
            .ok_or_else(|| DeskError::bad_params(format!("unknown level: {}", level)))
    }

    pub fn value(&self, level: &str) -> Option<&str> {
        let i = self.index_of(level).ok()?;
        Some(self.slots[i].state.value())
    }

    #[cfg(test)]
    pub fn options(&self, level: &str) -> Option<&[OptionItem]> {
        let i = self.index_of(level).ok()?;
        Some(self.slots[i].state.options())
    }

    #[cfg(test)]
    pub fn state(&self, level: &str) -> Option<&LevelState> {
        let i = self.index_of(level).ok()?;
        Some(&self.slots[i].state)
    }

    fn ancestors_through(&self, index: usize) -> Vec<(String, String)> {
        self.spec.levels[..=index]
            .iter()
            .zip(&self.slots)
            .map(|(l, s)| (l.name.clone(), s.state.value().to_string()))
            .collect()
    }

    fn retire(&mut self, seq: u64) {
        if self.issued.remove(&seq).is_none() {
            return;
        }
        self.retired.push_back(seq);
        if self.retired.len() > RETIRED_TICKETS {
            self.retired.pop_front();
        }
    }

    /// Retires every live ticket for levels at or below `from`.
    fn retire_from(&mut self, from: usize) {
        let stale: Vec<u64> = self
            .issued
            .values()
            .filter(|r| r.index >= from)
            .map(|r| r.seq)
            .collect();
        for seq in stale {
            self.retire(seq);
        }
    }

    fn issue(&mut self, index: usize, ancestors: Vec<(String, String)>) -> FetchRequest {
        if let Some(old) = self.slots[index].latest {
            self.retire(old);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = &mut self.slots[index];
        slot.latest = Some(seq);
        slot.state = LevelState::Loading;
        let req = FetchRequest {
            level: self.spec.levels[index].name.clone(),
            index,
            seq,
            ancestors,
        };
        self.issued.insert(seq, req.clone());
        req
    }

    /// Clears all levels and starts the root level's fetch.
    pub fn open(&mut self) -> Option<FetchRequest> {
        self.reset();
        if self.slots.is_empty() {
            return None;
        }
        Some(self.issue(0, Vec::new()))
    }

    pub fn reset(&mut self) {
        self.retire_from(0);
        for slot in &mut self.slots {
            *slot = LevelSlot::empty();
        }
    }

    /// Stores `value` for `level` and synchronously clears every descendant.
    /// Returns the child fetch to run when the chain above it is fully selected.
    pub fn set_selection(
        &mut self,
        level: &str,
        value: &str,
    ) -> Result<Option<FetchRequest>, DeskError> {
        let index = self.index_of(level)?;
        let value = value.trim();

        if !value.is_empty() {
            if let Some(missing) = self.spec.levels[..index]
                .iter()
                .zip(&self.slots)
                .find(|(_, s)| s.state.value().is_empty())
                .map(|(l, _)| l.name.clone())
            {
                return Err(DeskError::bad_params(format!("select {} first", missing)));
            }
            if !self.slots[index]
                .state
                .options()
                .iter()
                .any(|o| o.value == value)
            {
                return Err(DeskError::bad_params(format!(
                    "{} is not an option for {}",
                    value, level
                )));
            }
        }

        self.retire_from(index + 1);
        for slot in &mut self.slots[index + 1..] {
            *slot = LevelSlot::empty();
        }

        let options = self.slots[index].state.options().to_vec();
        self.slots[index].state = match (value.is_empty(), options.is_empty()) {
            (true, true) => LevelState::Empty,
            (true, false) => LevelState::Populated(options),
            (false, _) => LevelState::Selected {
                options,
                value: value.to_string(),
            },
        };

        if value.is_empty() || index + 1 >= self.slots.len() {
            return Ok(None);
        }
        let ancestors = self.ancestors_through(index);
        Ok(Some(self.issue(index + 1, ancestors)))
    }

    /// Looks up a ticket that is still waiting for its result.
    pub fn ticket(&self, seq: u64) -> Option<&FetchRequest> {
        self.issued.get(&seq)
    }

    /// Consumes a recent ticket that a later selection or reset made stale.
    pub fn take_superseded(&mut self, seq: u64) -> bool {
        match self.retired.iter().position(|s| *s == seq) {
            Some(i) => {
                self.retired.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn fetch_options(
        &self,
        store: &dyn DocumentStore,
        req: &FetchRequest,
    ) -> anyhow::Result<Vec<OptionItem>> {
        self.spec.levels[req.index].fetch_options(store, &req.ancestors)
    }

    /// Applies a fetch result if `req` is still the latest ticket for its level.
    /// Failures reset the level and queue a notice instead of propagating.
    pub fn apply_fetch(&mut self, req: &FetchRequest, result: anyhow::Result<Vec<OptionItem>>) -> bool {
        self.issued.remove(&req.seq);
        let Some(slot) = self.slots.get(req.index) else {
            return false;
        };
        let current_ancestors: Vec<(String, String)> = if req.index == 0 {
            Vec::new()
        } else {
            self.ancestors_through(req.index - 1)
        };
        if slot.latest != Some(req.seq) || current_ancestors != req.ancestors {
            tracing::debug!(
                cascade = %self.spec.name,
                level = %req.level,
                seq = req.seq,
                "discarding stale option fetch"
            );
            return false;
        }

        let label = self.spec.levels[req.index].label.clone();
        let slot = &mut self.slots[req.index];
        slot.latest = None;
        match result {
            Ok(options) if options.is_empty() => slot.state = LevelState::Empty,
            Ok(options) => slot.state = LevelState::Populated(options),
            Err(e) => {
                tracing::warn!(cascade = %self.spec.name, level = %req.level, error = %e, "option fetch failed");
                slot.state = LevelState::Empty;
                self.notices
                    .push(Notice::error(format!("Could not load {}: {}", label, e)));
            }
        }
        true
    }

    /// Runs a fetch against `store` and applies it immediately.
    pub fn resolve(&mut self, store: &dyn DocumentStore, req: &FetchRequest) -> bool {
        let result = self.fetch_options(store, req);
        self.apply_fetch(req, result)
    }

    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty()
            && self
                .slots
                .iter()
                .all(|s| matches!(s.state, LevelState::Selected { .. }))
    }

    /// Equality filters for the cascade's flat records, one per selected level.
    pub fn record_filters(&self) -> Vec<Filter> {
        self.spec
            .levels
            .iter()
            .zip(&self.slots)
            .filter(|(_, s)| !s.state.value().is_empty())
            .map(|(l, s)| Filter::eq(l.name.as_str(), s.state.value()))
            .collect()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> CascadeSnapshot {
        CascadeSnapshot {
            cascade: self.spec.name.clone(),
            levels: self
                .spec
                .levels
                .iter()
                .zip(&self.slots)
                .map(|(l, s)| LevelSnapshot {
                    name: l.name.clone(),
                    label: l.label.clone(),
                    state: s.state.tag(),
                    options: s.state.options().to_vec(),
                    value: s.state.value().to_string(),
                })
                .collect(),
            complete: self.is_complete(),
        }
    }
}
