//! Pure mappings from raw spreadsheet text to the strings the form expects.
//!
//! Nothing here fails: garbage in yields an empty or pass-through string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::record::{NormalizedRecord, Record, TimeParts};

/// Keeps digits and dots, then groups the integer part in threes.
///
/// `"12345.6"` → `"12,345.6"`, `"1,234 km"` → `"1,234"`, `"abc"` → `""`.
pub fn format_thousands(value: &str) -> String {
    let kept: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return String::new();
    }

    match kept.split_once('.') {
        Some((int_part, frac)) => format!("{}.{}", group_digits(int_part), frac),
        None => group_digits(&kept),
    }
}

fn group_digits(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    let digits = if trimmed.is_empty() { "0" } else { trimmed };

    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Splits free-form `HHMM`/`HMM`/`HH:MM` into zero-padded hour and minute.
///
/// Fewer than three characters after dropping colons yields `("", "")`.
pub fn split_time(value: &str) -> TimeParts {
    let compact: Vec<char> = value.trim().chars().filter(|c| *c != ':').collect();
    if compact.len() < 3 {
        return TimeParts::default();
    }

    let (hour, minute) = compact.split_at(compact.len() - 2);
    let hour: String = hour.iter().collect();
    TimeParts {
        hour: format!("{hour:0>2}"),
        minute: minute.iter().collect(),
    }
}

/// Alias → canonical label lookup. Unknown input passes through trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable {
    entries: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn lookup(&self, raw: &str) -> String {
        let key = raw.trim();
        match self.entries.get(key) {
            Some(canonical) => canonical.clone(),
            None => key.to_string(),
        }
    }

    /// Later entries win.
    pub fn extend(&mut self, other: &AliasTable) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Canonical labels that are themselves remapped would make lookups
    /// order-dependent; returns the first such label.
    pub fn non_idempotent_label(&self) -> Option<&str> {
        self.entries
            .values()
            .find(|canonical| {
                self.entries
                    .get(canonical.as_str())
                    .is_some_and(|again| again != *canonical)
            })
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn builtin_company() -> Self {
        Self::from_pairs([
            ("광주지사", HEAD_OFFICE),
            ("본사", HEAD_OFFICE),
            ("국민연금", "국민연금공단"),
            ("건보", "국민건강보험공단"),
            ("신보", "신용보증기금"),
            ("롯데손보", "롯데손해보험"),
            ("한화손보", "한화손해보험"),
        ])
    }

    pub fn builtin_work_kind() -> Self {
        Self::from_pairs([
            ("방문처리", "장애처리"),
            ("원격처리", "장애처리"),
            ("장비회수", "반납(회수)"),
            ("협업", "업무협의"),
        ])
    }

    pub fn builtin_endpoint() -> Self {
        Self::from_pairs([("본사", HEAD_OFFICE_ADDRESS)])
    }
}

/// Canonical label of the head office in the company field.
pub const HEAD_OFFICE: &str = "본사(회사)";
/// Street address the form expects when the endpoint is the head office.
pub const HEAD_OFFICE_ADDRESS: &str = "광주 서구 상일로 24번길 19";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    company: AliasTable,
    work_kind: AliasTable,
    endpoint: AliasTable,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(
            AliasTable::builtin_company(),
            AliasTable::builtin_work_kind(),
            AliasTable::builtin_endpoint(),
        )
    }
}

impl Normalizer {
    pub fn new(company: AliasTable, work_kind: AliasTable, endpoint: AliasTable) -> Self {
        Self {
            company,
            work_kind,
            endpoint,
        }
    }

    pub fn normalize_company(&self, raw: &str) -> String {
        self.company.lookup(raw)
    }

    pub fn normalize_work_kind(&self, raw: &str) -> String {
        self.work_kind.lookup(raw)
    }

    pub fn normalize_endpoint(&self, raw: &str) -> String {
        self.endpoint.lookup(raw)
    }

    pub fn normalize(&self, record: &Record) -> NormalizedRecord {
        NormalizedRecord {
            row: record.row,
            date: record.date.as_date_text(),
            company: self.normalize_company(&record.company.as_text()),
            endpoint: self.normalize_endpoint(&record.endpoint.as_text()),
            start_km: format_thousands(&record.start_km.as_text()),
            end_km: format_thousands(&record.end_km.as_text()),
            distance: record.distance.as_text(),
            work_kind: self.normalize_work_kind(&record.work_kind.as_text()),
            start: split_time(&record.start_time.as_time_text()),
            end: split_time(&record.end_time.as_time_text()),
            parking: record.parking.as_text(),
            toll: record.toll.as_text(),
        }
    }
}
