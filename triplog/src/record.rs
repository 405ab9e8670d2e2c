use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::sheet::SheetSource;

/// A single scalar read from the workbook.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Empty cells and whitespace-only text both count as "no data".
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Date cells render as `YYYY-MM-DD`, the datepicker's input format.
    pub fn as_date_text(&self) -> String {
        match self {
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d").to_string(),
            other => other.as_text(),
        }
    }

    /// Time-formatted cells render as `HHMM` so they split like typed times.
    pub fn as_time_text(&self) -> String {
        match self {
            CellValue::DateTime(dt) => dt.format("%H%M").to_string(),
            other => other.as_text(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

/// 1-based column of every field in the trip-log template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnLayout {
    pub date: u32,
    pub start_km: u32,
    /// Sentinel: an empty company cell ends the run
    pub company: u32,
    pub endpoint: u32,
    pub end_km: u32,
    pub distance: u32,
    pub work_kind: u32,
    pub parking: u32,
    pub toll: u32,
    pub start_time: u32,
    pub end_time: u32,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            date: 1,
            start_km: 4,
            company: 6,
            endpoint: 7,
            end_km: 8,
            distance: 10,
            work_kind: 11,
            parking: 15,
            toll: 16,
            start_time: 17,
            end_time: 27,
        }
    }
}

impl ColumnLayout {
    pub fn validate(&self) -> std::result::Result<(), String> {
        let columns = [
            ("date", self.date),
            ("start_km", self.start_km),
            ("company", self.company),
            ("endpoint", self.endpoint),
            ("end_km", self.end_km),
            ("distance", self.distance),
            ("work_kind", self.work_kind),
            ("parking", self.parking),
            ("toll", self.toll),
            ("start_time", self.start_time),
            ("end_time", self.end_time),
        ];
        match columns.iter().find(|(_, col)| *col == 0) {
            Some((name, _)) => Err(format!("column `{name}` must be 1 or greater")),
            None => Ok(()),
        }
    }
}

/// One trip as it appears in the workbook.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub row: u32,
    pub date: CellValue,
    pub company: CellValue,
    pub endpoint: CellValue,
    pub start_km: CellValue,
    pub end_km: CellValue,
    pub distance: CellValue,
    pub work_kind: CellValue,
    pub start_time: CellValue,
    pub end_time: CellValue,
    pub parking: CellValue,
    pub toll: CellValue,
}

impl Record {
    /// Reads `row`, or `None` when its sentinel cell is blank.
    pub fn read(
        sheet: &dyn SheetSource,
        row: u32,
        layout: &ColumnLayout,
    ) -> Result<Option<Record>> {
        let company = sheet.cell(row, layout.company)?;
        if company.is_blank() {
            return Ok(None);
        }

        Ok(Some(Record {
            row,
            date: sheet.cell(row, layout.date)?,
            company,
            endpoint: sheet.cell(row, layout.endpoint)?,
            start_km: sheet.cell(row, layout.start_km)?,
            end_km: sheet.cell(row, layout.end_km)?,
            distance: sheet.cell(row, layout.distance)?,
            work_kind: sheet.cell(row, layout.work_kind)?,
            start_time: sheet.cell(row, layout.start_time)?,
            end_time: sheet.cell(row, layout.end_time)?,
            parking: sheet.cell(row, layout.parking)?,
            toll: sheet.cell(row, layout.toll)?,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeParts {
    pub hour: String,
    pub minute: String,
}

impl TimeParts {
    pub fn is_empty(&self) -> bool {
        self.hour.is_empty() && self.minute.is_empty()
    }
}

/// Form-ready strings for one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedRecord {
    pub row: u32,
    pub date: String,
    pub company: String,
    pub endpoint: String,
    pub start_km: String,
    pub end_km: String,
    pub distance: String,
    pub work_kind: String,
    pub start: TimeParts,
    pub end: TimeParts,
    pub parking: String,
    pub toll: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::MemorySheet;
    use chrono::NaiveDate;

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(CellValue::Number(1234.0).as_text(), "1234");
        assert_eq!(CellValue::Number(12.5).as_text(), "12.5");
        assert_eq!(CellValue::Empty.as_text(), "");
    }

    #[test]
    fn datetime_renders_per_use() {
        let dt = NaiveDate::from_ymd_opt(2025, 8, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let cell = CellValue::DateTime(dt);
        assert_eq!(cell.as_date_text(), "2025-08-01");
        assert_eq!(cell.as_time_text(), "0830");
    }

    #[test]
    fn blank_sentinel_yields_none() {
        let layout = ColumnLayout::default();
        let mut sheet = MemorySheet::default();
        sheet.set(9, layout.company, "   ");
        sheet.set(9, layout.date, "2025-08-01");
        assert_eq!(Record::read(&sheet, 9, &layout).unwrap(), None);
    }

    #[test]
    fn read_picks_configured_columns() {
        let layout = ColumnLayout::default();
        let mut sheet = MemorySheet::default();
        sheet.set(3, layout.company, "건보");
        sheet.set(3, layout.toll, 1800.0);
        let record = Record::read(&sheet, 3, &layout).unwrap().unwrap();
        assert_eq!(record.row, 3);
        assert_eq!(record.company, CellValue::Text("건보".into()));
        assert_eq!(record.toll, CellValue::Number(1800.0));
        assert_eq!(record.parking, CellValue::Empty);
    }

    #[test]
    fn zero_column_is_rejected() {
        let layout = ColumnLayout {
            toll: 0,
            ..ColumnLayout::default()
        };
        assert!(layout.validate().unwrap_err().contains("toll"));
    }
}
