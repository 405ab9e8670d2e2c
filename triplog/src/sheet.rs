//! Random-access cell reads over a workbook.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use tracing::{debug, warn};

use crate::errors::{Result, TriplogError};
use crate::record::CellValue;

/// Read-only view of one worksheet. Rows and columns are 1-based.
pub trait SheetSource {
    fn cell(&self, row: u32, column: u32) -> Result<CellValue>;
}

/// A worksheet loaded into memory through `calamine` (`.xlsx`, `.xlsm`, `.xls`, `.ods`).
pub struct WorkbookSheet {
    name: String,
    range: Range<Data>,
}

impl WorkbookSheet {
    /// Opens `path` and loads `sheet`, or the first worksheet when `None`.
    pub fn open(path: &Path, sheet: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(TriplogError::MissingSpreadsheet(path.to_path_buf()));
        }

        let mut workbook = open_workbook_auto(path)
            .map_err(|e| TriplogError::Spreadsheet(format!("{}: {e}", path.display())))?;

        let name = match sheet {
            Some(name) => name.to_string(),
            None => workbook.sheet_names().first().cloned().ok_or_else(|| {
                TriplogError::Spreadsheet(format!("{}: workbook has no sheets", path.display()))
            })?,
        };

        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| TriplogError::Spreadsheet(format!("sheet `{name}`: {e}")))?;

        debug!(
            sheet = %name,
            start = ?range.start(),
            end = ?range.end(),
            "Loaded worksheet"
        );

        Ok(Self { name, range })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SheetSource for WorkbookSheet {
    fn cell(&self, row: u32, column: u32) -> Result<CellValue> {
        if row == 0 || column == 0 {
            return Err(TriplogError::Spreadsheet(format!(
                "cell ({row}, {column}) is out of range: rows and columns start at 1"
            )));
        }

        let value = match self.range.get_value((row - 1, column - 1)) {
            Some(value) => value,
            None => return Ok(CellValue::Empty),
        };

        Ok(match value {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(_) | Data::DateTimeIso(_) => match value.as_datetime() {
                Some(dt) => CellValue::DateTime(dt),
                None => CellValue::Text(value.to_string()),
            },
            Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(e) => {
                warn!("Cell ({row}, {column}) holds an error value {e:?}; treating as empty");
                CellValue::Empty
            }
        })
    }
}

/// In-memory sheet for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemorySheet {
    cells: HashMap<(u32, u32), CellValue>,
}

impl MemorySheet {
    pub fn set(&mut self, row: u32, column: u32, value: impl Into<CellValue>) {
        self.cells.insert((row, column), value.into());
    }
}

impl SheetSource for MemorySheet {
    fn cell(&self, row: u32, column: u32) -> Result<CellValue> {
        Ok(self.cells.get(&(row, column)).cloned().unwrap_or_default())
    }
}
