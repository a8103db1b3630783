use std::io::Cursor;
use bytes::Bytes;
use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};

use super::utils::unique_headers;
use crate::error::AppError;
use crate::models::{Cell, Row, Table};

/// Reads the first worksheet of an XLSX workbook into a table.
pub struct WorkbookParser;

impl WorkbookParser {
    pub fn parse(&self, file_data: Bytes) -> Result<Table, AppError> {
        let start = std::time::Instant::now();
        let cursor = Cursor::new(file_data);

        let mut workbook: Xlsx<_> = open_workbook_from_rs(cursor)
            .map_err(|e| {
                tracing::error!("Failed to open Excel file: {}", e);
                AppError::ParseError(format!("Failed to open Excel file: {}", e))
            })?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        tracing::info!("Found {} sheets: {:?}", sheet_names.len(), sheet_names);

        let sheet_name = sheet_names
            .first()
            .ok_or_else(|| AppError::ParseError("No sheets found in workbook".to_string()))?;

        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| AppError::ParseError(format!("Failed to read worksheet {}: {}", sheet_name, e)))?;

        let mut rows = range.rows();
        let header_row = rows
            .next()
            .ok_or_else(|| AppError::ParseError(format!("Worksheet {} is empty", sheet_name)))?;

        let header_names: Vec<String> = header_row.iter().map(|cell| cell.to_string()).collect();
        if header_names.iter().all(|name| name.trim().is_empty()) {
            return Err(AppError::ParseError(format!("Worksheet {} has no header row", sheet_name)));
        }
        let headers = unique_headers(header_names.iter().map(String::as_str));

        let width = headers.len();
        let rows: Vec<Row> = rows
            .map(|row| row_from_data(row, width))
            .filter(|row| !row.cells.iter().all(Cell::is_null))
            .collect();

        tracing::info!(
            "Worksheet {} read in {:?}: {} columns, {} rows",
            sheet_name,
            start.elapsed(),
            headers.len(),
            rows.len()
        );

        Ok(Table::new(headers, rows))
    }
}

/// Cells under the headers only; anything to the right is ignored.
pub fn row_from_data(row: &[Data], width: usize) -> Row {
    Row::new(row.iter().take(width).map(cell_from_data).collect())
}

pub fn cell_from_data(value: &Data) -> Cell {
    match value {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) if f.is_finite() => Cell::Number(*f),
        Data::Float(_) => Cell::Null,
        Data::String(s) => Cell::from_raw(s),
        other => Cell::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_mapping() {
        assert_eq!(cell_from_data(&Data::Int(3)), Cell::Number(3.0));
        assert_eq!(cell_from_data(&Data::Float(2.5)), Cell::Number(2.5));
        assert_eq!(cell_from_data(&Data::Float(f64::NAN)), Cell::Null);
        assert_eq!(cell_from_data(&Data::Empty), Cell::Null);
        assert_eq!(cell_from_data(&Data::String("12".to_string())), Cell::Number(12.0));
        assert_eq!(cell_from_data(&Data::String("east".to_string())), Cell::Text("east".to_string()));
        assert_eq!(cell_from_data(&Data::Bool(true)), Cell::Text("true".to_string()));
    }

    #[test]
    fn test_row_truncated_to_headers() {
        let row = row_from_data(&[Data::Empty, Data::Empty, Data::Int(5)], 2);
        assert_eq!(row.cells, vec![Cell::Null, Cell::Null]);
        assert!(row.cells.iter().all(Cell::is_null));
    }

    #[test]
    fn test_corrupt_workbook_is_a_parse_error() {
        let result = WorkbookParser.parse(Bytes::from_static(b"PK\x03\x04not really a zip"));
        assert!(matches!(result, Err(AppError::ParseError(_))));
    }
}
