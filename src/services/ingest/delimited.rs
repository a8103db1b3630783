use csv::{ReaderBuilder, Trim};

use super::utils::unique_headers;
use crate::error::AppError;
use crate::models::{Cell, Row, Table};

/// Delimited-text reader. Header row required, ragged rows tolerated.
pub struct CsvTableParser {
    delimiter: u8,
}

impl Default for CsvTableParser {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvTableParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn parse(&self, data: &[u8]) -> Result<Table, AppError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .trim(Trim::All)
            .flexible(true)
            .from_reader(data);

        let header_record = reader
            .headers()
            .map_err(|e| AppError::ParseError(format!("Failed to read CSV headers: {}", e)))?
            .clone();

        if header_record.is_empty() || header_record.iter().all(str::is_empty) {
            return Err(AppError::ParseError("CSV file has no header row".to_string()));
        }

        let headers = unique_headers(header_record.iter());
        let width = headers.len();
        let mut rows = Vec::new();

        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                AppError::ParseError(format!("Failed to parse CSV row {}: {}", index + 1, e))
            })?;

            // Fields past the last header are dropped before the blank check,
            // so a row is kept only if it has a value under some header.
            let cells: Vec<Cell> = record.iter().take(width).map(Cell::from_raw).collect();
            if cells.iter().all(Cell::is_null) {
                continue;
            }

            rows.push(Row::new(cells));
        }

        tracing::debug!("Parsed CSV with {} columns and {} rows", headers.len(), rows.len());
        Ok(Table::new(headers, rows))
    }
}
