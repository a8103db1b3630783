use serde::Deserialize;

use crate::error::AppError;
use crate::models::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "analysis.csv",
            ExportFormat::Json => "analysis.json",
        }
    }
}

pub fn export(table: &Table, format: ExportFormat) -> Result<String, AppError> {
    match format {
        ExportFormat::Csv => to_csv(table),
        ExportFormat::Json => to_json(table),
    }
}

/// Header line then one line per row. Nulls are empty fields; fields holding
/// a delimiter, quote or newline are quoted.
pub fn to_csv(table: &Table) -> Result<String, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());

    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row.cells.iter().map(|cell| cell.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV export: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(e.to_string()))
}

/// Pretty-printed array of header-ordered objects.
pub fn to_json(table: &Table) -> Result<String, AppError> {
    let records: Vec<_> = table.records().collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Row};
    use crate::services::ingest::CsvTableParser;

    fn sample() -> Table {
        Table::new(
            vec!["name".to_string(), "note".to_string(), "amount".to_string()],
            vec![
                Row::new(vec![
                    Cell::Text("Acme, Inc".to_string()),
                    Cell::Text("said \"hi\"".to_string()),
                    Cell::Number(12.5),
                ]),
                Row::new(vec![Cell::Text("Solo".to_string()), Cell::Null, Cell::Number(3.0)]),
            ],
        )
    }

    #[test]
    fn test_csv_quotes_only_when_needed() {
        let csv = to_csv(&sample()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "name,note,amount");
        assert_eq!(lines[1], r#""Acme, Inc","said ""hi""",12.5"#);
        assert_eq!(lines[2], "Solo,,3");
    }

    #[test]
    fn test_csv_reparses_to_same_shape() {
        let table = sample();
        let csv = to_csv(&table).unwrap();
        let reparsed = CsvTableParser::new().parse(csv.as_bytes()).unwrap();
        assert_eq!(reparsed.headers, table.headers);
        assert_eq!(reparsed.len(), table.len());
        assert_eq!(reparsed, table);
    }

    #[test]
    fn test_csv_reparse_keeps_row_count_with_overflow_fields() {
        let table = CsvTableParser::new().parse(b"a,b\n1,2\n,,5\n3,,9\n").unwrap();
        assert_eq!(table.len(), 2);
        let csv = to_csv(&table).unwrap();
        let reparsed = CsvTableParser::new().parse(csv.as_bytes()).unwrap();
        assert_eq!(reparsed.len(), table.len());
        assert_eq!(reparsed, table);
    }

    #[test]
    fn test_json_keeps_header_order() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[1]["note"], serde_json::Value::Null);
        assert_eq!(value[0]["amount"], 12.5);
        assert!(json.find("\"name\"").unwrap() < json.find("\"note\"").unwrap());
        assert!(json.contains('\n'));
    }

    #[test]
    fn test_empty_table() {
        let table = Table::new(vec!["a".to_string()], vec![]);
        assert_eq!(to_csv(&table).unwrap(), "a\n");
        assert_eq!(to_json(&table).unwrap(), "[]");
    }

    #[test]
    fn test_format_query_value() {
        let format: ExportFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, ExportFormat::Json);
        assert_eq!(ExportFormat::default(), ExportFormat::Csv);
    }
}
