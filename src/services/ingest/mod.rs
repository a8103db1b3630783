pub mod delimited;
pub mod utils;
pub mod workbook;

use bytes::Bytes;

use crate::error::AppError;
use crate::models::Table;

pub use delimited::CsvTableParser;
pub use workbook::WorkbookParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Xlsx,
}

impl UploadFormat {
    pub fn sniff(data: &[u8]) -> Self {
        if utils::looks_like_xlsx(data) {
            UploadFormat::Xlsx
        } else {
            UploadFormat::Csv
        }
    }
}

/// Turns an uploaded payload into a table. Either the whole file parses or
/// nothing is accepted.
pub fn parse_upload(file_data: Bytes) -> Result<Table, AppError> {
    let start = std::time::Instant::now();
    if file_data.is_empty() {
        return Err(AppError::InvalidInput("No file provided".to_string()));
    }

    let format = UploadFormat::sniff(&file_data);
    tracing::info!("Parsing {:?} upload, size: {}KB", format, file_data.len() / 1024);

    let table = match format {
        UploadFormat::Xlsx => WorkbookParser.parse(file_data)?,
        UploadFormat::Csv => CsvTableParser::new().parse(&file_data)?,
    };

    tracing::info!(
        "Upload parsed in {:?}. {} rows, {} columns",
        start.elapsed(),
        table.len(),
        table.headers.len()
    );
    Ok(table)
}
