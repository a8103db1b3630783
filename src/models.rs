use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;

pub const SAMPLE_SIZE: usize = 3;

/// A single scalar value of a table. Numbers are always finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Null,
}

impl Cell {
    /// Types a raw field the way uploads are typed: blank is null,
    /// numeric-looking text becomes a number, everything else stays text.
    pub fn from_raw(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        match parse_finite(trimmed) {
            Some(n) => Cell::Number(n),
            None => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Numeric view of the cell. Malformed tokens are simply `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_finite(s.trim()),
            Cell::Null => None,
        }
    }

    /// String normalization used for distinctness, grouping and equality filters.
    pub fn normalized(&self) -> String {
        match self {
            Cell::Number(n) => format_number(*n),
            Cell::Text(s) => s.clone(),
            Cell::Null => "null".to_string(),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(n) => f.write_str(&format_number(*n)),
            Cell::Text(s) => f.write_str(s),
            Cell::Null => Ok(()),
        }
    }
}

pub fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn get(&self, idx: usize) -> &Cell {
        self.cells.get(idx).unwrap_or(&Cell::Null)
    }
}

/// Ordered rows plus ordered, unique headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Builds a table, padding short rows with nulls and dropping fields
    /// beyond the header count.
    pub fn new(headers: Vec<String>, rows: Vec<Row>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.cells.resize(width, Cell::Null);
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |row| row.get(idx))
    }

    /// Parseable values of a column, in row order.
    pub fn numeric_values(&self, idx: usize) -> Vec<f64> {
        self.column(idx).filter_map(Cell::as_f64).collect()
    }

    /// Rows as header-keyed records, preserving header order.
    pub fn records(&self) -> impl Iterator<Item = RowRecord<'_>> + '_ {
        self.rows.iter().map(move |row| RowRecord {
            headers: &self.headers,
            row,
        })
    }

    pub fn head(&self, n: usize) -> Vec<RowRecord<'_>> {
        self.records().take(n).collect()
    }
}

pub struct RowRecord<'a> {
    headers: &'a [String],
    row: &'a Row,
}

impl Serialize for RowRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.headers.len()))?;
        for (idx, header) in self.headers.iter().enumerate() {
            map.serialize_entry(header, self.row.get(idx))?;
        }
        map.end()
    }
}

/// Column-name keyed map that keeps header order on the wire.
pub type ColumnMap<T> = IndexMap<String, T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub non_null: usize,
    pub null: usize,
    pub unique: usize,
    /// Percentage of non-null cells, two decimals.
    pub completeness: f64,
    pub sample_values: SmallVec<[String; SAMPLE_SIZE]>,
    /// Non-null cells left out of numeric aggregation.
    pub excluded_values: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Saturates at `±f64::MAX` when the true total overflows.
    pub sum: f64,
    pub std_dev: f64,
}

impl NumericStats {
    pub fn is_saturated(&self) -> bool {
        self.sum.abs() == f64::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalStats {
    pub count: usize,
    pub unique: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnStatistics {
    Numeric(NumericStats),
    Categorical(CategoricalStats),
}

impl ColumnStatistics {
    pub fn as_numeric(&self) -> Option<&NumericStats> {
        match self {
            ColumnStatistics::Numeric(stats) => Some(stats),
            ColumnStatistics::Categorical(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_numeric().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MixedTypes,
    EmptyColumn,
    LowCompleteness,
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityIssue {
    pub column: String,
    pub kind: IssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub columns_analyzed: usize,
    pub total_data_points: usize,
    pub verdict: String,
    pub issues: Vec<DataQualityIssue>,
}

/// Everything derived from one upload. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub headers: Vec<String>,
    pub table: Table,
    pub statistics: ColumnMap<ColumnStatistics>,
    pub profile: ColumnMap<ColumnProfile>,
    pub quality: DataQualityReport,
}
