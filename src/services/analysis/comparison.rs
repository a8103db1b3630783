use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::profiler::{finite_sum, mean};
use crate::error::AppError;
use crate::models::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub name: String,
    pub average: f64,
    pub total: f64,
    pub count: usize,
}

/// Groups rows by the segment column and aggregates the metric column.
/// Rows whose metric does not parse are skipped; groups keep the order in
/// which their first value appears.
pub fn compare_segments(table: &Table, segment: &str, metric: &str) -> Result<Vec<SegmentSummary>, AppError> {
    let segment_idx = table
        .column_index(segment)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown segment column: {}", segment)))?;
    let metric_idx = table
        .column_index(metric)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown metric column: {}", metric)))?;

    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();

    for row in &table.rows {
        let Some(value) = row.get(metric_idx).as_f64() else {
            continue;
        };
        let key = row.get(segment_idx).normalized();
        let slot = *positions.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(value);
    }

    Ok(groups
        .into_iter()
        .map(|(name, values)| SegmentSummary {
            name,
            average: mean(&values),
            total: finite_sum(&values),
            count: values.len(),
        })
        .collect())
}
