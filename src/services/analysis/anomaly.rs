use serde::{Deserialize, Serialize};

use super::profiler::{mean, population_std_dev, z_score};
use crate::config::AnomalySettings;
use crate::models::{ColumnMap, ColumnStatistics, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub column: String,
    pub row_index: usize,
    pub value: f64,
    pub mean: f64,
    pub z_score: f64,
    pub severity: Severity,
}

/// Flags values whose z-score exceeds the threshold, across every numeric
/// column. σ is floored at 1 so constant columns never divide by zero.
pub fn detect_anomalies(
    table: &Table,
    statistics: &ColumnMap<ColumnStatistics>,
    settings: &AnomalySettings,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (idx, header) in table.headers.iter().enumerate() {
        if !statistics.get(header).is_some_and(ColumnStatistics::is_numeric) {
            continue;
        }

        let values = table.numeric_values(idx);
        if values.is_empty() {
            continue;
        }
        let mu = mean(&values);
        let sigma = population_std_dev(&values, mu).max(1.0);

        for (row_index, cell) in table.column(idx).enumerate() {
            let Some(value) = cell.as_f64() else {
                continue;
            };
            let z_score = z_score(value, mu, sigma);
            if z_score > settings.threshold {
                anomalies.push(Anomaly {
                    column: header.clone(),
                    row_index,
                    value,
                    mean: mu,
                    z_score,
                    severity: if z_score > settings.high_severity {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                });
            }
        }
    }

    // Stable sort keeps column/row order among equal scores.
    anomalies.sort_by(|a, b| b.z_score.total_cmp(&a.z_score));
    anomalies.truncate(settings.limit);

    tracing::debug!("Anomaly scan found {} record(s)", anomalies.len());
    anomalies
}
