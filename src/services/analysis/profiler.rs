use std::collections::HashSet;

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use smallvec::SmallVec;

use crate::models::{
    AnalysisSnapshot, CategoricalStats, ColumnKind, ColumnMap, ColumnProfile,
    ColumnStatistics, DataQualityIssue, DataQualityReport, IssueKind, NumericStats, Table,
    SAMPLE_SIZE,
};

const LOW_COMPLETENESS_PERCENT: f64 = 50.0;

/// Classifies every column and computes its statistics and profile.
/// Columns are independent, so they fan out over rayon; each column is a
/// sequential fold and the output keeps header order.
pub fn analyze_columns(table: &Table) -> (ColumnMap<ColumnStatistics>, ColumnMap<ColumnProfile>) {
    let analyzed: Vec<(ColumnStatistics, ColumnProfile)> = (0..table.headers.len())
        .into_par_iter()
        .map(|idx| analyze_column(table, idx))
        .collect();

    let (statistics, profile): (Vec<_>, Vec<_>) = analyzed.into_iter().unzip();
    let statistics = table.headers.iter().cloned().zip(statistics).collect();
    let profile = table.headers.iter().cloned().zip(profile).collect();

    (statistics, profile)
}

pub fn analyze_column(table: &Table, idx: usize) -> (ColumnStatistics, ColumnProfile) {
    let name = table.headers.get(idx).cloned().unwrap_or_default();
    let total = table.len();

    let mut null_count = 0;
    let mut seen_values = HashSet::new();
    let mut numbers = Vec::new();
    let mut sample_values = SmallVec::<[String; SAMPLE_SIZE]>::new();

    for cell in table.column(idx) {
        if sample_values.len() < SAMPLE_SIZE {
            sample_values.push(cell.to_string());
        }
        if cell.is_null() {
            null_count += 1;
            continue;
        }
        seen_values.insert(cell.normalized());
        if let Some(n) = cell.as_f64() {
            numbers.push(n);
        }
    }

    let non_null = total - null_count;
    let statistics = match numeric_stats(&numbers) {
        Some(stats) => ColumnStatistics::Numeric(stats),
        None => ColumnStatistics::Categorical(CategoricalStats {
            count: non_null,
            unique: seen_values.len(),
        }),
    };

    let kind = if statistics.is_numeric() {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    };
    let excluded_values = match kind {
        ColumnKind::Numeric => non_null - numbers.len(),
        ColumnKind::Categorical => 0,
    };

    let profile = ColumnProfile {
        name,
        kind,
        non_null,
        null: null_count,
        unique: seen_values.len(),
        completeness: completeness(non_null, total),
        sample_values,
        excluded_values,
    };

    (statistics, profile)
}

/// `None` when no value parsed, which is what makes a column categorical.
/// Every field is finite; a total beyond `f64::MAX` saturates there.
pub fn numeric_stats(values: &[f64]) -> Option<NumericStats> {
    if values.is_empty() {
        return None;
    }

    let count = values.len();
    let sum = finite_sum(values);
    let mean = mean(values);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Some(NumericStats {
        count,
        mean,
        median: median(values),
        min,
        max,
        sum,
        std_dev: population_std_dev(values, mean),
    })
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        // Halves first so two huge neighbours cannot overflow.
        sorted[mid - 1] / 2.0 + sorted[mid] / 2.0
    } else {
        sorted[mid]
    }
}

/// Clamps into the finite range. NaN becomes 0.
pub fn saturate(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-f64::MAX, f64::MAX)
    }
}

fn max_magnitude(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Sum of finite values, saturating at `±f64::MAX` when the true total
/// is not representable.
pub fn finite_sum(values: &[f64]) -> f64 {
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        return sum;
    }
    let scale = max_magnitude(values);
    saturate(values.iter().map(|v| v / scale).sum::<f64>() * scale)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        return sum / n;
    }
    let scale = max_magnitude(values);
    saturate(values.iter().map(|v| v / scale).sum::<f64>() / n * scale)
}

/// Square root of the mean squared deviation.
pub fn population_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let squared: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let std_dev = (squared / n).sqrt();
    if std_dev.is_finite() {
        return std_dev;
    }

    // Halved deviations, scaled into [-1, 1].
    let halves: Vec<f64> = values.iter().map(|v| v / 2.0 - mean / 2.0).collect();
    let scale = max_magnitude(&halves);
    if scale == 0.0 {
        return 0.0;
    }
    let squared: f64 = halves.iter().map(|d| (d / scale).powi(2)).sum();
    saturate((squared / n).sqrt() * scale * 2.0)
}

/// Distance from the mean in standard deviations. `sigma` must be positive.
pub fn z_score(value: f64, mean: f64, sigma: f64) -> f64 {
    let z = (value - mean).abs() / sigma;
    if z.is_finite() {
        return z;
    }
    saturate((value / 2.0 - mean / 2.0).abs() / (sigma / 2.0))
}

pub fn completeness(non_null: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(non_null as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn quality_report(
    statistics: &ColumnMap<ColumnStatistics>,
    profile: &ColumnMap<ColumnProfile>,
) -> DataQualityReport {
    let mut issues = Vec::new();

    for (name, column) in profile.iter() {
        if column.non_null == 0 {
            issues.push(DataQualityIssue {
                column: name.to_string(),
                kind: IssueKind::EmptyColumn,
                detail: "Column has no values".to_string(),
            });
            continue;
        }
        if column.excluded_values > 0 {
            issues.push(DataQualityIssue {
                column: name.to_string(),
                kind: IssueKind::MixedTypes,
                detail: format!(
                    "{} non-numeric value(s) excluded from numeric statistics",
                    column.excluded_values
                ),
            });
        }
        if column.completeness < LOW_COMPLETENESS_PERCENT {
            issues.push(DataQualityIssue {
                column: name.to_string(),
                kind: IssueKind::LowCompleteness,
                detail: format!("Only {:.2}% of rows have a value", column.completeness),
            });
        }
    }

    for (name, stats) in statistics.iter() {
        if stats.as_numeric().is_some_and(NumericStats::is_saturated) {
            issues.push(DataQualityIssue {
                column: name.to_string(),
                kind: IssueKind::Overflow,
                detail: "Column total exceeds the representable range; sum is capped".to_string(),
            });
        }
    }

    let counts: Vec<usize> = statistics
        .iter()
        .map(|(_, stats)| match stats {
            ColumnStatistics::Numeric(s) => s.count,
            ColumnStatistics::Categorical(s) => s.count,
        })
        .collect();

    DataQualityReport {
        columns_analyzed: statistics.len(),
        total_data_points: counts.iter().sum(),
        verdict: if counts.iter().all(|count| *count > 0) {
            "Good".to_string()
        } else {
            "Needs attention".to_string()
        },
        issues,
    }
}

/// Builds the unversioned snapshot for a freshly parsed table.
pub fn build_snapshot(table: Table) -> AnalysisSnapshot {
    let start = std::time::Instant::now();
    let (statistics, profile) = analyze_columns(&table);
    let quality = quality_report(&statistics, &profile);

    tracing::info!(
        "Profiled {} columns over {} rows in {:?} ({} quality issues)",
        table.headers.len(),
        table.len(),
        start.elapsed(),
        quality.issues.len()
    );

    AnalysisSnapshot {
        version: 0,
        created_at: Utc::now(),
        headers: table.headers.clone(),
        table,
        statistics,
        profile,
        quality,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMean {
    pub column: String,
    pub mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeanExtremes {
    pub highest: ColumnMean,
    pub lowest: ColumnMean,
}

/// Numeric columns with the highest and lowest average; first wins on ties.
pub fn mean_extremes(statistics: &ColumnMap<ColumnStatistics>) -> Option<MeanExtremes> {
    let mut numeric = statistics
        .iter()
        .filter_map(|(name, stats)| stats.as_numeric().map(|s| (name, s.mean)));

    let (first_name, first_mean) = numeric.next()?;
    let mut highest = (first_name, first_mean);
    let mut lowest = (first_name, first_mean);
    for (name, mean) in numeric {
        if mean > highest.1 {
            highest = (name, mean);
        }
        if mean < lowest.1 {
            lowest = (name, mean);
        }
    }

    Some(MeanExtremes {
        highest: ColumnMean { column: highest.0.to_string(), mean: highest.1 },
        lowest: ColumnMean { column: lowest.0.to_string(), mean: lowest.1 },
    })
}

/// Parseable values of a column addressed by name.
pub fn column_values(table: &Table, column: &str) -> Option<Vec<f64>> {
    table.column_index(column).map(|idx| table.numeric_values(idx))
}
