use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ChartLimits;
use crate::models::{format_number, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Scatter,
    Histogram,
}

impl ChartType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bar" => Some(ChartType::Bar),
            "line" => Some(ChartType::Line),
            "scatter" => Some(ChartType::Scatter),
            "histogram" => Some(ChartType::Histogram),
            _ => None,
        }
    }
}

/// What to draw. `chart_type` stays a free string because recommendations
/// can name types that are not shaped here (e.g. `box`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(rename = "type", alias = "chart_type", default)]
    pub chart_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub insight: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinePoint {
    pub step: usize,
    /// One slot per charted column; `None` where the cell does not parse.
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub range: String,
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChartSeries {
    Bar { group_by: String, value: String, points: Vec<BarPoint> },
    Line { columns: Vec<String>, points: Vec<LinePoint> },
    Scatter { x: String, y: String, points: Vec<ScatterPoint> },
    Histogram { column: String, bins: Vec<HistogramBin> },
    Empty { reason: String },
}

impl ChartSeries {
    fn empty(reason: impl Into<String>) -> Self {
        ChartSeries::Empty { reason: reason.into() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ChartSeries::Bar { points, .. } => points.is_empty(),
            ChartSeries::Line { points, .. } => points.is_empty(),
            ChartSeries::Scatter { points, .. } => points.is_empty(),
            ChartSeries::Histogram { bins, .. } => bins.is_empty(),
            ChartSeries::Empty { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedChart {
    pub id: String,
    pub title: String,
    pub insight: String,
    pub columns: Vec<String>,
    pub series: ChartSeries,
}

/// Shapes the table into a renderer-ready series. Incompatible requests
/// yield an `Empty` series rather than an error.
pub fn shape_chart(table: &Table, spec: &ChartSpec, limits: &ChartLimits) -> ChartSeries {
    let Some(chart_type) = ChartType::parse(&spec.chart_type) else {
        return ChartSeries::empty(format!("Unsupported chart type: {}", spec.chart_type));
    };

    let mut indices = Vec::with_capacity(spec.columns.len());
    for column in &spec.columns {
        match table.column_index(column) {
            Some(idx) => indices.push(idx),
            None => return ChartSeries::empty(format!("Unknown column: {}", column)),
        }
    }

    match (chart_type, indices.as_slice()) {
        (ChartType::Bar, [group, value, ..]) => bar_series(table, *group, *value, limits.bar),
        (ChartType::Line, [_, ..]) => line_series(table, &indices, limits.line),
        (ChartType::Scatter, [x, y, ..]) => scatter_series(table, *x, *y, limits.scatter),
        (ChartType::Histogram, [column, ..]) => histogram_series(table, *column, limits.histogram_bins),
        _ => ChartSeries::empty(format!(
            "Not enough columns for a {} chart",
            spec.chart_type.to_ascii_lowercase()
        )),
    }
}

/// Sum of `value` per `group`, largest first, top `limit`.
pub fn bar_series(table: &Table, group: usize, value: usize, limit: usize) -> ChartSeries {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut points: Vec<BarPoint> = Vec::new();

    for row in &table.rows {
        let Some(v) = row.get(value).as_f64() else {
            continue;
        };
        let name = row.get(group).normalized();
        match positions.get(&name) {
            Some(&slot) => points[slot].value += v,
            None => {
                positions.insert(name.clone(), points.len());
                points.push(BarPoint { name, value: v });
            }
        }
    }

    points.sort_by(|a, b| b.value.total_cmp(&a.value));
    points.truncate(limit);

    ChartSeries::Bar {
        group_by: table.headers[group].clone(),
        value: table.headers[value].clone(),
        points,
    }
}

/// The first `limit` rows in table order, indexed by position.
pub fn line_series(table: &Table, columns: &[usize], limit: usize) -> ChartSeries {
    let points = table
        .rows
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, row)| LinePoint {
            step: i + 1,
            values: columns.iter().map(|idx| row.get(*idx).as_f64()).collect(),
        })
        .collect();

    ChartSeries::Line {
        columns: columns.iter().map(|idx| table.headers[*idx].clone()).collect(),
        points,
    }
}

pub fn scatter_series(table: &Table, x: usize, y: usize, limit: usize) -> ChartSeries {
    let points = table
        .rows
        .iter()
        .filter_map(|row| {
            Some(ScatterPoint {
                x: row.get(x).as_f64()?,
                y: row.get(y).as_f64()?,
            })
        })
        .take(limit)
        .collect();

    ChartSeries::Scatter {
        x: table.headers[x].clone(),
        y: table.headers[y].clone(),
        points,
    }
}

/// Equal-width bins over [min, max]. Bins are half-open except the last,
/// which also takes the maximum. A constant column spans a range of 1.
pub fn histogram_series(table: &Table, column: usize, bin_count: usize) -> ChartSeries {
    let values = table.numeric_values(column);
    if values.is_empty() || bin_count == 0 {
        return ChartSeries::empty(format!("No numeric values in {}", table.headers[column]));
    }

    ChartSeries::Histogram {
        column: table.headers[column].clone(),
        bins: histogram_bins(&values, bin_count),
    }
}

pub fn histogram_bins(values: &[f64], bin_count: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bin_count == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    // A span wider than f64::MAX is binned in half units.
    let scale = if (max - min).is_finite() { 1.0 } else { 0.5 };
    let low = min * scale;
    let range = if max > min { max * scale - low } else { 1.0 };
    let width = range / bin_count as f64;

    let mut counts = vec![0usize; bin_count];
    for value in values {
        let idx = (((value * scale - low) / width).floor() as usize).min(bin_count - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let start = (low + i as f64 * width) / scale;
            let end = (low + (i + 1) as f64 * width) / scale;
            HistogramBin {
                range: format!("{}-{}", format_number(start.round()), format_number(end.round())),
                start,
                end,
                count,
            }
        })
        .collect()
}

/// Shapes the recommended visualizations whose columns all exist, keeping
/// at most `limits.recommended` non-empty charts.
pub fn recommended_charts(table: &Table, specs: &[ChartSpec], limits: &ChartLimits) -> Vec<RecommendedChart> {
    if table.is_empty() {
        return Vec::new();
    }

    specs
        .iter()
        .enumerate()
        .filter(|(_, spec)| {
            !spec.columns.is_empty()
                && spec.columns.iter().all(|c| table.column_index(c).is_some())
        })
        .take(limits.recommended)
        .filter_map(|(idx, spec)| {
            let series = shape_chart(table, spec, limits);
            if series.is_empty() {
                tracing::debug!("Skipping recommended chart {:?}: no data", spec.title);
                return None;
            }
            Some(RecommendedChart {
                id: format!("chart-{}", idx),
                title: spec.title.clone(),
                insight: spec.insight.clone(),
                columns: spec.columns.clone(),
                series,
            })
        })
        .collect()
}
