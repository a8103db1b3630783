use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{ColumnMap, ColumnStatistics, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    pub fn classify(coefficient: f64) -> Self {
        let r = coefficient.abs();
        if r > 0.7 {
            Strength::Strong
        } else if r > 0.4 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }
}

/// Pearson r over pairwise-complete rows. When either series has no
/// variance (or there are no pairs) `coefficient` is 0 and `defined` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub x: String,
    pub y: String,
    pub coefficient: f64,
    pub defined: bool,
    pub strength: Strength,
    pub pairs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let y_mean = ys.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut x_denom = 0.0;
    let mut y_denom = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        let dy = y - y_mean;
        numerator += dx * dy;
        x_denom += dx * dx;
        y_denom += dy * dy;
    }

    let denominator = (x_denom * y_denom).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return None;
    }
    let r = numerator / denominator;
    // Rounding can push |r| a hair past 1.
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// Values of two columns restricted to rows where both parse.
pub fn paired_values(table: &Table, x_idx: usize, y_idx: usize) -> (Vec<f64>, Vec<f64>) {
    table
        .rows
        .iter()
        .filter_map(|row| Some((row.get(x_idx).as_f64()?, row.get(y_idx).as_f64()?)))
        .unzip()
}

pub fn correlate(table: &Table, x: &str, y: &str) -> Result<Correlation, AppError> {
    let x_idx = table
        .column_index(x)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown column: {}", x)))?;
    let y_idx = table
        .column_index(y)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown column: {}", y)))?;

    let (xs, ys) = paired_values(table, x_idx, y_idx);
    let r = pearson(&xs, &ys);
    let coefficient = r.unwrap_or(0.0);

    Ok(Correlation {
        x: x.to_string(),
        y: y.to_string(),
        coefficient,
        defined: r.is_some(),
        strength: Strength::classify(coefficient),
        pairs: xs.len(),
    })
}

/// Pairwise correlation of every numeric column, in header order.
pub fn correlation_matrix(table: &Table, statistics: &ColumnMap<ColumnStatistics>) -> CorrelationMatrix {
    let numeric: Vec<(usize, &String)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| statistics.get(h.as_str()).is_some_and(ColumnStatistics::is_numeric))
        .collect();

    let values = numeric
        .iter()
        .map(|(x_idx, _)| {
            numeric
                .iter()
                .map(|(y_idx, _)| {
                    let (xs, ys) = paired_values(table, *x_idx, *y_idx);
                    pearson(&xs, &ys).unwrap_or(0.0)
                })
                .collect()
        })
        .collect();

    CorrelationMatrix {
        columns: numeric.into_iter().map(|(_, h)| h.clone()).collect(),
        values,
    }
}
