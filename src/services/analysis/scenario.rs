use serde::{Deserialize, Serialize};

use super::profiler::{column_values, finite_sum, round2, saturate};
use crate::error::AppError;
use crate::models::{format_number, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub kind: AdjustmentKind,
    pub magnitude: f64,
}

impl Adjustment {
    /// Change in the column total when the adjustment is applied once
    /// upward. Fixed amounts apply per value.
    fn delta(&self, sum: f64, count: usize) -> f64 {
        match self.kind {
            AdjustmentKind::Percentage => sum * self.magnitude / 100.0,
            AdjustmentKind::Fixed => self.magnitude * count as f64,
        }
    }

    fn label(&self, sign: char) -> String {
        let magnitude = format_number(self.magnitude);
        match self.kind {
            AdjustmentKind::Percentage => format!("{}{}%", sign, magnitude),
            AdjustmentKind::Fixed => format!("{}{}", sign, magnitude),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub scenario: String,
    pub total: f64,
    pub average: f64,
    /// Percent change against the unadjusted total, two decimals.
    pub change: f64,
}

/// Current, upward and downward what-if records for one column.
pub fn generate_scenarios(table: &Table, column: &str, adjustment: Adjustment) -> Result<Vec<ScenarioRecord>, AppError> {
    if !adjustment.magnitude.is_finite() {
        return Err(AppError::InvalidInput("Magnitude must be a finite number".to_string()));
    }
    let values = column_values(table, column)
        .ok_or_else(|| AppError::InvalidInput(format!("Unknown column: {}", column)))?;

    let count = values.len();
    let sum = finite_sum(&values);
    let delta = saturate(adjustment.delta(sum, count));

    let record = |scenario: String, total: f64| ScenarioRecord {
        scenario,
        total,
        average: if count == 0 { 0.0 } else { total / count as f64 },
        change: if sum == 0.0 {
            0.0
        } else {
            saturate(round2((total - sum) / sum * 100.0))
        },
    };

    Ok(vec![
        record("Current".to_string(), sum),
        record(adjustment.label('+'), saturate(sum + delta)),
        record(adjustment.label('-'), saturate(sum - delta)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Row};

    fn table(values: Vec<Cell>) -> Table {
        Table::new(
            vec!["revenue".to_string()],
            values.into_iter().map(|c| Row::new(vec![c])).collect(),
        )
    }

    fn revenue() -> Table {
        table(vec![
            Cell::Number(100.0),
            Cell::Number(200.0),
            Cell::Text("n/a".to_string()),
            Cell::Number(300.0),
        ])
    }

    #[test]
    fn test_percentage_adjustment() {
        let adjustment = Adjustment { kind: AdjustmentKind::Percentage, magnitude: 10.0 };
        let records = generate_scenarios(&revenue(), "revenue", adjustment).unwrap();
        assert_eq!(records[0], ScenarioRecord {
            scenario: "Current".to_string(),
            total: 600.0,
            average: 200.0,
            change: 0.0,
        });
        assert_eq!(records[1].scenario, "+10%");
        assert!((records[1].total - 660.0).abs() < 1e-9);
        assert_eq!(records[1].change, 10.0);
        assert_eq!(records[2].scenario, "-10%");
        assert!((records[2].average - 180.0).abs() < 1e-9);
        assert_eq!(records[2].change, -10.0);
    }

    #[test]
    fn test_fixed_adjustment_applies_per_value() {
        let adjustment = Adjustment { kind: AdjustmentKind::Fixed, magnitude: 5.0 };
        let records = generate_scenarios(&revenue(), "revenue", adjustment).unwrap();
        assert_eq!(records[1].scenario, "+5");
        assert_eq!(records[1].total, 615.0);
        assert_eq!(records[1].average, 205.0);
        assert_eq!(records[1].change, 2.5);
        assert_eq!(records[2].total, 585.0);
    }

    #[test]
    fn test_huge_totals_saturate() {
        let adjustment = Adjustment { kind: AdjustmentKind::Percentage, magnitude: 50.0 };
        let huge = table(vec![Cell::Number(1e308), Cell::Number(1e308)]);
        let records = generate_scenarios(&huge, "revenue", adjustment).unwrap();
        assert_eq!(records[0].total, f64::MAX);
        assert_eq!(records[1].total, f64::MAX);
        assert!(records
            .iter()
            .all(|r| r.total.is_finite() && r.average.is_finite() && r.change.is_finite()));
    }

    #[test]
    fn test_zero_base_reports_no_change() {
        let adjustment = Adjustment { kind: AdjustmentKind::Fixed, magnitude: 3.0 };
        let zeros = table(vec![Cell::Number(0.0), Cell::Number(0.0)]);
        let records = generate_scenarios(&zeros, "revenue", adjustment).unwrap();
        assert_eq!(records[1].total, 6.0);
        assert!(records.iter().all(|r| r.change == 0.0));
    }

    #[test]
    fn test_column_without_values() {
        let adjustment = Adjustment { kind: AdjustmentKind::Percentage, magnitude: 20.0 };
        let empty = table(vec![Cell::Null, Cell::Text("x".to_string())]);
        let records = generate_scenarios(&empty, "revenue", adjustment).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.total == 0.0 && r.average == 0.0 && r.change == 0.0));
    }

    #[test]
    fn test_invalid_requests() {
        let adjustment = Adjustment { kind: AdjustmentKind::Percentage, magnitude: 1.0 };
        assert!(generate_scenarios(&revenue(), "cost", adjustment).is_err());
        let nan = Adjustment { kind: AdjustmentKind::Fixed, magnitude: f64::NAN };
        assert!(matches!(
            generate_scenarios(&revenue(), "revenue", nan),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fractional_label() {
        let adjustment = Adjustment { kind: AdjustmentKind::Percentage, magnitude: 2.5 };
        let records = generate_scenarios(&revenue(), "revenue", adjustment).unwrap();
        assert_eq!(records[1].scenario, "+2.5%");
        assert_eq!(records[2].scenario, "-2.5%");
    }
}
