use serde::{Deserialize, Serialize};

use super::profiler::analyze_columns;
use crate::error::AppError;
use crate::models::{Cell, ColumnMap, ColumnProfile, ColumnStatistics, Row, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum FilterCondition {
    /// Equality on the normalized string form, so `5` matches `"5"`.
    Equals { value: Cell },
    /// Case-insensitive substring.
    Contains { value: String },
    GreaterThan { value: f64 },
    /// Inclusive on both ends.
    Range { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    pub column: String,
    #[serde(flatten)]
    pub condition: FilterCondition,
}

impl FilterCondition {
    pub fn matches(&self, cell: &Cell) -> bool {
        match self {
            FilterCondition::Equals { value } => cell.normalized() == value.normalized(),
            FilterCondition::Contains { value } => {
                !cell.is_null() && cell.to_string().to_lowercase().contains(&value.to_lowercase())
            }
            FilterCondition::GreaterThan { value } => cell.as_f64().is_some_and(|n| n > *value),
            FilterCondition::Range { min, max } => cell.as_f64().is_some_and(|n| n >= *min && n <= *max),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilteredAnalysis {
    pub table: Table,
    pub statistics: ColumnMap<ColumnStatistics>,
    pub profile: ColumnMap<ColumnProfile>,
}

/// Rows matching every rule, as a new table with the same headers.
pub fn apply_filters(table: &Table, rules: &[FilterRule]) -> Result<Table, AppError> {
    let resolved = rules
        .iter()
        .map(|rule| {
            table
                .column_index(&rule.column)
                .map(|idx| (idx, &rule.condition))
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown filter column: {}", rule.column)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rows: Vec<Row> = table
        .rows
        .iter()
        .filter(|row| resolved.iter().all(|(idx, condition)| condition.matches(row.get(*idx))))
        .cloned()
        .collect();

    Ok(Table::new(table.headers.clone(), rows))
}

/// Filters, then profiles the result from scratch.
pub fn filter_analysis(table: &Table, rules: &[FilterRule]) -> Result<FilteredAnalysis, AppError> {
    let filtered = apply_filters(table, rules)?;
    let (statistics, profile) = analyze_columns(&filtered);
    tracing::debug!(
        "Filtered {} rows down to {} with {} rule(s)",
        table.len(),
        filtered.len(),
        rules.len()
    );

    Ok(FilteredAnalysis {
        table: filtered,
        statistics,
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn sales() -> Table {
        let rows = vec![
            (text("East"), Cell::Number(10.0)),
            (text("West"), Cell::Number(20.0)),
            (text("north-east"), Cell::Number(30.0)),
            (Cell::Null, Cell::Text("n/a".to_string())),
        ];
        Table::new(
            vec!["region".to_string(), "sales".to_string()],
            rows.into_iter().map(|(a, b)| Row::new(vec![a, b])).collect(),
        )
    }

    fn rule(column: &str, condition: FilterCondition) -> FilterRule {
        FilterRule { column: column.to_string(), condition }
    }

    #[test]
    fn test_equals_uses_normalized_form() {
        let rules = [rule("sales", FilterCondition::Equals { value: text("20") })];
        let filtered = apply_filters(&sales(), &rules).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows[0].get(0), &text("West"));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let rules = [rule("region", FilterCondition::Contains { value: "EAST".to_string() })];
        assert_eq!(apply_filters(&sales(), &rules).unwrap().len(), 2);
    }

    #[test]
    fn test_numeric_rules() {
        let greater = [rule("sales", FilterCondition::GreaterThan { value: 10.0 })];
        assert_eq!(apply_filters(&sales(), &greater).unwrap().len(), 2);

        let range = [rule("sales", FilterCondition::Range { min: 10.0, max: 20.0 })];
        assert_eq!(apply_filters(&sales(), &range).unwrap().len(), 2);
    }

    #[test]
    fn test_rules_combine_with_and() {
        let rules = [
            rule("region", FilterCondition::Contains { value: "east".to_string() }),
            rule("sales", FilterCondition::GreaterThan { value: 15.0 }),
        ];
        let filtered = apply_filters(&sales(), &rules).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.rows[0].get(1), &Cell::Number(30.0));
    }

    #[test]
    fn test_no_rules_keeps_everything() {
        let table = sales();
        assert_eq!(apply_filters(&table, &[]).unwrap(), table);
    }

    #[test]
    fn test_unknown_column() {
        let rules = [rule("cost", FilterCondition::GreaterThan { value: 0.0 })];
        assert!(matches!(apply_filters(&sales(), &rules), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_filter_analysis_recomputes_statistics() {
        let table = sales();
        let rules = [rule("sales", FilterCondition::GreaterThan { value: 15.0 })];
        let result = filter_analysis(&table, &rules).unwrap();
        let stats = result.statistics.get("sales").and_then(ColumnStatistics::as_numeric).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 25.0);
        assert_eq!(result.profile.get("region").unwrap().completeness, 100.0);
        // Source table untouched.
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_rule_wire_format() {
        let parsed: Vec<FilterRule> = serde_json::from_str(
            r#"[
                {"column":"region","operator":"equals","value":"East"},
                {"column":"sales","operator":"range","min":1,"max":5}
            ]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].condition, FilterCondition::Equals { value: text("East") });
        assert_eq!(parsed[1].condition, FilterCondition::Range { min: 1.0, max: 5.0 });
    }
}
