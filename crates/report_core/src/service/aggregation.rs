//! Percentage and total-row computation for categorical tables.
//!
//! # Responsibility
//! - Derive per-row percentage columns from numeric value columns.
//! - Force a single total row to agree with the data rows it summarizes.
//!
//! # Invariants
//! - Pure functions: inputs are never mutated; output has the same row count
//!   and order as the input (plus one row for `append_total_row`).
//! - A zero sum yields `"0,00 %"` everywhere, never a division error.
//! - Missing or non-numeric values count as zero; rows are never dropped.

use crate::model::field::TableRow;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

static TOTAL_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)total").expect("valid total label regex"));

/// Label used by `append_total_row`.
pub const TOTAL_LABEL: &str = "Total";

/// One numeric column and the column receiving its percentage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentageColumn {
    pub value: String,
    pub percentage: String,
}

impl PercentageColumn {
    pub fn new(value: impl Into<String>, percentage: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            percentage: percentage.into(),
        }
    }
}

/// Table layout consumed by the aggregation functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentageSpec {
    /// Column holding the category label.
    pub category: String,
    /// Each value column is summed independently.
    pub columns: Vec<PercentageColumn>,
}

impl PercentageSpec {
    /// Single `casos` column with its `porcentaje`.
    pub fn cases(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            columns: vec![PercentageColumn::new("casos", "porcentaje")],
        }
    }

    /// Parallel sex-split columns.
    pub fn by_sex(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            columns: vec![
                PercentageColumn::new("hombres", "porcentajeHombres"),
                PercentageColumn::new("mujeres", "porcentajeMujeres"),
            ],
        }
    }
}

/// Whether a category label marks the total row.
pub fn is_total_label(label: &str) -> bool {
    TOTAL_LABEL_RE.is_match(label)
}

/// Default total-row predicate over the `category` column.
pub fn total_row_matcher(category: &str) -> impl Fn(&TableRow) -> bool + '_ {
    move |row| {
        row.get(category)
            .and_then(Value::as_str)
            .is_some_and(is_total_label)
    }
}

/// Numeric reading of a cell; anything unparsable or non-finite is zero.
pub fn numeric_value(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|number| number.is_finite()).unwrap_or(0.0)
}

/// Formats a percentage as `"12,34 %"`.
pub fn format_percentage(percentage: f64) -> String {
    let value = if percentage.is_finite() { percentage } else { 0.0 };
    // Avoids "-0,00 %".
    let value = if value.abs() < 0.005 { 0.0 } else { value };
    format!("{value:.2} %").replace('.', ",")
}

/// Returns `rows` with percentage columns filled in.
///
/// Rows matching `is_total` are excluded from the sums; their value columns
/// are recomputed to the sums and their percentages forced to `100,00 %`
/// (`0,00 %` when the sum is zero).
pub fn with_percentages(
    rows: &[TableRow],
    spec: &PercentageSpec,
    is_total: impl Fn(&TableRow) -> bool,
) -> Vec<TableRow> {
    let totals: Vec<bool> = rows.iter().map(&is_total).collect();
    let sums: Vec<f64> = spec
        .columns
        .iter()
        .map(|column| {
            rows.iter()
                .zip(&totals)
                .filter(|(_, total)| !**total)
                .map(|(row, _)| row.get(&column.value).map_or(0.0, numeric_value))
                .sum()
        })
        .collect();

    rows.iter()
        .zip(&totals)
        .map(|(row, total)| {
            let mut row = row.clone();
            for (column, sum) in spec.columns.iter().zip(&sums) {
                let percentage = if *total {
                    row.insert(column.value.clone(), number_value(*sum));
                    if *sum == 0.0 {
                        0.0
                    } else {
                        100.0
                    }
                } else if *sum == 0.0 {
                    0.0
                } else {
                    row.get(&column.value).map_or(0.0, numeric_value) / sum * 100.0
                };
                row.insert(
                    column.percentage.clone(),
                    Value::String(format_percentage(percentage)),
                );
            }
            row
        })
        .collect()
}

/// `with_percentages` using the default total-row predicate.
pub fn with_default_percentages(rows: &[TableRow], spec: &PercentageSpec) -> Vec<TableRow> {
    with_percentages(rows, spec, total_row_matcher(&spec.category))
}

/// Appends a `Total` row when none exists, then computes percentages.
pub fn append_total_row(rows: &[TableRow], spec: &PercentageSpec) -> Vec<TableRow> {
    let matcher = total_row_matcher(&spec.category);
    if rows.iter().any(&matcher) {
        return with_percentages(rows, spec, matcher);
    }

    let mut extended = rows.to_vec();
    let mut total = TableRow::new();
    total.insert(spec.category.clone(), Value::String(TOTAL_LABEL.to_string()));
    extended.push(total);
    with_percentages(&extended, spec, matcher)
}

fn number_value(sum: f64) -> Value {
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Value::Number(Number::from(sum as i64))
    } else {
        Number::from_f64(sum).map_or(Value::Null, Value::Number)
    }
}
