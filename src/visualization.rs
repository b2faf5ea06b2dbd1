use crate::db::Row;
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use tracing::info;

const DATE_NAME_HINTS: &[&str] = &["date", "time", "created", "updated", "birth"];

/// Declarative chart description for a result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VisualizationSpec {
    Line(AxisChart),
    Bar(AxisChart),
    Scatter(AxisChart),
    Table {
        title: String,
        columns: Vec<String>,
        data: Vec<Row>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisChart {
    pub title: String,
    pub x: String,
    pub y: String,
    pub x_title: String,
    pub y_title: String,
    pub data: Vec<Row>,
}

impl VisualizationSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            VisualizationSpec::Line(_) => "line",
            VisualizationSpec::Bar(_) => "bar",
            VisualizationSpec::Scatter(_) => "scatter",
            VisualizationSpec::Table { .. } => "table",
        }
    }
}

/// Picks a chart for `rows`, or `None` when there is nothing to draw.
///
/// First match wins: a date-like column with a numeric one gives a line
/// chart, a text column with a numeric one gives a bar chart, two numeric
/// columns give a scatter plot, and anything else is shown as a table.
pub fn classify(rows: &[Row]) -> Option<VisualizationSpec> {
    let first = rows.first()?;
    let columns: Vec<&str> = first.keys().map(String::as_str).collect();

    let numeric: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| is_numeric(rows, c))
        .collect();
    let dates: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| is_date_like(rows, c))
        .collect();
    let categorical: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| !numeric.contains(c) && is_categorical(rows, c))
        .collect();

    let spec = if let Some((x, y)) = dates
        .first()
        .and_then(|d| numeric.iter().find(|n| *n != d).map(|n| (*d, *n)))
    {
        let data = if has_repeated_keys(rows, x) {
            sum_by(rows, x, y)
        } else {
            project(rows, &[x, y])
        };
        VisualizationSpec::Line(AxisChart::new(format!("Trend Analysis: {} over Time", y), x, y, data))
    } else if let (Some(x), Some(y)) = (categorical.first(), numeric.first()) {
        VisualizationSpec::Bar(AxisChart::new(
            format!("Distribution: {} by {}", y, x),
            x,
            y,
            sum_by(rows, x, y),
        ))
    } else if let [x, y, ..] = numeric[..] {
        VisualizationSpec::Scatter(AxisChart::new(
            format!("Correlation: {} vs {}", x, y),
            x,
            y,
            project(rows, &[x, y]),
        ))
    } else {
        VisualizationSpec::Table {
            title: "Query Results".to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            data: rows.to_vec(),
        }
    };

    info!("Generated visualization config: {}", spec.kind());
    Some(spec)
}

impl AxisChart {
    fn new(title: String, x: &str, y: &str, data: Vec<Row>) -> Self {
        Self {
            title,
            x: x.to_string(),
            y: y.to_string(),
            x_title: title_case(x),
            y_title: title_case(y),
            data,
        }
    }
}

fn non_null<'a>(rows: &'a [Row], column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    rows.iter()
        .filter_map(move |row| row.get(column))
        .filter(|v| !v.is_null())
}

fn is_numeric(rows: &[Row], column: &str) -> bool {
    let mut values = non_null(rows, column).peekable();
    values.peek().is_some() && values.all(Value::is_number)
}

fn is_categorical(rows: &[Row], column: &str) -> bool {
    non_null(rows, column).next().is_some_and(Value::is_string)
}

fn is_date_like(rows: &[Row], column: &str) -> bool {
    let lower = column.to_lowercase();
    if DATE_NAME_HINTS.iter().any(|hint| lower.contains(hint)) {
        return true;
    }
    non_null(rows, column)
        .next()
        .and_then(Value::as_str)
        .is_some_and(parses_as_date)
}

fn parses_as_date(value: &str) -> bool {
    let value = value.trim();
    chrono::DateTime::parse_from_rfc3339(value).is_ok()
        || chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::NaiveDate::parse_from_str(value, "%m/%d/%Y").is_ok()
}

fn has_repeated_keys(rows: &[Row], column: &str) -> bool {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .any(|row| !seen.insert(group_key(row.get(column).unwrap_or(&Value::Null))))
}

fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sums `y` per distinct `x`, ordered by `x`.
fn sum_by(rows: &[Row], x: &str, y: &str) -> Vec<Row> {
    let mut groups: BTreeMap<String, (Value, Sum)> = BTreeMap::new();
    for row in rows {
        let key_value = row.get(x).cloned().unwrap_or(Value::Null);
        let entry = groups
            .entry(group_key(&key_value))
            .or_insert_with(|| (key_value, Sum::default()));
        if let Some(Value::Number(n)) = row.get(y) {
            entry.1.add(n);
        }
    }

    groups
        .into_values()
        .map(|(key, sum)| {
            let mut out = Row::new();
            out.insert(x.to_string(), key);
            out.insert(y.to_string(), sum.into_value());
            out
        })
        .collect()
}

#[derive(Default)]
struct Sum {
    int: i64,
    float: f64,
    all_integers: bool,
    seen: bool,
}

impl Sum {
    fn add(&mut self, n: &Number) {
        if !self.seen {
            self.all_integers = true;
            self.seen = true;
        }
        match n.as_i64() {
            Some(i) if self.all_integers => {
                self.int = self.int.saturating_add(i);
                self.float += i as f64;
            }
            _ => {
                self.all_integers = false;
                self.float += n.as_f64().unwrap_or_default();
            }
        }
    }

    fn into_value(self) -> Value {
        if !self.seen || self.all_integers {
            Value::from(self.int)
        } else {
            Number::from_f64(self.float)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }
}

fn project(rows: &[Row], columns: &[&str]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| (c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect()
}

fn title_case(column: &str) -> String {
    column
        .split(|c| c == '_' || c == ' ')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
