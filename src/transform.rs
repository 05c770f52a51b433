use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::sync::OnceLock;
use tracing::debug;

// %Y also accepts one or two digits, so "19" would read as year 19. Parses
// landing before MIN_YEAR are skipped and the %y form picks them up.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%m-%d-%y",
    "%m-%d-%Y",
    "%d %b %y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %y",
    "%b %d %Y",
    "%B %d %Y",
    "%d-%b-%y",
    "%d-%b-%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const MIN_YEAR: i32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum CoercionError {
    #[error("invalid coercion table: {0}")]
    InvalidTable(#[from] serde_json::Error),

    #[error("failed to parse '{value}' as int: {source}")]
    InvalidInt {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("failed to parse '{value}' as float: {source}")]
    InvalidFloat {
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("'{0}' is not a finite float")]
    NonFiniteFloat(String),

    #[error("failed to parse '{0}' as date")]
    InvalidDate(String),

    #[error("failed to parse '{0}' as datetime")]
    InvalidDateTime(String),

    #[error("column '{column}': {source}")]
    Column {
        column: String,
        #[source]
        source: Box<CoercionError>,
    },

    #[error("data row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: Box<CoercionError>,
    },
}

/// Target type for a coerced column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoercionKind {
    #[serde(alias = "integer")]
    Int,
    Float,
    Date,
    #[serde(rename = "datetime", alias = "timestamp")]
    DateTime,
    String,
}

impl CoercionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoercionKind::Int => "int",
            CoercionKind::Float => "float",
            CoercionKind::Date => "date",
            CoercionKind::DateTime => "datetime",
            CoercionKind::String => "string",
        }
    }
}

impl fmt::Display for CoercionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column key to target kind, as given by `--coercions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Coercions(BTreeMap<String, CoercionKind>);

impl Coercions {
    /// Parses a JSON object such as `{"id": "int", "date": "date"}`.
    /// Unknown kinds are rejected here rather than per row.
    pub fn from_json(text: &str) -> Result<Self, CoercionError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn get(&self, column: &str) -> Option<CoercionKind> {
        self.0.get(column).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, CoercionKind)> {
        self.0.iter().map(|(column, kind)| (column.as_str(), *kind))
    }
}

impl<K: Into<String>> FromIterator<(K, CoercionKind)> for Coercions {
    fn from_iter<T: IntoIterator<Item = (K, CoercionKind)>>(iter: T) -> Self {
        Coercions(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A worksheet row before coercion: column keys in header order, raw cell text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(key, _)| key == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Row {
            cells: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::String(s) => serializer.serialize_str(s),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(f) => serializer.serialize_f64(*f),
            CellValue::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            CellValue::DateTime(dt) => serializer.collect_str(&dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// A row after coercion. Serializes as a JSON object whose keys keep the
/// worksheet's column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoercedRow {
    cells: Vec<(String, CellValue)>,
}

impl CoercedRow {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.cells
            .iter()
            .find(|(key, _)| key == column)
            .map(|(_, value)| value)
    }
}

impl Serialize for CoercedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (key, value) in &self.cells {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One destination table row.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub data: CoercedRow,
}

fn numeric_noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| Regex::new(r"[,$]").expect("static regex is valid"))
}

/// Strips thousands separators and dollar signs so "$1,200" reads as 1200.
pub fn clean_numeric_string(input: &str) -> String {
    numeric_noise().replace_all(input.trim(), "").into_owned()
}

fn parse_date_text(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .find(|date| date.year() >= MIN_YEAR)
}

pub fn parse_date(value: &str) -> Result<NaiveDate, CoercionError> {
    let trimmed = value.trim();
    if let Some(parsed) = parse_date_text(trimmed) {
        return Ok(parsed);
    }
    parse_timestamp_text(trimmed)
        .map(|dt| dt.date())
        .ok_or_else(|| CoercionError::InvalidDate(value.to_string()))
}

pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, CoercionError> {
    let trimmed = value.trim();
    if let Some(parsed) = parse_timestamp_text(trimmed) {
        return Ok(parsed);
    }
    parse_date_text(trimmed)
        .map(|date| date.and_time(NaiveTime::MIN))
        .ok_or_else(|| CoercionError::InvalidDateTime(value.to_string()))
}

fn parse_timestamp_text(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .find(|dt| dt.year() >= MIN_YEAR)
}

/// Reinterprets one raw cell as `kind`. Blank cells in non-string columns
/// become null.
pub fn coerce_value(kind: CoercionKind, raw: &str) -> Result<CellValue, CoercionError> {
    if kind != CoercionKind::String && raw.trim().is_empty() {
        return Ok(CellValue::Null);
    }

    let value = match kind {
        CoercionKind::String => CellValue::String(raw.to_string()),
        CoercionKind::Int => {
            let parsed = clean_numeric_string(raw)
                .parse::<i64>()
                .map_err(|source| CoercionError::InvalidInt {
                    value: raw.to_string(),
                    source,
                })?;
            CellValue::Int(parsed)
        }
        CoercionKind::Float => {
            let parsed = clean_numeric_string(raw)
                .parse::<f64>()
                .map_err(|source| CoercionError::InvalidFloat {
                    value: raw.to_string(),
                    source,
                })?;
            if !parsed.is_finite() {
                return Err(CoercionError::NonFiniteFloat(raw.to_string()));
            }
            CellValue::Float(parsed)
        }
        CoercionKind::Date => CellValue::Date(parse_date(raw)?),
        CoercionKind::DateTime => CellValue::DateTime(parse_datetime(raw)?),
    };
    Ok(value)
}

/// Applies `coercions` to every listed column of `row`; other columns pass
/// through as strings.
pub fn transform_row(row: &Row, coercions: &Coercions) -> Result<CoercedRow, CoercionError> {
    let cells = row
        .iter()
        .map(|(key, raw)| {
            let value = match coercions.get(key) {
                Some(kind) => coerce_value(kind, raw).map_err(|source| CoercionError::Column {
                    column: key.to_string(),
                    source: Box::new(source),
                })?,
                None => CellValue::String(raw.to_string()),
            };
            Ok((key.to_string(), value))
        })
        .collect::<Result<Vec<_>, CoercionError>>()?;
    Ok(CoercedRow { cells })
}

/// Transforms every row or none. The first failure aborts with the 1-based
/// data row and the column that caused it.
pub fn apply_coercions(rows: &[Row], coercions: &Coercions) -> Result<Vec<CoercedRow>, CoercionError> {
    if let Some(first) = rows.first() {
        for (column, kind) in coercions.iter() {
            if first.get(column).is_none() {
                debug!("Coercion for column '{}' matches no worksheet column", column);
            } else {
                debug!("Coercing column '{}' as {}", column, kind);
            }
        }
    }

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            transform_row(row, coercions).map_err(|source| CoercionError::Row {
                row: index + 1,
                source: Box::new(source),
            })
        })
        .collect()
}

pub fn build_records(source: &str, imported_at: DateTime<Utc>, rows: Vec<CoercedRow>) -> Vec<OutputRecord> {
    debug!("Building {} output records for '{}'", rows.len(), source);
    rows.into_iter()
        .map(|data| OutputRecord {
            source: source.to_string(),
            imported_at,
            data,
        })
        .collect()
}
