use anyhow::{Context, Result};
use chrono::SecondsFormat;
use std::fmt::{self, Write};
use tracing::{debug, info};

use crate::transform::OutputRecord;

/// Destination `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

pub fn build_create_table(target: &TableRef) -> String {
    format!(
        "CREATE OR REPLACE TABLE {} (\n    source string,\n    imported_at timestamp_tz,\n    data variant\n);\n",
        target
    )
}

/// One INSERT carrying every record as a `VALUES` tuple; `data` goes in as
/// JSON text and is turned into a VARIANT by `parse_json`.
pub fn build_insert_rows(target: &TableRef, records: &[OutputRecord]) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "INSERT INTO {}", target)?;
    writeln!(out, "SELECT column1, column2::timestamp_tz, parse_json(column3)")?;
    writeln!(out, "FROM VALUES")?;

    let count = records.len();
    for (i, record) in records.iter().enumerate() {
        let data = serde_json::to_string(&record.data).context("Failed to serialize row data")?;
        write!(
            out,
            "({}, {}, {})",
            quote_literal(&record.source),
            quote_literal(&record.imported_at.to_rfc3339_opts(SecondsFormat::Millis, false)),
            quote_literal(&data)
        )?;
        if i != count - 1 {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str(";\n");

    Ok(out)
}

/// The full-replace load: recreate the table, then insert `records` in
/// chunks of at most `batch_size` rows. No records means no INSERT.
pub fn build_statements(target: &TableRef, records: &[OutputRecord], batch_size: usize) -> Result<Vec<String>> {
    if batch_size == 0 {
        anyhow::bail!("batch_size must be at least 1");
    }

    let mut statements = vec![build_create_table(target)];
    for chunk in records.chunks(batch_size) {
        statements.push(build_insert_rows(target, chunk)?);
    }

    info!(
        "Built {} statements for {} ({} records)",
        statements.len(),
        target,
        records.len()
    );
    debug!("Batch size: {}", batch_size);
    Ok(statements)
}

/// Single-quoted Snowflake string literal. Backslashes are escape characters
/// inside Snowflake literals, so JSON escapes must be doubled to survive.
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{build_records, transform_row, CoercionKind, Coercions, Row};
    use chrono::{TimeZone, Utc};

    fn records(n: usize) -> Vec<OutputRecord> {
        let coercions = Coercions::from_iter([("id", CoercionKind::Int)]);
        let rows = (0..n)
            .map(|i| {
                let row = Row::from_iter([("id", i.to_string()), ("name", format!("row {i}"))]);
                transform_row(&row, &coercions).unwrap()
            })
            .collect();
        let at = Utc.with_ymd_and_hms(2019, 3, 1, 12, 0, 0).unwrap();
        build_records("Sheet1", at, rows)
    }

    #[test]
    fn create_table_has_fixed_three_columns() {
        let sql = build_create_table(&TableRef::new("raw", "budget"));
        assert!(sql.starts_with("CREATE OR REPLACE TABLE raw.budget ("));
        assert!(sql.contains("source string"));
        assert!(sql.contains("imported_at timestamp_tz"));
        assert!(sql.contains("data variant"));
    }

    #[test]
    fn insert_carries_one_tuple_per_record() {
        let sql = build_insert_rows(&TableRef::new("raw", "budget"), &records(2)).unwrap();
        let expected = "INSERT INTO raw.budget\n\
            SELECT column1, column2::timestamp_tz, parse_json(column3)\n\
            FROM VALUES\n\
            ('Sheet1', '2019-03-01T12:00:00.000+00:00', '{\"id\":0,\"name\":\"row 0\"}'),\n\
            ('Sheet1', '2019-03-01T12:00:00.000+00:00', '{\"id\":1,\"name\":\"row 1\"}')\n\
            ;\n";
        assert_eq!(sql, expected);
    }

    #[test]
    fn literals_escape_quotes_and_backslashes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("Bob's"), "'Bob''s'");
        assert_eq!(quote_literal(r#"{"a":"x\"y"}"#), r#"'{"a":"x\\"y"}'"#);
    }

    #[test]
    fn statements_chunk_inserts_by_batch_size() {
        let target = TableRef::new("raw", "budget");
        let statements = build_statements(&target, &records(5), 2).unwrap();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE OR REPLACE TABLE"));
        assert!(statements[1..].iter().all(|s| s.starts_with("INSERT INTO raw.budget")));
        assert_eq!(statements[3].matches("('Sheet1'").count(), 1);
    }

    #[test]
    fn small_loads_use_a_single_insert() {
        let statements = build_statements(&TableRef::new("raw", "budget"), &records(3), 16_000).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].matches("('Sheet1'").count(), 3);
    }

    #[test]
    fn no_records_means_create_only() {
        let statements = build_statements(&TableRef::new("raw", "budget"), &[], 16_000).unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(build_statements(&TableRef::new("raw", "budget"), &records(1), 0).is_err());
    }
}
