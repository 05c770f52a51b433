use clap::builder::RangedU64ValueParser;
use clap::Parser;
use std::path::PathBuf;

use crate::transform::Coercions;

/// Largest number of rows carried by a single INSERT statement.
pub const DEFAULT_BATCH_SIZE: usize = 16_000;

#[derive(Parser, Debug)]
#[command(name = "sheet_loader")]
#[command(about = "A CLI tool to load a Google Sheets worksheet into a Snowflake table as VARIANT rows")]
#[command(version)]
pub struct Args {
    /// Destination schema
    #[arg(long, value_name = "NAME")]
    pub schema: String,

    /// Destination table
    #[arg(long, value_name = "NAME")]
    pub table: String,

    /// Google Sheets ID (the key from the document URL, not its title)
    #[arg(long, value_name = "SHEET_ID")]
    pub sheet: String,

    /// Worksheet title to import (defaults to the first worksheet)
    #[arg(long, value_name = "TITLE", conflicts_with = "worksheet_index")]
    pub worksheet: Option<String>,

    /// Zero-based position of the worksheet to import
    #[arg(long, value_name = "INDEX")]
    pub worksheet_index: Option<usize>,

    /// JSON object mapping column keys to int, float, date, datetime or string
    #[arg(long, value_name = "JSON", value_parser = Coercions::from_json)]
    pub coercions: Option<Coercions>,

    /// Path to the Google service account key
    #[arg(long, value_name = "PATH", default_value = "./service-account.json")]
    pub service_account_file: PathBuf,

    /// Path to the warehouse connection config
    #[arg(long, value_name = "PATH", default_value = "./db.json")]
    pub db_config: PathBuf,

    /// Maximum rows per INSERT statement
    #[arg(
        long,
        value_name = "ROWS",
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub batch_size: usize,

    /// Print generated SQL before executing it
    #[arg(long)]
    pub verbose: bool,

    /// Generate SQL but never send it to the warehouse
    #[arg(long)]
    pub dry_run: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::CoercionKind;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec![
            "sheet_loader",
            "--schema",
            "raw",
            "--table",
            "budget",
            "--sheet",
            "1AbC",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_documented_paths() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.service_account_file, PathBuf::from("./service-account.json"));
        assert_eq!(args.db_config, PathBuf::from("./db.json"));
        assert_eq!(args.batch_size, DEFAULT_BATCH_SIZE);
        assert!(args.coercions.is_none());
        assert!(!args.verbose);
        assert!(!args.dry_run);
    }

    #[test]
    fn coercions_are_parsed_at_argument_time() {
        let args = parse(&["--coercions", r#"{"id":"int","date":"date"}"#]).unwrap();
        let coercions = args.coercions.unwrap();
        assert_eq!(coercions.get("id"), Some(CoercionKind::Int));
        assert_eq!(coercions.get("date"), Some(CoercionKind::Date));
    }

    #[test]
    fn malformed_coercions_are_rejected() {
        assert!(parse(&["--coercions", r#"{"id":"int",}"#]).is_err());
        assert!(parse(&["--coercions", r#"{"id":"money"}"#]).is_err());
    }

    #[test]
    fn worksheet_title_and_index_conflict() {
        assert!(parse(&["--worksheet", "Sheet1", "--worksheet-index", "2"]).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(parse(&["--batch-size", "0"]).is_err());
    }

    #[test]
    fn required_flags_are_enforced() {
        assert!(Args::try_parse_from(["sheet_loader", "--schema", "raw"]).is_err());
    }
}
