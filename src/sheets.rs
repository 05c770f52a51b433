use anyhow::{Context, Result};
use google_sheets4::api::Sheet;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::auth::{SheetsHub, SHEETS_READONLY_SCOPE};
use crate::transform::Row;

/// Which tab of the spreadsheet to import.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorksheetSelector {
    #[default]
    First,
    Title(String),
    Index(usize),
}

impl WorksheetSelector {
    pub fn from_args(title: Option<String>, index: Option<usize>) -> Self {
        match (title, index) {
            (Some(title), _) => WorksheetSelector::Title(title),
            (None, Some(index)) => WorksheetSelector::Index(index),
            (None, None) => WorksheetSelector::First,
        }
    }
}

impl fmt::Display for WorksheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorksheetSelector::First => write!(f, "first worksheet"),
            WorksheetSelector::Title(title) => write!(f, "worksheet '{}'", title),
            WorksheetSelector::Index(index) => write!(f, "worksheet #{}", index),
        }
    }
}

/// A worksheet's title, header and data rows as read from the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Worksheet {
    /// The first grid row is the header, cut at its first blank cell. Rows
    /// with nothing but whitespace are dropped.
    pub fn from_grid(title: impl Into<String>, mut grid: Vec<Vec<String>>) -> Result<Self> {
        let title = title.into();
        if grid.is_empty() {
            anyhow::bail!("Worksheet '{}' is empty; expected a header row", title);
        }

        let data = grid.split_off(1);
        let headers: Vec<String> = grid
            .remove(0)
            .into_iter()
            .take_while(|cell| !cell.is_empty())
            .collect();
        if headers.is_empty() {
            anyhow::bail!("Worksheet '{}' has no column headers in its first row", title);
        }

        let keys = headers_to_keys(&headers);
        for (i, key) in keys.iter().enumerate() {
            if keys[..i].contains(key) {
                anyhow::bail!(
                    "Worksheet '{}' has more than one column named '{}' after normalizing headers",
                    title,
                    key
                );
            }
        }

        let total = data.len();
        let rows: Vec<Vec<String>> = data
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .collect();
        debug!("Dropped {} blank rows from '{}'", total - rows.len(), title);

        Ok(Self { title, headers, rows })
    }

    pub fn keys(&self) -> Vec<String> {
        headers_to_keys(&self.headers)
    }

    /// Pairs each data row with the header keys. Short rows are padded with
    /// empty cells and cells past the last header are ignored.
    pub fn to_rows(&self) -> Vec<Row> {
        let keys = self.keys();
        self.rows
            .iter()
            .map(|cells| {
                keys.iter()
                    .enumerate()
                    .map(|(i, key)| (key.clone(), cells.get(i).cloned().unwrap_or_default()))
                    .collect()
            })
            .collect()
    }
}

fn key_noise() -> &'static Regex {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    NOISE.get_or_init(|| Regex::new(r"[^a-z0-9_]+").expect("static regex is valid"))
}

/// Lowercases headers and collapses anything outside `[a-z0-9_]` to `_`.
pub fn headers_to_keys(headers: &[String]) -> Vec<String> {
    headers
        .iter()
        .map(|header| key_noise().replace_all(&header.to_lowercase(), "_").into_owned())
        .collect()
}

/// Source of worksheet contents. The Google Sheets API is the real one.
pub trait WorksheetSource {
    async fn read_worksheet(&self, sheet_id: &str, selector: &WorksheetSelector) -> Result<Worksheet>;
}

pub struct GoogleSheets {
    hub: SheetsHub,
}

impl GoogleSheets {
    pub fn new(hub: SheetsHub) -> Self {
        Self { hub }
    }
}

impl WorksheetSource for GoogleSheets {
    async fn read_worksheet(&self, sheet_id: &str, selector: &WorksheetSelector) -> Result<Worksheet> {
        info!("Reading {} of spreadsheet {}", selector, sheet_id);

        let (_, spreadsheet) = self
            .hub
            .spreadsheets()
            .get(sheet_id)
            .add_scope(SHEETS_READONLY_SCOPE)
            .doit()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open spreadsheet {}: {}", sheet_id, e))?;

        let tabs = worksheet_tabs(spreadsheet.sheets.as_deref().unwrap_or_default());
        let title = select_worksheet(&tabs, selector)?;
        debug!("Resolved {} to '{}'", selector, title);

        let (_, value_range) = self
            .hub
            .spreadsheets()
            .values_get(sheet_id, &quote_range(&title))
            .major_dimension("ROWS")
            .add_scope(SHEETS_READONLY_SCOPE)
            .doit()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to fetch rows of '{}': {}", title, e))?;

        let grid: Vec<Vec<String>> = value_range
            .values
            .unwrap_or_default()
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        info!("Fetched {} grid rows from '{}'", grid.len(), title);

        Worksheet::from_grid(title, grid).context("Failed to read worksheet contents")
    }
}

/// (index, title) of every tab, in sheet order.
fn worksheet_tabs(sheets: &[Sheet]) -> Vec<(i32, String)> {
    let mut tabs: Vec<(i32, String)> = sheets
        .iter()
        .filter_map(|sheet| sheet.properties.as_ref())
        .filter_map(|props| Some((props.index.unwrap_or_default(), props.title.clone()?)))
        .collect();
    tabs.sort_by_key(|(index, _)| *index);
    tabs
}

fn select_worksheet(tabs: &[(i32, String)], selector: &WorksheetSelector) -> Result<String> {
    let found = match selector {
        WorksheetSelector::First => tabs.first(),
        WorksheetSelector::Index(index) => tabs.get(*index),
        WorksheetSelector::Title(title) => tabs.iter().find(|(_, t)| t == title),
    };
    match found {
        Some((_, title)) => Ok(title.clone()),
        None => {
            let available: Vec<&str> = tabs.iter().map(|(_, t)| t.as_str()).collect();
            anyhow::bail!("Could not find {}; available worksheets: {:?}", selector, available)
        }
    }
}

/// A1 range covering a whole tab, e.g. `'Q1 Budget'`.
fn quote_range(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn headers_become_snake_keys() {
        let headers = vec!["Order ID".to_string(), "Cost ($)".to_string(), "already_ok".to_string()];
        assert_eq!(headers_to_keys(&headers), vec!["order_id", "cost_", "already_ok"]);
    }

    #[test]
    fn header_is_cut_at_first_blank_and_blank_rows_dropped() {
        let ws = Worksheet::from_grid(
            "Sheet1",
            grid(&[
                &["id", "name", "", "ignored"],
                &["1", "Ada"],
                &["", "  "],
                &["2", "Grace", "x", "y"],
            ]),
        )
        .unwrap();
        assert_eq!(ws.headers, vec!["id", "name"]);
        assert_eq!(ws.rows.len(), 2);
    }

    #[test]
    fn rows_keep_every_header_key() {
        let ws = Worksheet::from_grid(
            "Sheet1",
            grid(&[&["ID", "Code", "Note"], &["1"], &["2", "xyz", "n", "extra"]]),
        )
        .unwrap();
        let rows = ws.to_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].iter().count(), 3);
        assert_eq!(rows[0].get("id"), Some("1"));
        assert_eq!(rows[0].get("note"), Some(""));
        assert_eq!(rows[1].get("code"), Some("xyz"));
        assert_eq!(rows[1].iter().count(), 3);
    }

    #[test]
    fn empty_worksheet_is_an_error() {
        assert!(Worksheet::from_grid("Empty", Vec::new()).is_err());
        assert!(Worksheet::from_grid("NoHeader", grid(&[&["", "a"]])).is_err());
    }

    #[test]
    fn colliding_header_keys_are_rejected() {
        let err = Worksheet::from_grid("Sheet1", grid(&[&["Cost", "cost"], &["1", "2"]])).unwrap_err();
        assert!(err.to_string().contains("'cost'"));
    }

    #[test]
    fn header_only_worksheet_has_no_rows() {
        let ws = Worksheet::from_grid("Sheet1", grid(&[&["id"]])).unwrap();
        assert!(ws.to_rows().is_empty());
    }

    #[test]
    fn selector_resolves_by_position_and_title() {
        let tabs = vec![(0, "Summary".to_string()), (1, "Raw".to_string())];
        assert_eq!(select_worksheet(&tabs, &WorksheetSelector::First).unwrap(), "Summary");
        assert_eq!(select_worksheet(&tabs, &WorksheetSelector::Index(1)).unwrap(), "Raw");
        assert_eq!(
            select_worksheet(&tabs, &WorksheetSelector::Title("Raw".into())).unwrap(),
            "Raw"
        );
        let err = select_worksheet(&tabs, &WorksheetSelector::Title("Missing".into())).unwrap_err();
        assert!(err.to_string().contains("Summary"));
        assert!(select_worksheet(&tabs, &WorksheetSelector::Index(5)).is_err());
    }

    #[test]
    fn selector_prefers_title_over_index() {
        assert_eq!(
            WorksheetSelector::from_args(Some("Raw".into()), Some(2)),
            WorksheetSelector::Title("Raw".into())
        );
        assert_eq!(WorksheetSelector::from_args(None, Some(2)), WorksheetSelector::Index(2));
        assert_eq!(WorksheetSelector::from_args(None, None), WorksheetSelector::First);
    }

    #[test]
    fn range_quotes_titles() {
        assert_eq!(quote_range("Sheet1"), "'Sheet1'");
        assert_eq!(quote_range("Bob's tab"), "'Bob''s tab'");
    }

    #[test]
    fn cells_render_as_text() {
        assert_eq!(cell_text(&json!("abc")), "abc");
        assert_eq!(cell_text(&json!(12)), "12");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!(null)), "");
    }
}
