use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::args::Args;
use crate::sheets::WorksheetSelector;
use crate::sql::TableRef;
use crate::transform::Coercions;

/// Environment variables with this prefix override `db.json` keys,
/// e.g. `SHEET_LOADER_DB_PASSWORD`.
pub const DB_ENV_PREFIX: &str = "SHEET_LOADER_DB";

const WAREHOUSE_KEYS: &[&str] = &[
    "account", "user", "password", "warehouse", "role", "database", "schema", "host", "region", "port",
];

/// Snowflake connection settings read from `db.json`.
#[derive(Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    pub account: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Overrides `<account>[.<region>].snowflakecomputing.com`.
    #[serde(default)]
    pub host: Option<String>,
    /// Cloud region for accounts whose locator does not carry one.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("host", &self.host)
            .field("region", &self.region)
            .field("port", &self.port)
            .finish()
    }
}

impl WarehouseConfig {
    /// Loads the file strictly: missing required keys and unknown keys both
    /// fail here instead of at connect time.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading warehouse configuration from: {}", path.display());

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(true))
            .add_source(Environment::with_prefix(DB_ENV_PREFIX))
            .build()
            .with_context(|| format!("Failed to read warehouse config {}", path.display()))?;

        let config: WarehouseConfig = settings
            .try_deserialize()
            .with_context(|| {
                format!(
                    "Invalid warehouse config {} (supported keys: {})",
                    path.display(),
                    WAREHOUSE_KEYS.join(", ")
                )
            })?;
        config.validate()?;

        debug!("Loaded warehouse configuration: {:?}", config);
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            anyhow::bail!("warehouse config: account cannot be empty");
        }
        if self.user.trim().is_empty() {
            anyhow::bail!("warehouse config: user cannot be empty");
        }
        if self.port == Some(0) {
            anyhow::bail!("warehouse config: port must be between 1 and 65535");
        }
        Ok(())
    }
}

/// Everything one run needs, merged from the command line and `db.json`.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub target: TableRef,
    pub sheet_id: String,
    pub worksheet: WorksheetSelector,
    pub coercions: Coercions,
    pub service_account_file: PathBuf,
    pub batch_size: usize,
    pub verbose: bool,
    pub dry_run: bool,
    pub warehouse: WarehouseConfig,
}

impl Cfg {
    pub fn load(args: Args) -> Result<Self> {
        let warehouse = WarehouseConfig::load(&args.db_config)?;

        let cfg = Cfg {
            target: TableRef::new(args.schema, args.table),
            sheet_id: args.sheet,
            worksheet: WorksheetSelector::from_args(args.worksheet, args.worksheet_index),
            coercions: args.coercions.unwrap_or_default(),
            service_account_file: args.service_account_file,
            batch_size: args.batch_size,
            verbose: args.verbose,
            dry_run: args.dry_run,
            warehouse,
        };

        debug!("Final configuration: {:?}", cfg);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.schema.trim().is_empty() {
            anyhow::bail!("schema cannot be empty");
        }
        if self.target.table.trim().is_empty() {
            anyhow::bail!("table cannot be empty");
        }
        if self.sheet_id.trim().is_empty() {
            anyhow::bail!("sheet must be set to a Google Sheets ID");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be at least 1");
        }
        if !self.service_account_file.is_file() {
            anyhow::bail!(
                "service account file not found: {}",
                self.service_account_file.display()
            );
        }

        info!("Configuration validation passed");
        Ok(())
    }
}
