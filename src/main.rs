use anyhow::Result;
use clap::Parser;
use tracing::info;

mod args;
mod auth;
mod cfg;
mod job;
mod sheets;
mod sql;
mod transform;
mod warehouse;

use args::Args;
use cfg::Cfg;
use sheets::GoogleSheets;

#[tokio::main]
async fn main() -> Result<()> {
    // --coercions is parsed and validated here, before any file or network access
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting sheet_loader");

    let cfg = Cfg::load(args)?;
    cfg.validate()?;

    let hub = auth::create_sheets_hub(&cfg.service_account_file).await?;
    let source = GoogleSheets::new(hub);

    let summary = job::run_job(&cfg, &source, &cfg.warehouse, &mut std::io::stdout()).await?;

    info!(
        "sheet_loader completed successfully: {} records from '{}', {} of {} statements executed{}",
        summary.records,
        summary.source,
        summary.executed,
        summary.statements,
        if cfg.dry_run { " (dry run)" } else { "" }
    );
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    // stdout is reserved for the SQL printed by --verbose
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
