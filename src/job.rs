use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Write;
use tracing::{debug, info, warn};

use crate::{
    cfg::Cfg,
    sheets::WorksheetSource,
    sql::build_statements,
    transform::{apply_coercions, build_records},
    warehouse::{Connect, Warehouse},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub source: String,
    pub records: usize,
    pub statements: usize,
    pub executed: usize,
}

/// Read the sheet, coerce, build SQL, then print and/or execute it.
/// Printed statements go to `out`, which is stdout for the binary.
pub async fn run_job<S, C, O>(cfg: &Cfg, source: &S, connector: &C, out: &mut O) -> Result<JobSummary>
where
    S: WorksheetSource,
    C: Connect,
    O: Write,
{
    info!("Starting job execution");

    let imported_at = Utc::now();

    let worksheet = source.read_worksheet(&cfg.sheet_id, &cfg.worksheet).await?;
    let rows = worksheet.to_rows();
    info!("Read {} rows from worksheet '{}'", rows.len(), worksheet.title);

    if !cfg.coercions.is_empty() {
        debug!("Applying {} coercions", cfg.coercions.len());
    }
    let coerced = apply_coercions(&rows, &cfg.coercions).context("Failed to coerce worksheet values")?;

    let records = build_records(&worksheet.title, imported_at, coerced);
    let statements = build_statements(&cfg.target, &records, cfg.batch_size)?;

    let mut summary = JobSummary {
        source: worksheet.title.clone(),
        records: records.len(),
        statements: statements.len(),
        executed: 0,
    };

    if cfg.dry_run {
        info!("Dry run: {} statements not sent to the warehouse", statements.len());
        if cfg.verbose {
            for statement in &statements {
                writeln!(out, "{}", statement)?;
            }
            out.flush()?;
        }
        return Ok(summary);
    }

    let mut warehouse = connector
        .connect()
        .await
        .context("Failed to connect to the warehouse")?;

    let outcome = execute_statements(&mut warehouse, &statements, cfg.verbose, out).await;
    if let Err(e) = warehouse.close().await {
        warn!("Failed to close warehouse session: {}", e);
    }
    summary.executed = outcome?;

    info!(
        "Job completed successfully. Loaded {} records into {}",
        summary.records, cfg.target
    );
    Ok(summary)
}

/// Runs statements in order, stopping at the first failure.
pub async fn execute_statements<W, O>(
    warehouse: &mut W,
    statements: &[String],
    verbose: bool,
    out: &mut O,
) -> Result<usize>
where
    W: Warehouse,
    O: Write,
{
    for (i, statement) in statements.iter().enumerate() {
        if verbose {
            writeln!(out, "{}", statement)?;
            out.flush()?;
        }
        debug!("Executing statement {}/{}", i + 1, statements.len());
        warehouse
            .execute(statement)
            .await
            .with_context(|| format!("Statement {} of {} failed", i + 1, statements.len()))?;
    }
    Ok(statements.len())
}
