//! Batch command - ingest many invoice documents over the bounded
//! worker pool.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use uuid::Uuid;

use invrec_core::{CancelHandle, IncomingDocument, Invoice, InvoiceStatus, SubmissionOutcome};

use super::{Service, build_service, load_config, read_document};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Number of parallel workers (overrides config)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Write a summary CSV to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Use the mock provider (input files hold extraction JSON)
    #[arg(long)]
    mock: bool,

    /// Finalize every invoice that validated cleanly
    #[arg(long)]
    finalize: bool,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut config = load_config(config_path)?;
    if let Some(jobs) = args.jobs {
        config.pipeline.max_concurrent_documents = jobs.max(1);
    }
    let service = build_service(config, args.mock)?;

    let files: Vec<PathBuf> = glob(&args.input)?.filter_map(|r| r.ok()).collect();
    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }
    println!(
        "{} Found {} files to submit",
        style("ℹ").blue(),
        files.len()
    );

    let mut documents: Vec<IncomingDocument> = Vec::with_capacity(files.len());
    for path in &files {
        match read_document(path, None, args.mock) {
            Ok(document) => documents.push(document),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    // Ctrl-C stops documents that have not started yet; in-flight ones
    // run to completion.
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("Submitting {} documents", documents.len()));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let outcomes = service.bulk_submit(documents, &cancel).await;
    pb.finish_and_clear();

    let mut rows = Vec::with_capacity(outcomes.len());
    for outcome in &outcomes {
        let invoice = match outcome.invoice_id {
            Some(id) => Some(service.get_invoice(id).await?),
            None => None,
        };
        rows.push((outcome.clone(), invoice));
    }

    print_summary(&rows);

    if args.finalize {
        finalize_validated(&service, &rows).await?;
    }

    let alerts = service.list_price_alerts(None).await?;
    if !alerts.is_empty() {
        println!();
        println!("{}", style("Price alerts:").red());
        for alert in &alerts {
            println!(
                "  - invoice {} item {}: {} -> {}",
                alert.invoice_id, alert.item_key, alert.baseline_price, alert.observed_price
            );
        }
    }

    if let Some(summary_path) = &args.summary {
        write_summary(summary_path, &rows)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        rows.len(),
        start.elapsed()
    );
    Ok(())
}

fn print_summary(rows: &[(SubmissionOutcome, Option<Invoice>)]) {
    let mut validated = 0usize;
    let mut pending = 0usize;
    let mut parked = 0usize;
    let mut finalized = 0usize;
    let mut failed = 0usize;
    for (outcome, invoice) in rows {
        match invoice {
            Some(invoice) => match invoice.status {
                InvoiceStatus::Validated => validated += 1,
                InvoiceStatus::PendingReview => pending += 1,
                InvoiceStatus::Draft => parked += 1,
                InvoiceStatus::Finalized => finalized += 1,
                InvoiceStatus::Deleted => {}
            },
            None => {
                failed += 1;
                println!(
                    "  {} {}: {}",
                    style("✗").red(),
                    outcome.file_name.as_deref().unwrap_or("<unnamed>"),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    println!(
        "   {} validated, {} pending review, {} parked, {} finalized, {} failed",
        style(validated).green(),
        style(pending).yellow(),
        style(parked).yellow(),
        style(finalized).green(),
        style(failed).red()
    );
}

async fn finalize_validated(
    service: &Service,
    rows: &[(SubmissionOutcome, Option<Invoice>)],
) -> anyhow::Result<()> {
    let ids: Vec<Uuid> = rows
        .iter()
        .filter_map(|(_, invoice)| invoice.as_ref())
        .filter(|invoice| invoice.status == InvoiceStatus::Validated)
        .map(|invoice| invoice.id)
        .collect();
    if ids.is_empty() {
        return Ok(());
    }

    let results = service.bulk_finalize(&ids).await?;
    let ok = results.iter().filter(|r| r.error.is_none()).count();
    println!(
        "{} Finalized {}/{} validated invoices",
        style("✓").green(),
        ok,
        results.len()
    );
    for result in results.iter().filter(|r| r.error.is_some()) {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            result.invoice_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn write_summary(
    path: &PathBuf,
    rows: &[(SubmissionOutcome, Option<Invoice>)],
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "file",
        "invoice_id",
        "status",
        "supplier_resolved",
        "total",
        "missing_fields",
        "error",
    ])?;
    for (outcome, invoice) in rows {
        let file = outcome.file_name.clone().unwrap_or_default();
        match invoice {
            Some(invoice) => {
                writer.write_record([
                    file.as_str(),
                    &invoice.id.to_string(),
                    invoice.status.as_str(),
                    if invoice.supplier.is_resolved() { "yes" } else { "no" },
                    &invoice.total_amount().to_string(),
                    &invoice
                        .missing_fields
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(";"),
                    "",
                ])?;
            }
            None => {
                writer.write_record([
                    file.as_str(),
                    "",
                    "",
                    "",
                    "",
                    "",
                    outcome.error.as_deref().unwrap_or("unknown error"),
                ])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}
