//! Submit command - ingest a single invoice document.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use rust_decimal::Decimal;
use tracing::info;

use invrec_core::{Invoice, InvoiceStatus};

use super::{Service, build_service, load_config, read_document};

/// Arguments for the submit command.
#[derive(Args)]
pub struct SubmitArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Free-form hints forwarded to the extraction provider
    #[arg(long)]
    hints: Option<String>,

    /// Use the mock provider (input file holds the extraction JSON)
    #[arg(long)]
    mock: bool,

    /// Finalize the invoice if it validates cleanly
    #[arg(long)]
    finalize: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

pub async fn run(args: SubmitArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = load_config(config_path)?;
    let service = build_service(config, args.mock)?;

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    info!("Submitting file: {}", args.input.display());
    let document = read_document(&args.input, args.hints.clone(), args.mock)?;
    let invoice_id = service.submit_document(document).await?;
    let mut invoice = service.get_invoice(invoice_id).await?;

    if args.finalize && invoice.status == InvoiceStatus::Validated {
        invoice = service.finalize(invoice_id, invoice.version).await?;
    }

    let output = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&invoice)?,
        OutputFormat::Text => format_invoice_text(&invoice),
    };

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    print_followups(&service, &invoice).await?;
    println!(
        "{} Submitted in {:?}",
        style("✓").green(),
        start.elapsed()
    );
    Ok(())
}

fn format_invoice_text(invoice: &Invoice) -> String {
    let mut out = String::new();
    out.push_str(&format!("Invoice:     {}\n", invoice.id));
    out.push_str(&format!("Status:      {}\n", invoice.status.as_str()));
    if let Some(doc_ref) = &invoice.document_ref {
        out.push_str(&format!("Reference:   {}\n", doc_ref));
    }
    if let Some(date) = invoice.issue_date {
        out.push_str(&format!("Issue date:  {}\n", date));
    }
    out.push_str(&format!("Total:       {}\n", invoice.total_amount()));
    out.push_str(&format!(
        "Confidence:  {:.2}{}\n",
        invoice.extraction_confidence,
        if invoice.low_confidence { " (low)" } else { "" }
    ));
    if let Some(error) = &invoice.parked_error {
        out.push_str(&format!("Parked:      {}\n", error));
    }
    if !invoice.missing_fields.is_empty() {
        out.push_str("Missing fields:\n");
        for field in &invoice.missing_fields {
            out.push_str(&format!("  - {}\n", field));
        }
    }
    for warning in &invoice.extraction_warnings {
        out.push_str(&format!("Warning:     {}\n", warning));
    }
    out
}

async fn print_followups(service: &Service, invoice: &Invoice) -> anyhow::Result<()> {
    if invoice.has_major_deviation() {
        let alerts = service
            .list_price_alerts(invoice.supplier.resolved_id())
            .await?;
        for alert in alerts.iter().filter(|a| a.invoice_id == invoice.id) {
            println!(
                "{} Price alert: {} moved {} -> {} ({}%)",
                style("!").red(),
                alert.item_key,
                alert.baseline_price,
                alert.observed_price,
                alert.deviation_pct * Decimal::ONE_HUNDRED
            );
        }
    }
    Ok(())
}
