use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use hearthledger_lib::config::LedgerConfig;
use hearthledger_lib::export::{write_export, ExportFormat};
use hearthledger_lib::migrate::MigrationRegistry;
use hearthledger_lib::model::Item;
use hearthledger_lib::restore::{
    restore_from_file, write_restore_report, LocalFileAccess, RestoreContext, RestoreStatus,
    RestoreStrategy, RestoreSummary,
};
use hearthledger_lib::scoring::{documentation_report, ledger_rollup};
use hearthledger_lib::store::Store;
use hearthledger_lib::{logging, time};

#[derive(Debug, Parser)]
#[command(name = "hearthledger", about = "Home inventory ledger", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the schema version, entity counts and documentation totals.
    Status {
        /// Emit a JSON object instead of the text view.
        #[arg(long)]
        json: bool,
    },
    /// Write a backup or spreadsheet export of the whole ledger.
    Export {
        #[arg(long, value_enum, default_value_t = FormatArg::Structured)]
        format: FormatArg,
        /// Output directory; defaults to the ledger's backups directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Restore a structured backup into the ledger.
    Restore {
        file: PathBuf,
        #[arg(long, value_enum)]
        strategy: StrategyArg,
        /// Report what would change without committing anything.
        #[arg(long)]
        dry_run: bool,
        /// Emit the restore summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List items that are not yet documented for insurance.
    Report {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Structured,
    Tabular,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Structured => ExportFormat::Structured,
            FormatArg::Tabular => ExportFormat::Tabular,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Merge,
    Replace,
}

impl From<StrategyArg> for RestoreStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Merge => RestoreStrategy::Merge,
            StrategyArg::Replace => RestoreStrategy::Replace,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = LedgerConfig::load();
    let _guard = match logging::init(&config, true) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: file logging disabled: {err:#}");
            None
        }
    };

    // `_guard` flushes the file sink on drop; return instead of exiting.
    match run(cli.command, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &LedgerConfig) -> Result<u8> {
    let registry = MigrationRegistry::standard();
    let store = Store::open(config, &registry)
        .await
        .with_context(|| format!("open ledger at {}", config.data_dir.display()))?;

    match command {
        Commands::Status { json } => status(&store, json),
        Commands::Export { format, out } => {
            let out_dir = out.unwrap_or_else(|| config.backups_dir());
            let entry = write_export(
                store.snapshot(),
                format.into(),
                store.schema_version(),
                &out_dir,
            )
            .await
            .context("write export")?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(0)
        }
        Commands::Restore {
            file,
            strategy,
            dry_run,
            json,
        } => restore(&store, &registry, config, file, strategy.into(), dry_run, json).await,
        Commands::Report { json } => report(&store, json),
    }
}

fn status(store: &Store, emit_json: bool) -> Result<u8> {
    let graph = store.snapshot();
    let rollup = ledger_rollup(&graph);
    let last_modified = graph
        .records()
        .iter()
        .map(|record| record.updated_at())
        .max()
        .map(|ms| time::to_date(ms).to_rfc3339());

    if emit_json {
        let counts: serde_json::Map<String, serde_json::Value> = graph
            .counts()
            .into_iter()
            .map(|(kind, count)| (kind.collection().to_string(), json!(count)))
            .collect();
        let payload = json!({
            "schemaVersion": store.schema_version(),
            "counts": counts,
            "rollup": rollup,
            "lastModified": last_modified,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Schema version: {}", store.schema_version());
        for (kind, count) in graph.counts() {
            println!("{:<12} {count}", kind.collection());
        }
        println!(
            "Total value:  {} across {} items",
            rollup.total_value, rollup.item_count
        );
        println!(
            "Documented:   {} of {} (average score {:.2})",
            rollup.documented_count, rollup.item_count, rollup.average_score
        );
        if let Some(last) = last_modified {
            println!("Last change:  {last}");
        }
    }
    Ok(0)
}

async fn restore(
    store: &Store,
    registry: &MigrationRegistry,
    config: &LedgerConfig,
    file: PathBuf,
    strategy: RestoreStrategy,
    dry_run: bool,
    emit_json: bool,
) -> Result<u8> {
    let mut ctx = RestoreContext::new(store, registry).with_config(config);
    ctx.dry_run = dry_run;

    let cancel = ctx.cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let access = LocalFileAccess::new();
    let result = restore_from_file(&ctx, &access, &file, strategy).await;
    watcher.abort();
    let summary = result.with_context(|| format!("restore {}", file.display()))?;

    if !dry_run {
        let report = write_restore_report(&config.reports_dir(), Some(&file), &summary)
            .context("write restore report")?;
        tracing::info!(
            target: "hearthledger",
            event = "restore_report_written",
            path = %report.display()
        );
    }

    if emit_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(match summary.status {
        RestoreStatus::Completed if summary.errors.is_empty() => 0,
        _ => 2,
    })
}

fn print_summary(summary: &RestoreSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!(
        "Restore {}{mode}: {:?}",
        summary.strategy.as_str(),
        summary.status
    );
    println!(
        "  created {}, updated {}, unchanged {}, skipped {}, errors {}",
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.skipped.len(),
        summary.errors.len()
    );
    for skipped in &summary.skipped {
        println!("  skipped {} \"{}\": {}", skipped.entity.kind, skipped.name, skipped.reason);
    }
    for issue in &summary.errors {
        println!("  error {} [{}] {}", issue.entity, issue.code, issue.message);
    }
    for warning in &summary.warnings {
        println!("  warning: {warning}");
    }
    if let Some(path) = &summary.safety_backup {
        println!("  previous ledger saved to {}", path.display());
    }
}

fn report(store: &Store, emit_json: bool) -> Result<u8> {
    let graph = store.snapshot();
    let lines = documentation_report(&graph);
    if emit_json {
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(0);
    }
    if lines.is_empty() {
        println!("Every item is documented.");
        return Ok(0);
    }
    for line in &lines {
        let price = graph
            .get::<Item>(line.item_id)
            .and_then(|item| item.purchase_price)
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:.2}  {:<32} {:>10}  missing: {}",
            line.score,
            line.name,
            price,
            line.missing.join(", ")
        );
    }
    Ok(0)
}
