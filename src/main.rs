//! Comanda CLI entry point.
//!
//! Provides `import`, `scan`, `analyze`, and `orders` subcommands for
//! seeding the catalog, flagging unknown words, extracting draft orders
//! from a message, and listing what was saved.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use comanda::catalog::{CatalogSnapshot, CatalogStore};
use comanda::completion::gemini::GeminiService;
use comanda::config::ComandaConfig;
use comanda::orders::{CardState, DraftOrderCard};
use comanda::pipeline::validator::ItemStatus;
use comanda::scanner::{self, ScanReport, UnknownKind};
use comanda::session::AnalysisSession;
use comanda::store::SqliteStore;

/// Comanda — turn free-text order messages into structured draft orders.
#[derive(Parser)]
#[command(name = "comanda", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Import a catalog JSON file into the database.
    Import {
        /// Path to the catalog JSON file.
        file: PathBuf,
    },
    /// Flag unknown words in a message without calling the model.
    Scan {
        /// The message text to scan.
        message: String,
        /// Read the catalog from a JSON file instead of the database.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Extract draft orders from a message.
    Analyze {
        /// The message text to analyze.
        message: String,
        /// Persist every card after extraction; refuses if any needs review.
        #[arg(long)]
        save: bool,
        /// Structure the raw message in one call, skipping the breakdown phase.
        #[arg(long)]
        single_call: bool,
    },
    /// List recently saved orders.
    Orders {
        /// Maximum number of orders to list.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ComandaConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Import { file } => {
            comanda::logging::init_cli(&config.log.level);
            handle_import(&config, &file).await
        }
        Command::Scan { message, catalog } => {
            comanda::logging::init_cli(&config.log.level);
            handle_scan(&config, &message, catalog.as_deref()).await
        }
        Command::Analyze {
            message,
            save,
            single_call,
        } => {
            let _logging_guard =
                comanda::logging::init_analysis(&config.logs_dir(), &config.log.level)?;
            handle_analyze(&config, &message, save, single_call).await
        }
        Command::Orders { limit } => {
            comanda::logging::init_cli(&config.log.level);
            handle_orders(&config, limit).await
        }
    }
}

/// Import a catalog JSON file into the database.
async fn handle_import(config: &ComandaConfig, file: &Path) -> anyhow::Result<()> {
    let catalog = read_catalog_file(file)?;
    let store = SqliteStore::open(&config.db_path()).await?;
    let counts = store.import_catalog(&catalog).await?;
    println!(
        "imported {} clients, {} products, {} variants",
        counts.clients, counts.products, counts.variants
    );
    Ok(())
}

/// Scan a message against the catalog without touching the model.
async fn handle_scan(
    config: &ComandaConfig,
    message: &str,
    catalog_file: Option<&Path>,
) -> anyhow::Result<()> {
    let catalog = match catalog_file {
        Some(path) => read_catalog_file(path)?,
        None => {
            let store = SqliteStore::open(&config.db_path()).await?;
            store.load_catalog().await?
        }
    };
    let report = scanner::scan(message, &catalog);
    print_scan_report(&report);
    Ok(())
}

/// Run the full extraction pipeline and print the resulting cards.
async fn handle_analyze(
    config: &ComandaConfig,
    message: &str,
    save: bool,
    single_call: bool,
) -> anyhow::Result<()> {
    let api_key = config
        .completion
        .api_key
        .clone()
        .context("no API key configured; set COMANDA_API_KEY or [completion].api_key")?;

    let mut service = GeminiService::new(config.completion.model.clone(), api_key);
    service.base_url = config.completion.base_url.clone();

    let mut analysis = config.analysis_config();
    if single_call {
        analysis.single_call = true;
    }

    let store = Arc::new(SqliteStore::open(&config.db_path()).await?);
    let session = Arc::new(AnalysisSession::new(Arc::new(service), store, analysis));

    // Instant feedback before the model runs.
    let scan_report = session.scan(message).await?;
    print_scan_report(&scan_report);

    let poller = tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if let Some(snapshot) = session.progress() {
                    if snapshot.stage.is_terminal() {
                        break;
                    }
                    info!(
                        stage = snapshot.stage.label(),
                        percent = snapshot.percent,
                        "working"
                    );
                }
            }
        }
    });

    let result = session.analyze(message).await;
    poller.abort();
    let report = result.context("analysis failed")?;

    let catalog = session.catalog();
    print_cards(&report.cards, &catalog);

    if save {
        let order_ids = session
            .save_all()
            .await
            .context("save refused; resolve the flagged cards first")?;
        println!("saved {} order(s)", order_ids.len());
    }
    Ok(())
}

/// List recently saved orders.
async fn handle_orders(config: &ComandaConfig, limit: i64) -> anyhow::Result<()> {
    let store = SqliteStore::open(&config.db_path()).await?;
    let orders = store.recent_orders(limit).await?;
    if orders.is_empty() {
        println!("no saved orders");
        return Ok(());
    }
    for order in &orders {
        let paid = if order.paid { "paid" } else { "unpaid" };
        println!(
            "{}  {}  {} item(s)  {:.2}  {}  {}",
            order.created_at, order.client_name, order.item_count, order.total, paid, order.id
        );
    }
    Ok(())
}

/// Read and parse a catalog JSON file.
fn read_catalog_file(path: &Path) -> anyhow::Result<CatalogSnapshot> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse catalog JSON in {}", path.display()))
}

/// Print the scan report: the message with unknown words marked, then the list.
fn print_scan_report(report: &ScanReport) {
    if report.unknown.is_empty() {
        println!("no unknown words");
        return;
    }
    let rendered: String = report
        .segments
        .iter()
        .map(|segment| {
            if segment.highlighted {
                format!("[{}]", segment.text)
            } else {
                segment.text.clone()
            }
        })
        .collect();
    println!("{rendered}");
    println!("unknown words:");
    for token in &report.unknown {
        let kind = match token.kind {
            UnknownKind::Client => "client?",
            UnknownKind::Product => "product?",
        };
        println!("  {}  ({kind})", token.word);
    }
}

/// Print the draft cards with their review status and totals.
fn print_cards(cards: &[DraftOrderCard], catalog: &CatalogSnapshot) {
    if cards.is_empty() {
        println!("no orders found in the message");
        return;
    }
    for (index, card) in cards.iter().enumerate() {
        let marker = match card.state {
            CardState::Saved => "saved",
            CardState::Pending if card.is_complete() => "ready",
            CardState::Pending => "needs review",
        };
        println!("card {index}: {}  [{marker}]", card.client.name);
        for item in &card.items {
            let variant = item
                .variant
                .as_ref()
                .map(|v| format!(" ({})", v.name))
                .unwrap_or_default();
            let flag = match item.status {
                ItemStatus::Ambiguous => "  <- choose",
                ItemStatus::Confirmed => "",
            };
            println!("  {} x {}{variant}{flag}", item.quantity, item.product.name);
        }
        println!("  total: {:.2}", card.total(catalog));
    }
}
