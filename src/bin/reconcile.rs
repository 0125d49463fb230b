//! Manual reconciliation tool.
//!
//! The webhook channel can fail silently; this binary re-queries the
//! gateway for one payment attempt (or every stale pending
//! transaction) and corrects local drift through the same guarded
//! transitions the webhook uses.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};

use robux_shop_api::{
    config,
    db,
    entities::robux_transaction::{self, TransactionStatus},
    events,
    handlers::AppServices,
};

#[derive(Parser)]
#[command(name = "reconcile", about = "Reconcile payments against the gateway")]
struct Cli {
    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a single payment attempt by merchant reference
    One { merchant_ref: String },
    /// Reconcile pending transactions that have a payment attempt
    Pending {
        /// Maximum number of transactions to check
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let app_config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    let db_pool = Arc::new(
        db::establish_connection_from_app_config(&app_config)
            .await
            .context("failed to connect to the database")?,
    );

    let (event_sender, event_receiver) = events::channel(app_config.event_channel_capacity);
    let _event_task = events::spawn_event_logger(event_receiver);

    let services = AppServices::new(db_pool.clone(), event_sender, &app_config)
        .context("failed to build services")?;

    match cli.command {
        Commands::One { merchant_ref } => {
            let report = services
                .transactions
                .reconcile(&merchant_ref)
                .await
                .with_context(|| format!("reconciliation of {} failed", merchant_ref))?;
            print_report(&report, cli.json)?;
        }
        Commands::Pending { limit } => {
            let stale = robux_transaction::Entity::find()
                .filter(robux_transaction::Column::Status.eq(TransactionStatus::Pending))
                .filter(robux_transaction::Column::MerchantRef.is_not_null())
                .order_by_asc(robux_transaction::Column::CreatedAt)
                .limit(limit)
                .all(&*db_pool)
                .await
                .context("failed to list pending transactions")?;

            if stale.is_empty() {
                eprintln!("no pending transactions with a payment attempt");
                return Ok(());
            }

            let mut corrected = 0usize;
            for tx in &stale {
                let Some(merchant_ref) = tx.merchant_ref.as_deref() else {
                    continue;
                };
                match services.transactions.reconcile(merchant_ref).await {
                    Ok(report) => {
                        if report.corrected {
                            corrected += 1;
                        }
                        print_report(&report, cli.json)?;
                    }
                    Err(e) => {
                        eprintln!("{}: reconciliation failed: {}", merchant_ref, e);
                    }
                }
            }
            eprintln!(
                "checked {} transaction(s), corrected {}",
                stale.len(),
                corrected
            );
        }
    }

    Ok(())
}

fn print_report(
    report: &robux_shop_api::services::transactions::ReconciliationReport,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "{}: gateway={} local={} corrected={}",
            report.merchant_ref, report.gateway_status, report.local_status, report.corrected
        );
    }
    Ok(())
}
