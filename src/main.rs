/// Solana Block Exporter
///
/// An ETL pipeline for exporting Solana blocks, transactions and instructions
/// over batched RPC to files or stdout.
mod batches;
mod cli;
mod errors;
mod etl;
mod models;
mod pipeline;
mod rpc;

use anyhow::{Context, Result};
use batches::BlockRange;
use clap::Parser;
use etl::load::{CompositeExporter, Output};
use pipeline::{ExportJob, JobConfig, RetryPolicy};
use rpc::RpcProviderFactory;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = cli::Cli::parse();
    args.validate().context("Invalid arguments")?;

    let provider_uri = args.resolve_provider_uri();

    println!("🚀 Starting Solana Block Exporter...");
    println!("🔗 Provider: {}", provider_uri);
    println!("📍 Slot range: {} to {}", format_number(args.start_block), format_number(args.end_block));
    println!("⏰ Started: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));

    let exporter = CompositeExporter::new(
        args.blocks_output.as_deref().map(Output::parse),
        args.transactions_output.as_deref().map(Output::parse),
        args.instructions_output.as_deref().map(Output::parse),
    );
    let selection = exporter.selection();

    let factory = RpcProviderFactory::new(provider_uri, Duration::from_secs(args.request_timeout));

    let config = JobConfig {
        range: BlockRange::new(args.start_block, args.end_block).context("Invalid slot range")?,
        batch_size: args.batch_size,
        max_workers: args.max_workers,
        selection,
        retry: RetryPolicy { max_attempts: args.max_retries, ..RetryPolicy::default() },
    };

    tracing::info!("Solana Block Exporter initialized successfully");

    let job = ExportJob::new(config, factory, exporter);
    let stats = job.run().await.context("Export job failed")?;

    stats.print_summary();
    println!("\n✨ Export complete!");

    Ok(())
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
