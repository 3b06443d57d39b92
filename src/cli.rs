/// CLI Module
///
/// Command-line interface configuration using clap.
use clap::Parser;

/// Solana Block Exporter
///
/// Export blocks, transactions and instructions for a slot range to files or
/// stdout as JSON lines
#[derive(Parser, Debug)]
#[command(name = "solana-block-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Start slot (inclusive)
    #[arg(short = 's', long, value_name = "SLOT", default_value = "0")]
    pub start_block: u64,

    /// End slot (inclusive)
    #[arg(short = 'e', long, value_name = "SLOT")]
    pub end_block: u64,

    /// The number of blocks to request from the provider at a time
    #[arg(short = 'b', long, value_name = "SIZE", default_value = "1")]
    pub batch_size: u64,

    /// RPC endpoint URL (overrides SOLANA_RPC_URL env var)
    #[arg(short = 'p', long, value_name = "URL")]
    pub provider_uri: Option<String>,

    /// The maximum number of concurrent fetch workers
    #[arg(short = 'w', long, value_name = "COUNT", default_value = "5")]
    pub max_workers: usize,

    /// Output for blocks. If not provided blocks will not be exported.
    /// Use "-" for stdout
    #[arg(long, value_name = "PATH")]
    pub blocks_output: Option<String>,

    /// Output for transactions. If not provided transactions will not be
    /// exported. Use "-" for stdout
    #[arg(long, value_name = "PATH")]
    pub transactions_output: Option<String>,

    /// Output for instructions. If not provided instructions will not be
    /// exported. Use "-" for stdout
    #[arg(long, value_name = "PATH")]
    pub instructions_output: Option<String>,

    /// Maximum number of fetch attempts per batch
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_retries: u32,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub request_timeout: u64,
}

impl Cli {
    /// Validate CLI arguments before anything touches the network
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.start_block > self.end_block {
            anyhow::bail!(
                "Start block ({}) must be less than or equal to end block ({})",
                self.start_block,
                self.end_block
            );
        }

        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.max_workers == 0 {
            anyhow::bail!("Max workers must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        if self.blocks_output.is_none() && self.transactions_output.is_none() {
            anyhow::bail!("Either --blocks-output or --transactions-output must be provided");
        }

        if self.instructions_output.is_some() && self.transactions_output.is_none() {
            anyhow::bail!("--instructions-output requires --transactions-output");
        }

        Ok(())
    }

    /// Resolve the provider URI: flag, then env var, then mainnet default
    pub fn resolve_provider_uri(&self) -> String {
        self.provider_uri
            .clone()
            .or_else(|| std::env::var("SOLANA_RPC_URL").ok())
            .unwrap_or_else(|| crate::rpc::DEFAULT_PROVIDER_URI.to_string())
    }
}
