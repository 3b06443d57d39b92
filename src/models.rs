/// Data Models Module
///
/// This module defines the normalized records the exporter emits. Each record
/// kind carries an `item_type` tag so mixed sinks (e.g. everything to stdout)
/// stay self-describing.
use serde::{Deserialize, Serialize};

/// Represents a normalized Solana block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub slot: u64,
    pub blockhash: String,
    pub previous_blockhash: String,
    pub parent_slot: u64,
    pub block_time: Option<i64>,
    pub transaction_count: usize,
}

/// Outcome of a transaction as recorded in its meta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failure,
}

/// Represents a normalized transaction within a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    pub block_slot: u64,
    pub transaction_index: usize,
    pub status: TransactionStatus,
    pub fee: u64,
    pub accounts: Vec<String>,
}

/// Represents a normalized instruction within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub transaction_signature: String,
    pub block_slot: u64,
    pub instruction_index: usize,
    pub program_id: String,
    pub accounts: Vec<String>,
    /// Base58-encoded instruction data, as the node returns it.
    pub data: String,
}

/// Tagged envelope routed to the item exporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum Record {
    Block(BlockRecord),
    Transaction(TransactionRecord),
    Instruction(InstructionRecord),
}

/// Which record kinds the job exports. Fixed for the job's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSelection {
    pub blocks: bool,
    pub transactions: bool,
    pub instructions: bool,
}

impl ExportSelection {
    /// Check the selection flags before the job is accepted.
    ///
    /// At least one of blocks/transactions must be requested, and
    /// instructions are addressed via their parent transaction so they
    /// require the transaction stream.
    pub fn validate(&self) -> Result<(), crate::errors::JobError> {
        if !self.blocks && !self.transactions {
            return Err(crate::errors::JobError::Configuration(
                "at least one of blocks or transactions output must be requested".to_string(),
            ));
        }

        if self.instructions && !self.transactions {
            return Err(crate::errors::JobError::Configuration(
                "instructions output requires transactions output".to_string(),
            ));
        }

        Ok(())
    }
}
