/// Extract Module
///
/// Decodes a raw block payload into normalized block, transaction and
/// instruction records. Pure transform, no I/O: the same payload and
/// selection always produce the same records, with transaction and
/// instruction indices matching their order of appearance in the block.
use crate::errors::JobError;
use crate::models::{
    BlockRecord, ExportSelection, InstructionRecord, TransactionRecord, TransactionStatus,
};
use crate::rpc::{RawBlockPayload, RawTransactionEntry};

/// Records extracted from one block, populated per the export selection
#[derive(Debug, Clone)]
pub struct BlockOutput {
    pub slot: u64,
    pub block: Option<BlockRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub instructions: Vec<InstructionRecord>,
}

impl BlockOutput {
    pub fn record_count(&self) -> usize {
        self.block.is_some() as usize + self.transactions.len() + self.instructions.len()
    }
}

/// Extract the selected record kinds from one raw block payload.
///
/// A block that legitimately contains zero transactions yields an empty
/// transaction sequence; a payload whose transaction section is absent
/// entirely cannot satisfy any selection (every selection needs at least the
/// transaction count) and is malformed.
pub fn extract_block(
    payload: &RawBlockPayload,
    selection: ExportSelection,
) -> Result<BlockOutput, JobError> {
    let slot = payload.slot;

    let Some(entries) = payload.block.transactions.as_ref() else {
        return Err(JobError::MalformedBlock {
            slot,
            reason: "payload has no transaction section".to_string(),
        });
    };

    let block = selection.blocks.then(|| BlockRecord {
        slot,
        blockhash: payload.block.blockhash.clone(),
        previous_blockhash: payload.block.previous_blockhash.clone(),
        parent_slot: payload.block.parent_slot,
        block_time: payload.block.block_time,
        transaction_count: entries.len(),
    });

    let mut transactions = Vec::new();
    let mut instructions = Vec::new();

    if selection.transactions {
        for (index, entry) in entries.iter().enumerate() {
            let transaction = extract_transaction(slot, index, entry)?;

            if selection.instructions {
                extract_instructions(slot, &transaction.signature, entry, &mut instructions)?;
            }

            transactions.push(transaction);
        }
    }

    Ok(BlockOutput { slot, block, transactions, instructions })
}

fn extract_transaction(
    slot: u64,
    index: usize,
    entry: &RawTransactionEntry,
) -> Result<TransactionRecord, JobError> {
    let Some(signature) = entry.transaction.signatures.first() else {
        return Err(JobError::MalformedBlock {
            slot,
            reason: format!("transaction {} has no signatures", index),
        });
    };

    let Some(meta) = entry.meta.as_ref() else {
        return Err(JobError::MalformedBlock {
            slot,
            reason: format!("transaction {} has no meta", index),
        });
    };

    let status = if meta.err.is_none() { TransactionStatus::Success } else { TransactionStatus::Failure };

    Ok(TransactionRecord {
        signature: signature.clone(),
        block_slot: slot,
        transaction_index: index,
        status,
        fee: meta.fee,
        accounts: entry.transaction.message.account_keys.clone(),
    })
}

fn extract_instructions(
    slot: u64,
    signature: &str,
    entry: &RawTransactionEntry,
    out: &mut Vec<InstructionRecord>,
) -> Result<(), JobError> {
    let message = &entry.transaction.message;

    for (index, instruction) in message.instructions.iter().enumerate() {
        let program_id = resolve_account(slot, message, instruction.program_id_index)?;

        let mut accounts = Vec::with_capacity(instruction.accounts.len());
        for &account_index in &instruction.accounts {
            accounts.push(resolve_account(slot, message, account_index)?);
        }

        out.push(InstructionRecord {
            transaction_signature: signature.to_string(),
            block_slot: slot,
            instruction_index: index,
            program_id,
            accounts,
            data: instruction.data.clone(),
        });
    }

    Ok(())
}

/// Resolve a compiled account index against the message's account keys.
fn resolve_account(
    slot: u64,
    message: &crate::rpc::RawMessage,
    index: usize,
) -> Result<String, JobError> {
    message.account_keys.get(index).cloned().ok_or_else(|| JobError::MalformedBlock {
        slot,
        reason: format!("account index {} out of range ({} keys)", index, message.account_keys.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RawBlock;

    const SELECT_ALL: ExportSelection =
        ExportSelection { blocks: true, transactions: true, instructions: true };

    fn payload_with_transactions(transactions: serde_json::Value) -> RawBlockPayload {
        let block: RawBlock = serde_json::from_value(serde_json::json!({
            "blockhash": "hash200",
            "previousBlockhash": "hash199",
            "parentSlot": 199,
            "blockTime": 1_650_000_000,
            "transactions": transactions,
        }))
        .unwrap();

        RawBlockPayload { slot: 200, block }
    }

    fn sample_payload() -> RawBlockPayload {
        payload_with_transactions(serde_json::json!([
            {
                "meta": { "err": null, "fee": 5000 },
                "transaction": {
                    "signatures": ["sig-a"],
                    "message": {
                        "accountKeys": ["payer", "dest", "11111111111111111111111111111111"],
                        "instructions": [
                            { "programIdIndex": 2, "accounts": [0, 1], "data": "AQID" }
                        ]
                    }
                }
            },
            {
                "meta": { "err": { "InstructionError": [0, "Custom"] }, "fee": 5000 },
                "transaction": {
                    "signatures": ["sig-b"],
                    "message": {
                        "accountKeys": ["payer", "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA"],
                        "instructions": [
                            { "programIdIndex": 1, "accounts": [0], "data": "BQ==" }
                        ]
                    }
                }
            }
        ]))
    }

    #[test]
    fn test_extracts_all_selected_kinds() {
        let output = extract_block(&sample_payload(), SELECT_ALL).unwrap();

        let block = output.block.unwrap();
        assert_eq!(block.slot, 200);
        assert_eq!(block.blockhash, "hash200");
        assert_eq!(block.previous_blockhash, "hash199");
        assert_eq!(block.transaction_count, 2);

        assert_eq!(output.transactions.len(), 2);
        assert_eq!(output.transactions[0].signature, "sig-a");
        assert_eq!(output.transactions[0].transaction_index, 0);
        assert_eq!(output.transactions[0].status, TransactionStatus::Success);
        assert_eq!(output.transactions[1].status, TransactionStatus::Failure);
        assert_eq!(output.transactions[1].transaction_index, 1);

        assert_eq!(output.instructions.len(), 2);
        assert_eq!(output.instructions[0].program_id, "11111111111111111111111111111111");
        assert_eq!(output.instructions[0].accounts, vec!["payer", "dest"]);
        assert_eq!(output.instructions[0].instruction_index, 0);
        assert_eq!(output.instructions[1].transaction_signature, "sig-b");
    }

    #[test]
    fn test_selection_gates_each_record_kind() {
        let blocks_only = ExportSelection { blocks: true, transactions: false, instructions: false };
        let output = extract_block(&sample_payload(), blocks_only).unwrap();

        assert!(output.block.is_some());
        assert!(output.transactions.is_empty());
        assert!(output.instructions.is_empty());

        let txs_only = ExportSelection { blocks: false, transactions: true, instructions: false };
        let output = extract_block(&sample_payload(), txs_only).unwrap();

        assert!(output.block.is_none());
        assert_eq!(output.transactions.len(), 2);
        assert!(output.instructions.is_empty());
    }

    #[test]
    fn test_zero_transactions_is_valid() {
        let payload = payload_with_transactions(serde_json::json!([]));
        let output = extract_block(&payload, SELECT_ALL).unwrap();

        assert_eq!(output.block.unwrap().transaction_count, 0);
        assert!(output.transactions.is_empty());
    }

    #[test]
    fn test_missing_transaction_section_is_malformed() {
        let block: RawBlock = serde_json::from_value(serde_json::json!({
            "blockhash": "hash200",
            "previousBlockhash": "hash199",
            "parentSlot": 199,
        }))
        .unwrap();
        let payload = RawBlockPayload { slot: 200, block };

        let err = extract_block(&payload, SELECT_ALL).unwrap_err();
        assert!(matches!(err, JobError::MalformedBlock { slot: 200, .. }));
    }

    #[test]
    fn test_missing_meta_is_malformed() {
        let payload = payload_with_transactions(serde_json::json!([
            {
                "transaction": {
                    "signatures": ["sig-a"],
                    "message": { "accountKeys": ["payer"], "instructions": [] }
                }
            }
        ]));

        assert!(extract_block(&payload, SELECT_ALL).is_err());
    }

    #[test]
    fn test_account_index_out_of_range_is_malformed() {
        let payload = payload_with_transactions(serde_json::json!([
            {
                "meta": { "err": null, "fee": 5000 },
                "transaction": {
                    "signatures": ["sig-a"],
                    "message": {
                        "accountKeys": ["payer"],
                        "instructions": [
                            { "programIdIndex": 7, "accounts": [], "data": "AQID" }
                        ]
                    }
                }
            }
        ]));

        let err = extract_block(&payload, SELECT_ALL).unwrap_err();
        assert!(matches!(err, JobError::MalformedBlock { .. }));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let payload = sample_payload();
        let first = extract_block(&payload, SELECT_ALL).unwrap();
        let second = extract_block(&payload, SELECT_ALL).unwrap();

        assert_eq!(first.block, second.block);
        assert_eq!(first.transactions, second.transactions);
        assert_eq!(first.instructions, second.instructions);
    }
}
