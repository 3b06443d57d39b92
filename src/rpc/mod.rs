/// RPC Client Module
///
/// This module handles all interactions with the Solana node. Blocks are
/// fetched with batched JSON-RPC `getBlock` requests, one request per slot,
/// correlated back to their slots through the request id.
///
/// Each concurrent worker owns its own client instance, built lazily through
/// `ProviderFactory` on the worker's first batch and reused for every batch
/// that worker processes.
use crate::batches::Batch;
use crate::errors::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_PROVIDER_URI: &str = "https://api.mainnet-beta.solana.com";

// Solana RPC error codes relevant to a historical backfill.
const RPC_BLOCK_NOT_AVAILABLE: i64 = -32004;
const RPC_SLOT_SKIPPED: i64 = -32007;
const RPC_LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;

/// Capability to fetch all blocks of one batch from the remote node.
#[async_trait]
pub trait BatchProvider: Send + Sync {
    /// Fetch the blocks of `batch`, ascending by slot. Slots skipped by the
    /// cluster are absent from the result; that is not an error.
    async fn fetch_blocks(&self, batch: &Batch) -> Result<Vec<RawBlockPayload>, FetchError>;
}

/// Produces one isolated provider instance per worker.
pub trait ProviderFactory: Send + Sync + 'static {
    type Provider: BatchProvider + 'static;

    fn provider(&self) -> Result<Self::Provider, FetchError>;
}

/// Raw `getBlock` response for one slot, as returned by the node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub blockhash: String,
    pub previous_blockhash: String,
    pub parent_slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Absent entirely when the node omits transaction details; an empty
    /// vector means the block really contains no transactions.
    #[serde(default)]
    pub transactions: Option<Vec<RawTransactionEntry>>,
}

/// One transaction entry inside a raw block
#[derive(Debug, Clone, Deserialize)]
pub struct RawTransactionEntry {
    #[serde(default)]
    pub meta: Option<RawTransactionMeta>,
    pub transaction: RawTransaction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionMeta {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    pub fee: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTransaction {
    pub signatures: Vec<String>,
    pub message: RawMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub account_keys: Vec<String>,
    pub instructions: Vec<RawInstruction>,
}

/// Compiled instruction: account references are indices into the message's
/// account keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInstruction {
    pub program_id_index: usize,
    pub accounts: Vec<usize>,
    pub data: String,
}

/// A fetched block tagged with the slot it was requested for
#[derive(Debug, Clone)]
pub struct RawBlockPayload {
    pub slot: u64,
    pub block: RawBlock,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (u64, BlockRequestConfig),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockRequestConfig {
    encoding: &'static str,
    transaction_details: &'static str,
    rewards: bool,
    max_supported_transaction_version: u8,
}

impl Default for BlockRequestConfig {
    fn default() -> Self {
        Self {
            encoding: "json",
            transaction_details: "full",
            rewards: false,
            max_supported_transaction_version: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<RawBlock>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Batched JSON-RPC client for one worker
pub struct BatchRpcClient {
    http: reqwest::Client,
    uri: String,
}

impl BatchRpcClient {
    /// Create a client with a per-request timeout. The underlying connection
    /// pool is reused across every batch this client fetches.
    pub fn new(uri: String, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, uri })
    }
}

#[async_trait]
impl BatchProvider for BatchRpcClient {
    async fn fetch_blocks(&self, batch: &Batch) -> Result<Vec<RawBlockPayload>, FetchError> {
        tracing::debug!("Fetching blocks for slots {}", batch);

        let requests: Vec<JsonRpcRequest> = batch
            .slots()
            .map(|slot| JsonRpcRequest {
                jsonrpc: "2.0",
                id: slot,
                method: "getBlock",
                params: (slot, BlockRequestConfig::default()),
            })
            .collect();

        let response = self
            .http
            .post(&self.uri)
            .json(&requests)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_http_status(status));
        }

        let responses: Vec<JsonRpcResponse> = response
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("failed to decode batch response: {}", e)))?;

        let payloads = correlate_batch_responses(batch, responses)?;
        tracing::debug!("Fetched {} blocks for slots {}", payloads.len(), batch);
        Ok(payloads)
    }
}

fn classify_request_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        FetchError::Transient(format!("request failed: {}", err))
    } else {
        FetchError::Fatal(format!("request failed: {}", err))
    }
}

fn classify_http_status(status: reqwest::StatusCode) -> FetchError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FetchError::Transient(format!("provider returned HTTP {}", status))
    } else {
        FetchError::Fatal(format!("provider returned HTTP {}", status))
    }
}

/// Match batch responses back to their slots and re-order them ascending.
///
/// The node may answer a batch in any order; the request id carries the slot.
/// Skipped slots produce no payload.
fn correlate_batch_responses(
    batch: &Batch,
    responses: Vec<JsonRpcResponse>,
) -> Result<Vec<RawBlockPayload>, FetchError> {
    let mut by_slot: BTreeMap<u64, JsonRpcResponse> = BTreeMap::new();
    for response in responses {
        by_slot.insert(response.id, response);
    }

    let mut payloads = Vec::new();
    for slot in batch.slots() {
        let Some(response) = by_slot.remove(&slot) else {
            return Err(FetchError::Transient(format!("batch response missing slot {}", slot)));
        };

        match (response.result, response.error) {
            (Some(block), _) => payloads.push(RawBlockPayload { slot, block }),
            (None, Some(err)) => match err.code {
                RPC_SLOT_SKIPPED | RPC_LONG_TERM_STORAGE_SLOT_SKIPPED => {
                    tracing::debug!("Slot {} was skipped by the cluster", slot);
                }
                RPC_BLOCK_NOT_AVAILABLE => {
                    return Err(FetchError::Transient(format!(
                        "block for slot {} not yet available: {}",
                        slot, err.message
                    )));
                }
                code => {
                    return Err(FetchError::Fatal(format!(
                        "RPC error {} for slot {}: {}",
                        code, slot, err.message
                    )));
                }
            },
            (None, None) => {
                return Err(FetchError::Fatal(format!("empty RPC response for slot {}", slot)));
            }
        }
    }

    Ok(payloads)
}

/// Factory handing each worker its own lazily-built RPC client.
pub struct RpcProviderFactory {
    uri: String,
    timeout: Duration,
}

impl RpcProviderFactory {
    pub fn new(uri: String, timeout: Duration) -> Self {
        Self { uri, timeout }
    }
}

impl ProviderFactory for RpcProviderFactory {
    type Provider = BatchRpcClient;

    fn provider(&self) -> Result<BatchRpcClient, FetchError> {
        BatchRpcClient::new(self.uri.clone(), self.timeout)
    }
}
