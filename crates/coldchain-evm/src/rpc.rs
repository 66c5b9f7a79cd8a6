//! HTTP JSON-RPC ledger client.
//!
//! Implements [`LogSource`] (`eth_getLogs`, `eth_blockNumber`), [`PointQuery`]
//! (`eth_call` → `getShipmentStatus(bytes32)`) and [`BlockLookup`]
//! (`eth_getBlockByNumber`, `eth_getTransactionReceipt`) against one endpoint.
//! No retries happen here: rate-limit rejections are classified and handed to
//! the range fetcher, everything else is surfaced to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use coldchain_core::abi;
use coldchain_core::error::IndexerError;
use coldchain_core::snapshot::ShipmentStatus;
use coldchain_core::source::{BlockLookup, LedgerStatus, LogSource, PointQuery};
use coldchain_core::types::{BlockDetail, EntityKey, LogFilter, RawLogRecord, TxReceipt};

/// View function used for the point query.
pub const STATUS_CALL_SIGNATURE: &str = "getShipmentStatus(bytes32)";

/// JSON-RPC error codes providers use for "slow down".
const RATE_LIMIT_CODES: [i64; 3] = [429, -32005, -32600];

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "blockTimestamp", default)]
    pub block_timestamp: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Convert to the chain-agnostic record type.
    pub fn into_record(self) -> Result<RawLogRecord, IndexerError> {
        let bad = |field: &str, value: &str| {
            IndexerError::Transport(format!("bad {field} '{value}' in log {}", self.tx_hash))
        };
        let block_number =
            parse_hex_u64(&self.block_number).ok_or_else(|| bad("blockNumber", &self.block_number))?;
        let log_index = parse_hex_u64(&self.log_index)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| bad("logIndex", &self.log_index))?;
        let data = hex::decode(self.data.strip_prefix("0x").unwrap_or(&self.data))
            .map_err(|_| bad("data", &self.data))?;
        let block_timestamp = self.block_timestamp.as_deref().and_then(parse_hex_u64);
        Ok(RawLogRecord {
            address: self.address.to_ascii_lowercase(),
            topics: self.topics,
            data,
            block_number,
            tx_hash: self.tx_hash,
            log_index,
            block_timestamp,
        })
    }
}

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

fn hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Classify a JSON-RPC error object.
pub fn classify_rpc_error(code: i64, message: &str) -> IndexerError {
    let lower = message.to_ascii_lowercase();
    if RATE_LIMIT_CODES.contains(&code)
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("limit exceeded")
    {
        IndexerError::RateLimited {
            message: format!("{code}: {message}"),
        }
    } else {
        IndexerError::Transport(format!("RPC error {code}: {message}"))
    }
}

/// Convert an `eth_getBlockByNumber` result (hash-only transactions) to a [`BlockDetail`].
pub fn block_from_json(v: &Value) -> Option<BlockDetail> {
    let s = |k: &str| v[k].as_str().map(str::to_string);
    Some(BlockDetail {
        number: parse_hex_u64(v["number"].as_str()?)?,
        hash: s("hash")?,
        parent_hash: s("parentHash")?,
        timestamp: parse_hex_u64(v["timestamp"].as_str()?)?,
        transactions_root: s("transactionsRoot").unwrap_or_default(),
        receipts_root: s("receiptsRoot").unwrap_or_default(),
        state_root: s("stateRoot").unwrap_or_default(),
        tx_hashes: v["transactions"]
            .as_array()
            .map(|txs| {
                txs.iter()
                    .filter_map(|t| t.as_str().or_else(|| t["hash"].as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

/// Convert an `eth_getTransactionReceipt` result to a [`TxReceipt`].
pub fn receipt_from_json(v: &Value) -> Option<TxReceipt> {
    Some(TxReceipt {
        tx_hash: v["transactionHash"].as_str()?.to_string(),
        from: v["from"].as_str()?.to_string(),
        gas_used: parse_hex_u64(v["gasUsed"].as_str()?)?,
        status: v["status"].as_str().and_then(parse_hex_u64) == Some(1),
        block_number: parse_hex_u64(v["blockNumber"].as_str()?)?,
    })
}

/// Calldata for the status point query.
pub fn encode_status_call(key: &EntityKey) -> String {
    let mut data = abi::selector(STATUS_CALL_SIGNATURE).to_vec();
    data.extend(abi::Encoder::new().bytes32(*key.as_bytes()).finish());
    format!("0x{}", hex::encode(data))
}

/// Decode the `(bool exists, uint8 status, uint256 breachCount)` return value.
pub fn decode_status_result(hex_result: &str) -> Result<LedgerStatus, IndexerError> {
    let bytes = hex::decode(hex_result.strip_prefix("0x").unwrap_or(hex_result))
        .map_err(|e| IndexerError::Transport(format!("bad eth_call result: {e}")))?;
    let err = |e: abi::AbiError| IndexerError::Transport(format!("bad status tuple: {e}"));
    let exists = abi::read_bool(&bytes, 0).map_err(err)?;
    if !exists {
        return Ok(LedgerStatus::not_found());
    }
    Ok(LedgerStatus {
        exists,
        status: ShipmentStatus::from_index(abi::read_u64(&bytes, 1).map_err(err)?),
        breach_count: abi::read_u64(&bytes, 2).map_err(err)?,
    })
}

fn filter_json(filter: &LogFilter, from: u64, to: u64) -> Value {
    let topics: Vec<Value> = filter
        .topics
        .iter()
        .map(|t| t.as_ref().map_or(Value::Null, |t| Value::String(t.clone())))
        .collect();
    json!({
        "address": filter.address,
        "topics": topics,
        "fromBlock": hex_quantity(from),
        "toBlock": hex_quantity(to),
    })
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// JSON-RPC ledger client for one endpoint and one contract.
pub struct JsonRpcLedger {
    url: String,
    contract: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(
        url: impl Into<String>,
        contract: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            contract: contract.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request and return its `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Transport(format!("{method}: {e}")))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(IndexerError::RateLimited {
                message: format!("{method}: HTTP 429"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Transport(format!(
                "{method}: HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| IndexerError::Transport(format!("{method}: bad response body: {e}")))?;
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            let code = err["code"].as_i64().unwrap_or_default();
            let message = err["message"].as_str().unwrap_or("unknown error");
            return Err(classify_rpc_error(code, message));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl LogSource for JsonRpcLedger {
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogRecord>, IndexerError> {
        let result = self
            .call("eth_getLogs", vec![filter_json(filter, from, to)])
            .await?;
        let logs: Vec<RawLog> = serde_json::from_value(result)
            .map_err(|e| IndexerError::Transport(format!("eth_getLogs: {e}")))?;
        logs.into_iter()
            .filter(|l| !l.is_removed())
            .map(RawLog::into_record)
            .collect()
    }

    async fn block_height(&self) -> Result<u64, IndexerError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Transport(format!("eth_blockNumber: unexpected {result}")))
    }
}

#[async_trait]
impl PointQuery for JsonRpcLedger {
    async fn entity_status(&self, key: &EntityKey) -> Result<LedgerStatus, IndexerError> {
        let call = json!({ "to": self.contract, "data": encode_status_call(key) });
        let result = self.call("eth_call", vec![call, json!("latest")]).await?;
        let hex_result = result
            .as_str()
            .ok_or_else(|| IndexerError::Transport(format!("eth_call: unexpected {result}")))?;
        decode_status_result(hex_result)
    }
}

#[async_trait]
impl BlockLookup for JsonRpcLedger {
    async fn block(&self, number: u64) -> Result<Option<BlockDetail>, IndexerError> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(hex_quantity(number)), json!(false)],
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        block_from_json(&result)
            .map(Some)
            .ok_or_else(|| IndexerError::Transport(format!("malformed block {number}")))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, IndexerError> {
        let result = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        receipt_from_json(&result)
            .map(Some)
            .ok_or_else(|| IndexerError::Transport(format!("malformed receipt {tx_hash}")))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0x"), Some(0));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn raw_log_to_record() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xABCDEF0000000000000000000000000000000001",
            "topics": ["0x01"],
            "data": "0x00ff",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x0",
            "transactionHash": "0xdead",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap();
        let rec = log.into_record().unwrap();
        assert_eq!(rec.block_number, 5_000_000_000);
        assert_eq!(rec.log_index, 5);
        assert_eq!(rec.data, vec![0x00, 0xff]);
        assert_eq!(rec.address, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(rec.block_timestamp, None);
    }

    #[test]
    fn oversized_log_index_is_rejected() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xabcdef0000000000000000000000000000000001",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x1",
            "transactionHash": "0xbeef",
            "logIndex": "0x100000000"
        }))
        .unwrap();
        let err = log.into_record().unwrap_err();
        assert!(err.to_string().contains("logIndex"), "{err}");
    }

    #[test]
    fn rate_limit_codes_classified() {
        assert!(classify_rpc_error(429, "Too Many Requests").is_rate_limited());
        assert!(classify_rpc_error(-32005, "query returned more than 10000 results").is_rate_limited());
        assert!(classify_rpc_error(-32600, "invalid request").is_rate_limited());
        assert!(classify_rpc_error(-32000, "compute units limit exceeded").is_rate_limited());
        assert!(!classify_rpc_error(-32000, "execution reverted").is_rate_limited());
    }

    #[test]
    fn block_json() {
        let b = block_from_json(&json!({
            "number": "0x10",
            "hash": "0xb",
            "parentHash": "0xa",
            "timestamp": "0x64",
            "transactionsRoot": "0x1",
            "receiptsRoot": "0x2",
            "stateRoot": "0x3",
            "transactions": ["0xt1", "0xt2"]
        }))
        .unwrap();
        assert_eq!(b.number, 16);
        assert_eq!(b.timestamp, 100);
        assert_eq!(b.tx_hashes, vec!["0xt1", "0xt2"]);
    }

    #[test]
    fn receipt_json() {
        let r = receipt_from_json(&json!({
            "transactionHash": "0xt1",
            "from": "0xoracle",
            "gasUsed": "0x5208",
            "status": "0x1",
            "blockNumber": "0x10"
        }))
        .unwrap();
        assert_eq!(r.gas_used, 21_000);
        assert!(r.status);
        assert_eq!(r.block_number, 16);
    }

    #[test]
    fn status_call_roundtrip() {
        let key = EntityKey::from_shipment_id("SH-1");
        let call = encode_status_call(&key);
        // selector (8 hex) + one word (64 hex)
        assert_eq!(call.len(), 2 + 8 + 64);
        assert!(call.ends_with(&key.to_topic()[2..]));

        let ret = abi::Encoder::new().boolean(true).uint(3).uint(2).finish();
        let status = decode_status_result(&format!("0x{}", hex::encode(ret))).unwrap();
        assert_eq!(status.status, ShipmentStatus::Delivered);
        assert_eq!(status.breach_count, 2);

        let missing = abi::Encoder::new().boolean(false).uint(0).uint(0).finish();
        let status = decode_status_result(&format!("0x{}", hex::encode(missing))).unwrap();
        assert!(!status.exists);
    }

    #[test]
    fn filter_json_uses_null_wildcards() {
        let f = LogFilter::new("0xc0").topic("0xaa").any_topic();
        let v = filter_json(&f, 16, 31);
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "0x1f");
        assert_eq!(v["topics"], json!(["0xaa", null]));
    }
}
