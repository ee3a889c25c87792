//! Common types for eoshistory-sync
//!
//! Raw records (`RawBlock`, `RawTransaction`) mirror the JSON bodies returned by
//! the chain node and are parsed with explicit constructors. Stored records
//! (`Block`, `Transaction`, `Action`) are what a [`crate::HistoryStore`] persists.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;
use std::time::Duration;

use crate::{SyncError, SyncResult};

/// The only transaction status eligible for import.
pub const EXECUTED_STATUS: &str = "executed";

fn empty_list() -> Value {
    Value::Array(Vec::new())
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Parse a chain timestamp. Nodes return naive UTC times such as
/// `2019-06-01T12:00:00.500`; RFC 3339 strings are accepted as well.
pub fn parse_chain_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| SyncError::InvalidInput(format!("Invalid block timestamp '{}': {}", raw, e)))
}

/// Block as returned by the node's `get_block` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBlock {
    pub block_num: u64,
    pub timestamp: String,
    #[serde(default)]
    pub producer: String,
    #[serde(default)]
    pub confirmed: u64,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub transaction_mroot: Option<String>,
    #[serde(default)]
    pub action_mroot: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub schedule_version: u64,
    #[serde(default)]
    pub new_producers: Value,
    #[serde(default = "empty_list")]
    pub header_extensions: Value,
    #[serde(default)]
    pub producer_signature: Option<String>,
    #[serde(default)]
    pub ref_block_prefix: u64,
    /// Transaction receipts, parsed one at a time by the importer so that a
    /// single malformed entry only affects itself.
    #[serde(default)]
    pub transactions: Vec<Value>,
}

impl RawBlock {
    /// Parse a node response. Unknown keys are ignored.
    pub fn from_json(value: Value) -> SyncResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| SyncError::InvalidInput(format!("Malformed block response: {}", e)))
    }
}

/// One entry of a raw block's `transactions` list.
///
/// `trx` is either a bare transaction id (deferred transactions) or an object
/// carrying the signed transaction and its decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub status: String,
    pub cpu_usage_us: u64,
    pub net_usage_words: u64,
    pub id: Option<String>,
    pub signatures: Vec<String>,
    pub compression: String,
    pub context_free_data: Vec<Value>,
    pub packed_trx: Option<String>,
    pub body: Option<Value>,
}

impl RawTransaction {
    pub fn from_json(value: &Value) -> SyncResult<Self> {
        let entry = value.as_object().ok_or_else(|| {
            SyncError::InvalidInput(format!("Transaction entry is not an object: {}", value))
        })?;

        let mut tx = RawTransaction {
            status: entry
                .get("status")
                .and_then(value_to_string)
                .unwrap_or_default(),
            cpu_usage_us: entry.get("cpu_usage_us").and_then(Value::as_u64).unwrap_or(0),
            net_usage_words: entry
                .get("net_usage_words")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            id: None,
            signatures: Vec::new(),
            compression: "none".to_string(),
            context_free_data: Vec::new(),
            packed_trx: None,
            body: None,
        };

        match entry.get("trx") {
            Some(Value::String(id)) => tx.id = Some(id.clone()),
            Some(Value::Object(trx)) => {
                tx.id = trx.get("id").and_then(value_to_string);
                tx.signatures = trx
                    .get("signatures")
                    .and_then(Value::as_array)
                    .map(|sigs| sigs.iter().filter_map(value_to_string).collect())
                    .unwrap_or_default();
                if let Some(compression) = trx.get("compression").and_then(value_to_string) {
                    tx.compression = compression;
                }
                tx.context_free_data = trx
                    .get("context_free_data")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                tx.packed_trx = trx.get("packed_trx").and_then(value_to_string);
                tx.body = trx.get("transaction").cloned();
            }
            _ => {}
        }

        Ok(tx)
    }

    /// Check import eligibility, returning the txid and the decoded body.
    pub fn eligible(&self) -> SyncResult<(&str, &Map<String, Value>)> {
        let txid = match self.id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => {
                return Err(SyncError::InvalidInput(
                    "Transaction is missing a TXID".to_string(),
                ))
            }
        };
        if self.status != EXECUTED_STATUS {
            return Err(SyncError::InvalidInput(format!(
                "Transaction status isn't '{}' (status: '{}', txid: {})",
                EXECUTED_STATUS, self.status, txid
            )));
        }
        let body = self.body.as_ref().and_then(Value::as_object).ok_or_else(|| {
            SyncError::InvalidInput(format!("Transaction body is not an object (txid: {})", txid))
        })?;
        Ok((txid, body))
    }
}

/// Subset of the node's `get_info` response used for planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainInfo {
    pub head_block_num: u64,
    #[serde(default)]
    pub last_irreversible_block_num: Option<u64>,
    #[serde(default)]
    pub head_block_id: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(default)]
    pub server_version: Option<String>,
}

impl ChainInfo {
    pub fn from_json(value: Value) -> SyncResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| SyncError::ChainNode(format!("Malformed get_info response: {}", e)))
    }
}

/// Persisted block header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
    pub producer: String,
    pub id: Option<String>,
    pub previous: Option<String>,
    pub transaction_mroot: Option<String>,
    pub action_mroot: Option<String>,
    pub confirmed: u64,
    pub schedule_version: u64,
    pub new_producers: Value,
    pub header_extensions: Value,
    pub producer_signature: Option<String>,
    pub ref_block_prefix: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    pub fn from_raw(raw: &RawBlock) -> SyncResult<Self> {
        let now = Utc::now();
        Ok(Block {
            number: raw.block_num,
            timestamp: parse_chain_timestamp(&raw.timestamp)?,
            producer: raw.producer.clone(),
            id: raw.id.clone(),
            previous: raw.previous.clone(),
            transaction_mroot: raw.transaction_mroot.clone(),
            action_mroot: raw.action_mroot.clone(),
            confirmed: raw.confirmed,
            schedule_version: raw.schedule_version,
            new_producers: raw.new_producers.clone(),
            header_extensions: raw.header_extensions.clone(),
            producer_signature: raw.producer_signature.clone(),
            ref_block_prefix: raw.ref_block_prefix,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Persisted transaction. `metadata` holds the transaction body minus its actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    pub block_number: u64,
    pub status: String,
    pub compression: String,
    pub cpu_usage_us: u64,
    pub net_usage_words: u64,
    pub signatures: Vec<String>,
    pub context_free_data: Vec<Value>,
    pub packed_trx: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the row for an eligible transaction.
    pub fn from_raw(raw: &RawTransaction, block_number: u64) -> SyncResult<Self> {
        let (txid, body) = raw.eligible()?;
        let mut metadata = body.clone();
        metadata.remove("actions");
        let now = Utc::now();
        Ok(Transaction {
            txid: txid.to_string(),
            block_number,
            status: raw.status.clone(),
            compression: raw.compression.clone(),
            cpu_usage_us: raw.cpu_usage_us,
            net_usage_words: raw.net_usage_words,
            signatures: raw.signatures.clone(),
            context_free_data: raw.context_free_data.clone(),
            packed_trx: raw.packed_trx.clone(),
            metadata: Some(Value::Object(metadata)),
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub actor: String,
    pub permission: String,
}

/// Token transfer details derived from an action's `data`, when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferFields {
    pub tx_from: Option<String>,
    pub tx_to: Option<String>,
    pub tx_memo: Option<String>,
    pub tx_amount: Option<Decimal>,
    pub tx_precision: Option<u32>,
    pub tx_symbol: Option<String>,
}

impl TransferFields {
    /// Best-effort extraction from `{from, to, memo, quantity: "<amount> <SYMBOL>"}`.
    /// Missing or malformed sub-fields are left empty.
    pub fn extract(data: &Value) -> Self {
        let mut fields = TransferFields::default();
        let Some(data) = data.as_object() else {
            return fields;
        };
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        fields.tx_from = text("from");
        fields.tx_to = text("to");
        fields.tx_memo = text("memo");

        if let Some(quantity) = data.get("quantity").and_then(Value::as_str) {
            let mut parts = quantity.split_whitespace();
            if let (Some(amount), Some(symbol), None) = (parts.next(), parts.next(), parts.next()) {
                fields.tx_precision = Some(
                    amount
                        .split_once('.')
                        .map(|(_, fraction)| fraction.len() as u32)
                        .unwrap_or(0),
                );
                fields.tx_amount = Decimal::from_str(amount).ok();
                fields.tx_symbol = Some(symbol.to_uppercase());
            }
        }
        fields
    }
}

/// Persisted action, unique on (`txid`, `action_index`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub txid: String,
    pub action_index: u32,
    pub account: String,
    pub name: String,
    pub authorization: Vec<Authorization>,
    pub data: Value,
    pub hex_data: Option<String>,
    pub transfer: TransferFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn from_raw(txid: &str, action_index: u32, raw: &Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(value_to_string).unwrap_or_default();
        let authorization = raw
            .get("authorization")
            .and_then(Value::as_array)
            .map(|auths| {
                auths
                    .iter()
                    .filter_map(|a| serde_json::from_value::<Authorization>(a.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let data = raw
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let now = Utc::now();
        Action {
            txid: txid.to_string(),
            action_index,
            account: text("account"),
            name: text("name"),
            authorization,
            transfer: TransferFields::extract(&data),
            data,
            hex_data: raw.get("hex_data").and_then(value_to_string),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Inclusive range of block numbers missing from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start: u64,
    pub end: u64,
}

impl Gap {
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// Result of importing one block.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// The block was fetched and written by this call.
    Imported {
        block: Block,
        raw: RawBlock,
        transactions_imported: usize,
        actions_imported: usize,
    },
    /// The block was already stored, either before the call or by a concurrent importer.
    AlreadyPresent(Block),
}

impl ImportOutcome {
    pub fn block(&self) -> &Block {
        match self {
            ImportOutcome::Imported { block, .. } => block,
            ImportOutcome::AlreadyPresent(block) => block,
        }
    }

    pub fn transactions_imported(&self) -> usize {
        match self {
            ImportOutcome::Imported {
                transactions_imported,
                ..
            } => *transactions_imported,
            ImportOutcome::AlreadyPresent(_) => 0,
        }
    }

    pub fn was_imported(&self) -> bool {
        matches!(self, ImportOutcome::Imported { .. })
    }
}

/// Receipt for one submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: u64,
    pub block_number: u64,
    pub queue: String,
}

/// Passed to the success continuation of an import job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub transactions_imported: usize,
    pub newly_imported: bool,
    pub attempts: u32,
}

/// One row of the lock store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub name: String,
    pub locked_by: String,
    pub lock_process: String,
    pub token: u64,
    pub locked_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.locked_until <= now
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Lock name='{}' locked_by='{}' lock_process='{}' locked_until='{}'>",
            self.name, self.locked_by, self.lock_process, self.locked_until
        )
    }
}

/// Tables that can be cleared administratively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Blocks,
    Transactions,
    Actions,
}

impl FromStr for Table {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocks" => Ok(Table::Blocks),
            "transactions" => Ok(Table::Transactions),
            "actions" => Ok(Table::Actions),
            other => Err(SyncError::Config(format!(
                "Unknown table \"{}\". Options: blocks, transactions, actions",
                other
            ))),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::Blocks => "blocks",
            Table::Transactions => "transactions",
            Table::Actions => "actions",
        };
        f.write_str(name)
    }
}

/// Rows removed by a delete, including cascaded rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    pub blocks: usize,
    pub transactions: usize,
    pub actions: usize,
}

impl DeleteStats {
    pub fn total(&self) -> usize {
        self.blocks + self.transactions + self.actions
    }
}

impl AddAssign for DeleteStats {
    fn add_assign(&mut self, other: Self) {
        self.blocks += other.blocks;
        self.transactions += other.transactions;
        self.actions += other.actions;
    }
}

impl fmt::Display for DeleteStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} blocks, {} transactions, {} actions",
            self.blocks, self.transactions, self.actions
        )
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub blocks: usize,
    pub transactions: usize,
    pub actions: usize,
    pub lowest_block: Option<u64>,
    pub highest_block: Option<u64>,
}

/// How a start height is interpreted when no blocks are stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    /// Start from this exact block number.
    Exact,
    /// Start this many blocks behind the chain head.
    Relative,
}

impl FromStr for StartType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(StartType::Exact),
            "rel" | "relative" => Ok(StartType::Relative),
            other => Err(SyncError::Config(format!(
                "Unknown start type '{}'. Use 'exact' or 'relative'",
                other
            ))),
        }
    }
}

/// Configuration for the sync process
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Explicit start height; resumes from storage when absent
    pub start_block: Option<u64>,
    /// Interpretation of the start height
    pub start_type: StartType,
    /// Start height used when storage is empty and no start was given
    pub default_start_block: u64,
    /// Explicit end height (exclusive)
    pub end_block: Option<u64>,
    /// Treat `end_block` as a block count from the start height
    pub relative_end: bool,
    /// Skip both gap-filling passes
    pub skip_gaps: bool,
    /// Only fill gaps, do not stream new blocks
    pub gaps_only: bool,
    /// Identity used in lock names and lock rows
    pub lock_owner: String,
    /// Maximum range-worker threads per chunk
    pub max_queue_threads: usize,
    /// Blocks assigned to one range worker before another is spawned
    pub blocks_per_thread: u64,
    /// Maximum blocks queued per chunk
    pub max_in_flight: u64,
    /// Pending-job count at which submission pauses
    pub queue_ceiling: usize,
    /// Ceiling used while draining before the final gap pass
    pub drain_ceiling: usize,
    /// Sleep between queue depth checks while paused
    pub backpressure_poll: Duration,
    /// Pause between chunks
    pub chunk_pause: Duration,
    /// Pause between launching range workers
    pub worker_launch_pause: Duration,
    /// Pause after each filled gap
    pub gap_pause: Duration,
    /// TTL of the session and gap locks
    pub lock_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            start_block: None,
            start_type: StartType::Exact,
            default_start_block: 1,
            end_block: None,
            relative_end: false,
            skip_gaps: false,
            gaps_only: false,
            lock_owner: "eoshistory".to_string(),
            max_queue_threads: std::cmp::min(std::cmp::max(2, num_cpus::get() / 2), 8),
            blocks_per_thread: 1000,
            max_in_flight: 10_000,
            queue_ceiling: 10_000,
            drain_ceiling: 2,
            backpressure_poll: Duration::from_secs(15),
            chunk_pause: Duration::from_secs(3),
            worker_launch_pause: Duration::from_secs(1),
            gap_pause: Duration::from_secs(1),
            lock_ttl: Duration::from_secs(300),
        }
    }
}

/// Configuration for the in-process job queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// TTL of the per-block import lock
    pub block_lock_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "celery".to_string(),
            workers: std::cmp::min(std::cmp::max(4, num_cpus::get()), 32),
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            block_lock_ttl: Duration::from_secs(60),
        }
    }
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Planning,
    FillingGaps,
    Streaming,
    Draining,
    Done,
    Aborted,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "IDLE",
            SyncState::Planning => "PLANNING",
            SyncState::FillingGaps => "FILLING_GAPS",
            SyncState::Streaming => "STREAMING",
            SyncState::Draining => "DRAINING",
            SyncState::Done => "DONE",
            SyncState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Summary of one orchestration run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub state: SyncState,
    pub start_block: u64,
    pub end_block: u64,
    pub blocks_queued: u64,
    pub gaps_found: usize,
    pub gaps_filled: usize,
    pub elapsed: Duration,
}

/// Sync engine status
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    pub start_block: u64,
    pub end_block: u64,
    pub blocks_queued: u64,
    pub blocks_per_second: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_fields_from_quantity() {
        let fields = TransferFields::extract(&json!({
            "from": "a", "to": "b", "memo": "m", "quantity": "1.2345 eos"
        }));
        assert_eq!(fields.tx_from.as_deref(), Some("a"));
        assert_eq!(fields.tx_to.as_deref(), Some("b"));
        assert_eq!(fields.tx_memo.as_deref(), Some("m"));
        assert_eq!(fields.tx_amount, Some(Decimal::from_str("1.2345").unwrap()));
        assert_eq!(fields.tx_precision, Some(4));
        assert_eq!(fields.tx_symbol.as_deref(), Some("EOS"));
    }

    #[test]
    fn transfer_fields_integer_amount() {
        let fields = TransferFields::extract(&json!({"quantity": "10 SYS"}));
        assert_eq!(fields.tx_precision, Some(0));
        assert_eq!(fields.tx_amount, Some(Decimal::from(10)));
    }

    #[test]
    fn transfer_amount_too_large_for_decimal() {
        // 40 integer digits do not fit the 96-bit mantissa
        let fields = TransferFields::extract(&json!({
            "from": "a", "quantity": "1234567890123456789012345678901234567890.1234 eos"
        }));
        assert_eq!(fields.tx_amount, None);
        assert_eq!(fields.tx_precision, Some(4));
        assert_eq!(fields.tx_symbol.as_deref(), Some("EOS"));
        assert_eq!(fields.tx_from.as_deref(), Some("a"));
    }

    #[test]
    fn transfer_fields_without_quantity() {
        let fields = TransferFields::extract(&json!({"owner": "alice", "bytes": 8192}));
        assert_eq!(fields, TransferFields::default());

        let malformed = TransferFields::extract(&json!({"quantity": "garbage"}));
        assert_eq!(malformed.tx_amount, None);
        assert_eq!(malformed.tx_symbol, None);
    }

    #[test]
    fn raw_transaction_eligibility() {
        let deferred = RawTransaction::from_json(&json!({
            "status": "executed", "trx": "abcdef"
        }))
        .unwrap();
        assert_eq!(deferred.id.as_deref(), Some("abcdef"));
        assert!(matches!(deferred.eligible(), Err(SyncError::InvalidInput(_))));

        let failed = RawTransaction::from_json(&json!({
            "status": "hard_fail",
            "trx": {"id": "f00d", "transaction": {"actions": []}}
        }))
        .unwrap();
        assert!(matches!(failed.eligible(), Err(SyncError::InvalidInput(_))));

        let missing_id = RawTransaction::from_json(&json!({
            "status": "executed", "trx": {"transaction": {"actions": []}}
        }))
        .unwrap();
        assert!(missing_id.eligible().is_err());

        assert!(RawTransaction::from_json(&json!("not an object")).is_err());
    }

    #[test]
    fn transaction_metadata_drops_actions() {
        let raw = RawTransaction::from_json(&json!({
            "status": "executed",
            "cpu_usage_us": 120,
            "net_usage_words": 16,
            "trx": {
                "id": "beef",
                "signatures": ["SIG_K1_x"],
                "compression": "none",
                "packed_trx": "00ff",
                "context_free_data": [],
                "transaction": {"expiration": "2019-06-01T12:00:30", "actions": [{"name": "transfer"}]}
            }
        }))
        .unwrap();
        let tx = Transaction::from_raw(&raw, 42).unwrap();
        assert_eq!(tx.txid, "beef");
        assert_eq!(tx.block_number, 42);
        assert_eq!(tx.signatures, vec!["SIG_K1_x".to_string()]);
        assert_eq!(
            tx.metadata,
            Some(json!({"expiration": "2019-06-01T12:00:30"}))
        );
    }

    #[test]
    fn raw_block_ignores_unknown_keys() {
        let raw = RawBlock::from_json(json!({
            "block_num": 7,
            "timestamp": "2019-06-01T12:00:00.500",
            "producer": "eosio",
            "block_extensions": [],
            "something_new": true
        }))
        .unwrap();
        assert_eq!(raw.block_num, 7);
        assert_eq!(raw.header_extensions, json!([]));
        let block = Block::from_raw(&raw).unwrap();
        assert_eq!(block.timestamp.timestamp_millis() % 1000, 500);

        assert!(RawBlock::from_json(json!({"producer": "eosio"})).is_err());
    }
}
