//! Key layout
//!
//! ```text
//! block/{number:020}             -> Block
//! tx/{txid}                      -> Transaction
//! blocktx/{number:020}/{txid}    -> (empty) block -> transaction index
//! action/{txid}/{index:010}      -> Action
//! lock/{name}                    -> LockRecord
//! ```
//!
//! Numbers are zero padded so lexicographic order matches numeric order.

pub const BLOCK_PREFIX: &[u8] = b"block/";
pub const TX_PREFIX: &[u8] = b"tx/";
pub const BLOCK_TX_PREFIX: &[u8] = b"blocktx/";
pub const ACTION_PREFIX: &[u8] = b"action/";
pub const LOCK_PREFIX: &[u8] = b"lock/";

/// Sorts after every `block/` key and before anything else.
pub const BLOCK_UPPER_BOUND: &[u8] = b"block0";

pub fn block_key(number: u64) -> Vec<u8> {
    format!("block/{:020}", number).into_bytes()
}

/// Parse the block number back out of a `block/` key.
pub fn block_number_from_key(key: &[u8]) -> Option<u64> {
    let digits = key.strip_prefix(BLOCK_PREFIX)?;
    std::str::from_utf8(digits).ok()?.parse().ok()
}

pub fn tx_key(txid: &str) -> Vec<u8> {
    format!("tx/{}", txid).into_bytes()
}

pub fn block_tx_prefix(number: u64) -> Vec<u8> {
    format!("blocktx/{:020}/", number).into_bytes()
}

pub fn block_tx_key(number: u64, txid: &str) -> Vec<u8> {
    format!("blocktx/{:020}/{}", number, txid).into_bytes()
}

pub fn action_prefix(txid: &str) -> Vec<u8> {
    format!("action/{}/", txid).into_bytes()
}

pub fn action_key(txid: &str, index: u32) -> Vec<u8> {
    format!("action/{}/{:010}", txid, index).into_bytes()
}

pub fn lock_key(name: &str) -> Vec<u8> {
    format!("lock/{}", name).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_keys_sort_numerically() {
        assert!(block_key(9) < block_key(10));
        assert!(block_key(u64::MAX).as_slice() < BLOCK_UPPER_BOUND);
        assert_eq!(block_number_from_key(&block_key(123456)), Some(123456));
        assert_eq!(block_number_from_key(b"tx/abc"), None);
    }

    #[test]
    fn action_keys_sort_by_index() {
        assert!(action_key("ab", 2) < action_key("ab", 10));
        assert!(action_key("ab", 0).starts_with(&action_prefix("ab")));
    }
}
