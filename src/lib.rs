//! eoshistory test suite
//!
//! End-to-end tests for the block history pipeline using the in-memory mocks
//! from `eoshistory-sync` and the RocksDB backend.

#[cfg(test)]
pub mod tests;
