//! Command line front end of the EOS block history pipeline.

pub mod adapters;
pub mod commands;

pub use adapters::{ChainRpcMethod, EosRpcClient};
