//! Chain node adapter talking to EOS nodes over their HTTP chain API

use async_trait::async_trait;
use anyhow::{anyhow, Result};
use log::debug;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::time::Duration;

use eoshistory_sync::{ChainInfo, ChainNodeAdapter, RawBlock, SyncError, SyncResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chain API calls made by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRpcMethod {
    GetBlock,
    GetInfo,
}

impl ChainRpcMethod {
    pub fn path(&self) -> &'static str {
        match self {
            ChainRpcMethod::GetBlock => "/v1/chain/get_block",
            ChainRpcMethod::GetInfo => "/v1/chain/get_info",
        }
    }
}

/// Turn a failed HTTP response into the matching error.
///
/// Nodes answer an unknown height with an `unknown_block_exception` body,
/// which is reported as [`SyncError::BlockNotFound`].
pub fn rpc_error(url: &str, status: u16, body: &str, params: &Value) -> SyncError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|b| b.get("error"));
    let name = error.and_then(|e| e.get("name")).and_then(Value::as_str);

    if name == Some("unknown_block_exception") {
        if let Some(number) = params.get("block_num_or_id").and_then(Value::as_u64) {
            return SyncError::BlockNotFound(number);
        }
    }

    let what = error
        .and_then(|e| e.get("what"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(200).collect());
    SyncError::ChainNode(format!("HTTP {} from {}: {}", status, url, what))
}

/// EOS chain API client. One endpoint is picked at random per call.
#[derive(Clone)]
pub struct EosRpcClient {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl EosRpcClient {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        let urls: Vec<String> = urls
            .iter()
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(anyhow!("At least one EOS node URL is required"));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { urls, client })
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn pick_url(&self) -> &str {
        self.urls
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }

    async fn call(&self, method: ChainRpcMethod, params: Value) -> SyncResult<Value> {
        let url = format!("{}{}", self.pick_url(), method.path());
        debug!("POST {} {}", url, params);

        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| SyncError::ChainNode(format!("RPC request to {} failed: {}", url, e)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::ChainNode(format!("Failed to read response from {}: {}", url, e)))?;

        if !status.is_success() {
            return Err(rpc_error(&url, status.as_u16(), &body, &params));
        }
        serde_json::from_str(&body)
            .map_err(|e| SyncError::ChainNode(format!("Malformed response from {}: {}", url, e)))
    }
}

#[async_trait]
impl ChainNodeAdapter for EosRpcClient {
    async fn get_block(&self, number: u64) -> SyncResult<RawBlock> {
        let body = self
            .call(ChainRpcMethod::GetBlock, json!({ "block_num_or_id": number }))
            .await?;
        RawBlock::from_json(body).map_err(|e| SyncError::ChainNode(e.to_string()))
    }

    async fn get_info(&self) -> SyncResult<ChainInfo> {
        let body = self.call(ChainRpcMethod::GetInfo, json!({})).await?;
        ChainInfo::from_json(body)
    }
}
