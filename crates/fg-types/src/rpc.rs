//! Request and response messages of the remote operations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{ContainerRole, NetworkState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitNetworkRequest {
    pub name: String,
    pub org_count: u32,
    pub channel_name: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitNetworkResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployChaincodeRequest {
    pub network_id: String,
    pub chaincode_name: String,
    pub chaincode_path: String,
    pub version: String,
    pub language: String,
    #[serde(default)]
    pub endorsing_orgs: Vec<String>,
    /// Omitted: one past the sequence already committed on the channel.
    #[serde(default)]
    pub sequence: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployChaincodeResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub chaincode_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeTransactionRequest {
    pub network_id: String,
    pub chaincode_name: String,
    pub function_name: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Private inputs; when non-empty the invocation carries transient data.
    #[serde(default)]
    pub transient: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeTransactionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryLedgerRequest {
    pub network_id: String,
    pub chaincode_name: String,
    pub function_name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryLedgerResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopNetworkRequest {
    pub network_id: String,
    #[serde(default)]
    pub cleanup: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopNetworkResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetNetworkStatusRequest {
    pub network_id: String,
}

/// Status of one peer or orderer container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub role: ContainerRole,
    pub endpoint: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetNetworkStatusResponse {
    pub running: bool,
    pub status_text: String,
    #[serde(default)]
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamLogsRequest {
    pub network_id: String,
    pub container_name: String,
}

/// One forwarded container log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub container: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub network_id: String,
    pub name: String,
    pub channel: String,
    pub state: NetworkState,
    pub organizations: usize,
    pub orderers: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListNetworksResponse {
    pub networks: Vec<NetworkSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetBlockRequest {
    pub network_id: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTransactionRequest {
    pub network_id: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetChainInfoRequest {
    pub network_id: String,
}

/// Raw ledger data returned by introspection calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerDataResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Vec<u8>,
}
