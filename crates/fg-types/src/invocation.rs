use serde::{Deserialize, Serialize};

/// Sentinel transaction id used when the tool output does not echo one.
pub const UNKNOWN_TX_ID: &str = "unknown";

/// Parsed result of an invoke-style operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub tx_id: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Cleaned tool output, kept for diagnostics only.
    #[serde(default)]
    pub output: String,
}

impl InvocationResult {
    pub fn has_tx_id(&self) -> bool {
        self.tx_id != UNKNOWN_TX_ID
    }
}

/// A chaincode to package, install, approve and commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeSpec {
    pub name: String,
    /// Source path as seen from inside the control container.
    pub path: String,
    pub version: String,
    /// `golang`, `node` or `java`.
    pub language: String,
    /// Endorsing organization names or MSP ids; empty means every organization.
    #[serde(default)]
    pub endorsing_orgs: Vec<String>,
    /// Definition sequence; `None` means one past the committed definition.
    #[serde(default)]
    pub sequence: Option<u32>,
}

impl ChaincodeSpec {
    pub fn label(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}
