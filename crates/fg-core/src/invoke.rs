//! Transaction invocation engine.
//!
//! Turns (chaincode, function, args) into a peer CLI command in the control
//! container and parses the outcome. The first organization's first peer is
//! the only submitting identity; every peer of the network is listed as an
//! endorsement target.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use fg_types::{
    ErrorKind, FabricGridError, InvocationResult, Network, Orderer, Organization, Peer, Result,
};
use tracing::{debug, info, warn};

use crate::command::{build_args_json, endorsement_args, orderer_args, ControlCommand};
use crate::context::OpContext;
use crate::executor::Executor;
use crate::output_parser::{clean_output, extract_payload, extract_tx_id, parse_query_result};

const QSCC: &str = "qscc";

/// Stateless with respect to networks: every call receives the topology it acts on.
#[derive(Clone)]
pub struct InvocationEngine {
    executor: Arc<dyn Executor>,
    docker_bin: String,
    command_timeout: Option<Duration>,
}

impl InvocationEngine {
    pub fn new(executor: Arc<dyn Executor>, docker_bin: impl Into<String>) -> Self {
        Self {
            executor,
            docker_bin: docker_bin.into(),
            command_timeout: None,
        }
    }

    /// Upper bound for each native command, on top of the caller's context.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Submit a transaction and wait for its commit event.
    pub async fn invoke(
        &self,
        ctx: &OpContext,
        network: &Network,
        chaincode: &str,
        function: &str,
        args: &[String],
    ) -> Result<InvocationResult> {
        self.submit(ctx, network, chaincode, function, args, None)
            .await
    }

    /// Like `invoke`, with private data passed through `--transient`.
    ///
    /// Values are base64 encoded in the JSON map, which is how the peer CLI
    /// expects them. The map travels on the command line, so very large
    /// values are bounded by the host's argument size limit.
    pub async fn invoke_with_transient(
        &self,
        ctx: &OpContext,
        network: &Network,
        chaincode: &str,
        function: &str,
        args: &[String],
        transient: &HashMap<String, Vec<u8>>,
    ) -> Result<InvocationResult> {
        self.submit(ctx, network, chaincode, function, args, Some(transient))
            .await
    }

    pub async fn query(
        &self,
        ctx: &OpContext,
        network: &Network,
        chaincode: &str,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>> {
        ctx.check("query")?;
        let (org, peer, _) = acting_identity(network)?;

        let cmd = ControlCommand::peer(network, org, peer)
            .args(["chaincode", "query", "-C"])
            .arg(network.channel.name.as_str())
            .arg("-n")
            .arg(chaincode)
            .arg("-c")
            .arg(build_args_json(function, args));

        debug!(network = %network.id, chaincode, function, "Querying chaincode");
        let out = self
            .run(ctx, &cmd, false)
            .await
            .map_err(|e| transaction_failure(chaincode, function, e))?;
        Ok(parse_query_result(&String::from_utf8_lossy(&out)))
    }

    /// Raw block `number` of the network's channel, via `qscc`.
    pub async fn get_block_by_number(
        &self,
        ctx: &OpContext,
        network: &Network,
        number: u64,
    ) -> Result<Vec<u8>> {
        let args = vec![network.channel.name.clone(), number.to_string()];
        self.introspect(ctx, network, "GetBlockByNumber", &args)
            .await
    }

    pub async fn get_transaction_by_id(
        &self,
        ctx: &OpContext,
        network: &Network,
        tx_id: &str,
    ) -> Result<Vec<u8>> {
        if tx_id.trim().is_empty() {
            return Err(FabricGridError::InvalidConfig(
                "transaction id must not be empty".to_string(),
            ));
        }
        let args = vec![network.channel.name.clone(), tx_id.to_string()];
        self.introspect(ctx, network, "GetTransactionByID", &args)
            .await
    }

    /// `peer channel getinfo`: height and current/previous block hashes.
    pub async fn get_chain_info(&self, ctx: &OpContext, network: &Network) -> Result<Vec<u8>> {
        ctx.check("get_chain_info")?;
        let (org, peer, _) = acting_identity(network)?;

        let cmd = ControlCommand::peer(network, org, peer)
            .args(["channel", "getinfo", "-c"])
            .arg(network.channel.name.as_str());

        let out = self
            .run(ctx, &cmd, true)
            .await
            .map_err(|e| transaction_failure("cscc", "GetChainInfo", e))?;
        Ok(clean_output(&String::from_utf8_lossy(&out)).into_bytes())
    }

    async fn introspect(
        &self,
        ctx: &OpContext,
        network: &Network,
        function: &str,
        args: &[String],
    ) -> Result<Vec<u8>> {
        ctx.check(function)?;
        let (org, peer, _) = acting_identity(network)?;

        let cmd = ControlCommand::peer(network, org, peer)
            .args(["chaincode", "query", "-C"])
            .arg(network.channel.name.as_str())
            .arg("-n")
            .arg(QSCC)
            .arg("-c")
            .arg(build_args_json(function, args));

        let out = self
            .run(ctx, &cmd, false)
            .await
            .map_err(|e| transaction_failure(QSCC, function, e))?;
        Ok(clean_output(&String::from_utf8_lossy(&out)).into_bytes())
    }

    async fn submit(
        &self,
        ctx: &OpContext,
        network: &Network,
        chaincode: &str,
        function: &str,
        args: &[String],
        transient: Option<&HashMap<String, Vec<u8>>>,
    ) -> Result<InvocationResult> {
        ctx.check("invoke")?;
        let (org, peer, orderer) = acting_identity(network)?;

        let mut cmd = ControlCommand::peer(network, org, peer)
            .args(["chaincode", "invoke"])
            .args(orderer_args(network, orderer))
            .arg("-C")
            .arg(network.channel.name.as_str())
            .arg("-n")
            .arg(chaincode)
            .args(endorsement_args(network.peers()))
            .arg("-c")
            .arg(build_args_json(function, args));
        if let Some(map) = transient {
            cmd = cmd.arg("--transient").arg(transient_json(map)?);
        }
        let cmd = cmd.arg("--waitForEvent");

        info!(
            network = %network.id,
            chaincode,
            function,
            args = args.len(),
            "Invoking chaincode"
        );

        let out = self
            .run(ctx, &cmd, true)
            .await
            .map_err(|e| transaction_failure(chaincode, function, e))?;

        let text = String::from_utf8_lossy(&out);
        let result = InvocationResult {
            tx_id: extract_tx_id(&text),
            payload: extract_payload(&text),
            output: clean_output(&text),
        };
        if !result.has_tx_id() {
            warn!(network = %network.id, chaincode, function, "Commit output carried no transaction id");
        }
        debug!(tx_id = %result.tx_id, payload_len = result.payload.len(), "Invocation committed");
        Ok(result)
    }

    async fn run(&self, ctx: &OpContext, cmd: &ControlCommand, combined: bool) -> Result<Vec<u8>> {
        let ctx = match self.command_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        let args = cmd.to_docker_args();
        if combined {
            self.executor
                .execute_combined(&ctx, &self.docker_bin, &args)
                .await
        } else {
            self.executor.execute(&ctx, &self.docker_bin, &args).await
        }
    }
}

/// Submitting organization, its first peer and the primary orderer.
pub fn acting_identity(network: &Network) -> Result<(&Organization, &Peer, &Orderer)> {
    let (org, peer) = network.acting_peer().ok_or_else(|| {
        FabricGridError::InvalidConfig(format!(
            "network {} has no organization with a peer",
            network.id
        ))
    })?;
    let orderer = network.primary_orderer().ok_or_else(|| {
        FabricGridError::InvalidConfig(format!("network {} has no orderer", network.id))
    })?;
    Ok((org, peer, orderer))
}

fn transient_json(map: &HashMap<String, Vec<u8>>) -> Result<String> {
    let encoded: BTreeMap<&str, String> = map
        .iter()
        .map(|(k, v)| (k.as_str(), STANDARD.encode(v)))
        .collect();
    Ok(serde_json::to_string(&encoded)?)
}

/// Command failures become `TransactionFailed`; interruption and missing
/// tools keep their own kind.
fn transaction_failure(chaincode: &str, function: &str, err: FabricGridError) -> FabricGridError {
    match err.kind() {
        ErrorKind::Cancelled | ErrorKind::Timeout | ErrorKind::BinaryMissing => err,
        _ => {
            let output = match err.root() {
                FabricGridError::ProcessFailed { output, .. } => output.clone(),
                _ => String::new(),
            };
            FabricGridError::TransactionFailed {
                chaincode: chaincode.to_string(),
                function: function.to_string(),
                message: err.to_string(),
                output,
            }
        }
    }
}
