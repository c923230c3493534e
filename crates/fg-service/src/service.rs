//! Service façade: the remote operations.
//!
//! Domain failures (unknown network, failed transaction, readiness timeout...)
//! are returned as `success = false` responses. Only exceptional failures come
//! back as `Err`.
//!
//! Operations on the same network are not serialized beyond the registry
//! lookup: an invoke racing a stop may see "not found" or run best-effort
//! against a network that is being torn down.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fg_config::Config;
use fg_core::{
    ChaincodeDeployer, DockerRuntime, Executor, InvocationEngine, LifecycleManager,
    LifecycleSettings, OpContext, ToolArtifactGenerator,
};
use fg_types::rpc::{
    DeployChaincodeRequest, DeployChaincodeResponse, GetBlockRequest, GetChainInfoRequest,
    GetNetworkStatusRequest, GetNetworkStatusResponse, GetTransactionRequest,
    InitNetworkRequest, InitNetworkResponse, InvokeTransactionRequest,
    InvokeTransactionResponse, LedgerDataResponse, ListNetworksResponse, LogEntry,
    QueryLedgerRequest, QueryLedgerResponse, StopNetworkRequest, StopNetworkResponse,
    StreamLogsRequest,
};
use fg_types::{
    ChaincodeSpec, FabricGridError, NetworkConfig, NetworkState, Result, ResultExt,
};
use futures::Stream;
use tracing::{error, info, warn};

use crate::registry::{NetworkEntry, NetworkRegistry};

/// Live log entries of one container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogEntry>> + Send>>;

pub struct NetworkService {
    registry: Arc<NetworkRegistry>,
    lifecycle: LifecycleManager,
    invoker: InvocationEngine,
    deployer: ChaincodeDeployer,
    ready_timeout: Duration,
}

impl NetworkService {
    pub fn new(
        registry: Arc<NetworkRegistry>,
        lifecycle: LifecycleManager,
        invoker: InvocationEngine,
        deployer: ChaincodeDeployer,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            invoker,
            deployer,
            ready_timeout,
        }
    }

    /// Wire the docker-backed collaborators from configuration.
    pub fn from_config(config: &Config, executor: Arc<dyn Executor>) -> Self {
        let runtime = Arc::new(DockerRuntime::new(executor.clone(), &config.docker_bin));
        let artifacts = Arc::new(ToolArtifactGenerator::new(
            executor.clone(),
            &config.artifact_tool,
        ));
        let lifecycle = LifecycleManager::new(
            runtime,
            artifacts,
            executor.clone(),
            LifecycleSettings::from_config(config),
        );
        let invoker = InvocationEngine::new(executor.clone(), &config.docker_bin)
            .with_command_timeout(config.command_timeout());
        let deployer = ChaincodeDeployer::new(executor, &config.docker_bin)
            .with_command_timeout(config.command_timeout());

        Self::new(
            Arc::new(NetworkRegistry::new()),
            lifecycle,
            invoker,
            deployer,
            config.ready_timeout(),
        )
    }

    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    /// Bootstrap, start, wait for readiness, join the channel, register.
    ///
    /// Nothing is registered unless every step succeeds; a failure after the
    /// containers were started tears the network down again.
    pub async fn init_network(
        &self,
        ctx: &OpContext,
        req: InitNetworkRequest,
    ) -> Result<InitNetworkResponse> {
        let config = NetworkConfig {
            name: req.name,
            org_count: req.org_count,
            channel_name: req.channel_name,
            options: req.config,
        };

        let network = match self.lifecycle.bootstrap(ctx, &config).await {
            Ok(network) => network,
            Err(e) => {
                return reject("init_network", e, |message| InitNetworkResponse {
                    success: false,
                    message,
                    ..Default::default()
                })
            }
        };

        let entry = Arc::new(NetworkEntry::new(network));
        entry.transition(NetworkState::Starting)?;

        if let Err(e) = self.bring_up(ctx, &entry).await {
            self.roll_back(&entry).await;
            return reject("init_network", e, |message| InitNetworkResponse {
                success: false,
                message,
                network_id: entry.id().to_string(),
                ..Default::default()
            });
        }

        entry.transition(NetworkState::Running)?;
        self.registry.insert(entry.clone()).await?;

        let network = entry.network();
        info!(network = %network.id, name = %network.name, "Network is running");
        Ok(InitNetworkResponse {
            success: true,
            message: format!(
                "network {} running with {} organizations on channel {}",
                network.name,
                network.organizations.len(),
                network.channel.name
            ),
            network_id: network.id.clone(),
            endpoints: network.endpoints(),
        })
    }

    async fn bring_up(&self, ctx: &OpContext, entry: &NetworkEntry) -> Result<()> {
        let network = entry.network();
        self.lifecycle
            .start_network(ctx, network)
            .await
            .op("start_network")?;

        let ready_ctx = ctx.with_timeout(self.ready_timeout);
        self.lifecycle
            .wait_for_ready(&ready_ctx, network)
            .await
            .op("wait_for_ready")?;
        entry.transition(NetworkState::Ready)?;

        self.lifecycle
            .join_channel(ctx, network)
            .await
            .op("join_channel")
    }

    /// Remove whatever `bring_up` left behind. Runs even if the caller gave up.
    async fn roll_back(&self, entry: &NetworkEntry) {
        if let Err(e) = entry.transition(NetworkState::Stopping) {
            error!(error = %e, "Rollback from unexpected state");
        }
        let cleanup_ctx =
            OpContext::background().with_timeout(self.lifecycle.settings().cleanup_timeout);
        match self
            .lifecycle
            .stop_network(&cleanup_ctx, entry.network(), true)
            .await
        {
            Ok(()) => {
                let _ = entry.transition(NetworkState::Stopped);
            }
            Err(e) => {
                warn!(network = %entry.id(), error = %e, "Rollback left resources behind");
            }
        }
    }

    pub async fn deploy_chaincode(
        &self,
        ctx: &OpContext,
        req: DeployChaincodeRequest,
    ) -> Result<DeployChaincodeResponse> {
        let failed = |message| DeployChaincodeResponse {
            success: false,
            message,
            ..Default::default()
        };
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject("deploy_chaincode", e, failed),
        };

        let spec = ChaincodeSpec {
            name: req.chaincode_name,
            path: req.chaincode_path,
            version: req.version,
            language: req.language,
            endorsing_orgs: req.endorsing_orgs,
            sequence: req.sequence,
        };
        match self.deployer.deploy(ctx, entry.network(), &spec).await {
            Ok(chaincode_id) => Ok(DeployChaincodeResponse {
                success: true,
                message: format!("chaincode {} {} committed", spec.name, spec.version),
                chaincode_id,
            }),
            Err(e) => reject("deploy_chaincode", e, failed),
        }
    }

    pub async fn invoke_transaction(
        &self,
        ctx: &OpContext,
        req: InvokeTransactionRequest,
    ) -> Result<InvokeTransactionResponse> {
        let failed = |message| InvokeTransactionResponse {
            success: false,
            message,
            ..Default::default()
        };
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject("invoke_transaction", e, failed),
        };
        let network = entry.network();

        let result = if req.transient.is_empty() {
            self.invoker
                .invoke(ctx, network, &req.chaincode_name, &req.function_name, &req.args)
                .await
        } else {
            self.invoker
                .invoke_with_transient(
                    ctx,
                    network,
                    &req.chaincode_name,
                    &req.function_name,
                    &req.args,
                    &req.transient,
                )
                .await
        };

        match result {
            Ok(res) => Ok(InvokeTransactionResponse {
                success: true,
                message: format!("transaction {} committed", res.tx_id),
                transaction_id: res.tx_id,
                payload: res.payload,
            }),
            Err(e) => reject("invoke_transaction", e, failed),
        }
    }

    pub async fn query_ledger(
        &self,
        ctx: &OpContext,
        req: QueryLedgerRequest,
    ) -> Result<QueryLedgerResponse> {
        let failed = |message| QueryLedgerResponse {
            success: false,
            message,
            ..Default::default()
        };
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject("query_ledger", e, failed),
        };

        match self
            .invoker
            .query(
                ctx,
                entry.network(),
                &req.chaincode_name,
                &req.function_name,
                &req.args,
            )
            .await
        {
            Ok(payload) => Ok(QueryLedgerResponse {
                success: true,
                message: "ok".to_string(),
                payload,
            }),
            Err(e) => reject("query_ledger", e, failed),
        }
    }

    /// Tear down outside the registry lock; unregister only once teardown
    /// succeeded. A failed stop leaves the network registered in `Stopping`
    /// so it can be stopped again.
    pub async fn stop_network(
        &self,
        ctx: &OpContext,
        req: StopNetworkRequest,
    ) -> Result<StopNetworkResponse> {
        let not_found = || StopNetworkResponse {
            success: false,
            message: format!("network {} not found", req.network_id),
        };
        let Some(entry) = self.registry.get(&req.network_id).await else {
            return Ok(not_found());
        };

        let _teardown = entry.lock_teardown().await;
        if entry.state() == NetworkState::Stopped {
            // a concurrent stop finished first
            return Ok(not_found());
        }
        entry.begin_stop()?;

        if let Err(e) = self
            .lifecycle
            .stop_network(ctx, entry.network(), req.cleanup)
            .await
        {
            return reject("stop_network", e, |message| StopNetworkResponse {
                success: false,
                message,
            });
        }

        entry.transition(NetworkState::Stopped)?;
        self.registry.remove(&req.network_id).await;
        Ok(StopNetworkResponse {
            success: true,
            message: format!("network {} stopped", req.network_id),
        })
    }

    pub async fn get_network_status(
        &self,
        ctx: &OpContext,
        req: GetNetworkStatusRequest,
    ) -> Result<GetNetworkStatusResponse> {
        let failed = |status_text| GetNetworkStatusResponse {
            running: false,
            status_text,
            nodes: Vec::new(),
        };
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject("get_network_status", e, failed),
        };

        match self.lifecycle.get_network_status(ctx, entry.network()).await {
            Ok(status) => Ok(GetNetworkStatusResponse {
                running: status.running,
                status_text: status.status_text,
                nodes: status.nodes,
            }),
            Err(e) => reject("get_network_status", e, failed),
        }
    }

    pub async fn list_networks(&self) -> ListNetworksResponse {
        ListNetworksResponse {
            networks: self.registry.list().await,
        }
    }

    pub async fn get_block_by_number(
        &self,
        ctx: &OpContext,
        req: GetBlockRequest,
    ) -> Result<LedgerDataResponse> {
        let op = "get_block_by_number";
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject(op, e, ledger_failure),
        };
        let result = self
            .invoker
            .get_block_by_number(ctx, entry.network(), req.block_number)
            .await;
        ledger_response(op, result)
    }

    pub async fn get_transaction_by_id(
        &self,
        ctx: &OpContext,
        req: GetTransactionRequest,
    ) -> Result<LedgerDataResponse> {
        let op = "get_transaction_by_id";
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject(op, e, ledger_failure),
        };
        let result = self
            .invoker
            .get_transaction_by_id(ctx, entry.network(), &req.transaction_id)
            .await;
        ledger_response(op, result)
    }

    /// Height and current/previous block hashes of the network's channel.
    pub async fn get_chain_info(
        &self,
        ctx: &OpContext,
        req: GetChainInfoRequest,
    ) -> Result<LedgerDataResponse> {
        let op = "get_chain_info";
        let entry = match self.registry.lookup(&req.network_id).await {
            Ok(entry) => entry,
            Err(e) => return reject(op, e, ledger_failure),
        };
        let result = self.invoker.get_chain_info(ctx, entry.network()).await;
        ledger_response(op, result)
    }

    /// Follow a container's log.
    ///
    /// Unlike the other operations every failure, including cancellation, is
    /// returned as an error: before the stream starts as `Err`, afterwards as
    /// the last item. The stream ends when the container exits; dropping it
    /// stops the underlying log follower.
    pub async fn stream_logs(&self, ctx: &OpContext, req: StreamLogsRequest) -> Result<LogStream> {
        let entry = self.registry.lookup(&req.network_id).await?;
        let mut follow = self
            .lifecycle
            .stream_logs(ctx, entry.network(), &req.container_name)
            .await
            .op("stream_logs")?;

        let ctx = ctx.clone();
        let container = req.container_name;
        info!(network = %req.network_id, container = %container, "Streaming container logs");

        let stream = async_stream::stream! {
            loop {
                let next = tokio::select! {
                    line = follow.lines.recv() => match line {
                        Some(line) => Next::Line(line),
                        None => Next::Closed,
                    },
                    reason = ctx.done() => Next::Done(reason.into_error("stream_logs")),
                };
                match next {
                    Next::Line(message) => {
                        yield Ok(LogEntry {
                            timestamp: Utc::now(),
                            container: container.clone(),
                            message,
                        });
                    }
                    Next::Closed => break,
                    Next::Done(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
            if let Ok(Err(e)) = follow.exit.await {
                yield Err(e.in_op("stream_logs"));
            }
        };
        Ok(Box::pin(stream))
    }
}

enum Next {
    Line(String),
    Closed,
    Done(FabricGridError),
}

fn ledger_failure(message: String) -> LedgerDataResponse {
    LedgerDataResponse {
        success: false,
        message,
        data: Vec::new(),
    }
}

fn ledger_response(op: &'static str, result: Result<Vec<u8>>) -> Result<LedgerDataResponse> {
    match result {
        Ok(data) => Ok(LedgerDataResponse {
            success: true,
            message: "ok".to_string(),
            data,
        }),
        Err(e) => reject(op, e, ledger_failure),
    }
}

/// Turn a domain failure into a `success = false` response; pass anything
/// else through as an error.
fn reject<T>(op: &'static str, err: FabricGridError, respond: impl FnOnce(String) -> T) -> Result<T> {
    if err.is_domain_failure() {
        warn!(op, kind = %err.kind(), context = ?err.context(), error = %err, "Operation failed");
        Ok(respond(err.to_string()))
    } else {
        error!(op, kind = %err.kind(), context = ?err.context(), error = %err, "Operation failed unexpectedly");
        Err(err.in_op(op))
    }
}
