//! Newline-delimited JSON transport.
//!
//! Each request is one line, `{"method": "InvokeTransaction", "params": {...}}`,
//! and gets exactly one reply line, `{"result": ...}` or `{"error": {...}}`.
//! `StreamLogs` instead replies with one `{"log": ...}` line per entry followed
//! by `{"end": true}`. Requests on one connection are served in order. A read
//! error cancels the request in flight; a clean end of input (including a
//! half-close) still gets replies to every request already sent.

use std::collections::BTreeMap;
use std::sync::Arc;

use fg_core::OpContext;
use fg_types::{ErrorKind, FabricGridError, Result};
use futures::{Sink, SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::NetworkService;

/// Longest accepted request line.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Requests read ahead of the one being served.
const REQUEST_QUEUE: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl From<&FabricGridError> for RpcError {
    fn from(err: &FabricGridError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            context: err.context(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcReply {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(err: &FabricGridError) -> Self {
        Self {
            result: None,
            error: Some(err.into()),
        }
    }
}

/// Accept connections until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    service: Arc<NetworkService>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "FabricGrid service listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                debug!(%peer, "Client connected");
                let service = service.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, service, token).await {
                        warn!(%peer, error = %e, "Connection closed with error");
                    }
                    debug!(%peer, "Client disconnected");
                });
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    service: Arc<NetworkService>,
    token: CancellationToken,
) -> std::result::Result<(), LinesCodecError> {
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut source) = framed.split();
    let (tx, mut rx) = mpsc::channel::<String>(REQUEST_QUEUE);

    // A broken read side cancels the request in flight. On clean EOF `tx` is
    // dropped and the queued requests are drained.
    let reader_token = token.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(line) => {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Unreadable request line");
                    reader_token.cancel();
                    return;
                }
            }
        }
        debug!("Client closed its request stream");
    });

    let result = loop {
        let line = tokio::select! {
            biased;
            _ = token.cancelled() => break Ok(()),
            line = rx.recv() => match line {
                Some(line) => line,
                None => break Ok(()),
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let ctx = OpContext::from_token(token.child_token());
        if let Err(e) = respond(&service, &ctx, &line, &mut sink).await {
            token.cancel();
            break Err(e);
        }
    };

    reader.abort();
    result
}

async fn respond<S>(
    service: &NetworkService,
    ctx: &OpContext,
    line: &str,
    sink: &mut S,
) -> std::result::Result<(), LinesCodecError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return send(sink, &RpcReply::failed(&e.into())).await,
    };
    debug!(method = %request.method, "Handling request");

    if request.method == "StreamLogs" {
        return stream_logs(service, ctx, request.params, sink).await;
    }

    let reply = match dispatch(service, ctx, &request.method, request.params).await {
        Ok(result) => RpcReply::ok(result),
        Err(e) => RpcReply::failed(&e),
    };
    send(sink, &reply).await
}

async fn dispatch(
    service: &NetworkService,
    ctx: &OpContext,
    method: &str,
    params: Value,
) -> Result<Value> {
    match method {
        "InitNetwork" => to_value(service.init_network(ctx, decode(params)?).await?),
        "DeployChaincode" => to_value(service.deploy_chaincode(ctx, decode(params)?).await?),
        "InvokeTransaction" => to_value(service.invoke_transaction(ctx, decode(params)?).await?),
        "QueryLedger" => to_value(service.query_ledger(ctx, decode(params)?).await?),
        "StopNetwork" => to_value(service.stop_network(ctx, decode(params)?).await?),
        "GetNetworkStatus" => to_value(service.get_network_status(ctx, decode(params)?).await?),
        "ListNetworks" => to_value(service.list_networks().await),
        "GetBlockByNumber" => to_value(service.get_block_by_number(ctx, decode(params)?).await?),
        "GetTransactionById" => {
            to_value(service.get_transaction_by_id(ctx, decode(params)?).await?)
        }
        "GetChainInfo" => to_value(service.get_chain_info(ctx, decode(params)?).await?),
        other => Err(FabricGridError::Internal(format!("unknown method: {other}"))),
    }
}

async fn stream_logs<S>(
    service: &NetworkService,
    ctx: &OpContext,
    params: Value,
    sink: &mut S,
) -> std::result::Result<(), LinesCodecError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    let request = match decode(params) {
        Ok(request) => request,
        Err(e) => return send(sink, &RpcReply::failed(&e)).await,
    };
    let mut logs = match service.stream_logs(ctx, request).await {
        Ok(logs) => logs,
        Err(e) => return send(sink, &RpcReply::failed(&e)).await,
    };

    while let Some(item) = logs.next().await {
        match item {
            Ok(entry) => send(sink, &json!({ "log": entry })).await?,
            Err(e) => return send(sink, &RpcReply::failed(&e)).await,
        }
    }
    send(sink, &json!({ "end": true })).await
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T> {
    Ok(serde_json::from_value(params)?)
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn send<S, T>(sink: &mut S, value: &T) -> std::result::Result<(), LinesCodecError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(value).map_err(|e| LinesCodecError::Io(e.into()))?;
    sink.send(line).await
}
