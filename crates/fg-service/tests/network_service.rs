use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fg_config::Config;
use fg_core::{MockExecutor, MockResponse, OpContext, RecordedCall};
use fg_service::NetworkService;
use fg_types::rpc::{
    GetNetworkStatusRequest, InitNetworkRequest, InvokeTransactionRequest, QueryLedgerRequest,
    StopNetworkRequest, StreamLogsRequest,
};
use fg_types::{ErrorKind, NetworkState};
use futures::StreamExt;

fn config(data_dir: &Path, ready_timeout: u64) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        ready_timeout,
        ready_poll_interval: 20,
        command_timeout: 5,
        ..Default::default()
    }
}

fn is_inspect(call: &RecordedCall) -> bool {
    call.args.first().map(String::as_str) == Some("inspect")
}

fn healthy_mock() -> Arc<MockExecutor> {
    let mock = Arc::new(MockExecutor::new());
    mock.respond_when(is_inspect, MockResponse::text("running"));
    mock
}

fn service(mock: &Arc<MockExecutor>, data_dir: &Path, ready_timeout: u64) -> NetworkService {
    NetworkService::from_config(&config(data_dir, ready_timeout), mock.clone())
}

fn init_request(orgs: u32) -> InitNetworkRequest {
    InitNetworkRequest {
        name: "demo".to_string(),
        org_count: orgs,
        channel_name: "mychannel".to_string(),
        config: HashMap::new(),
    }
}

#[tokio::test]
async fn two_org_network_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    mock.respond_when(
        |c| c.has_arg("invoke"),
        MockResponse::text(
            "2024-01-15 10:30:45.123 UTC 0001 INFO [chaincodeCmd] ClientWait -> txid [abc123] committed with status (VALID) at peer0.org1.example.com:7051\n",
        ),
    );
    mock.respond_when(|c| c.has_arg("query"), MockResponse::text("{\"a\":1}\n"));
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();

    let resp = svc.init_network(&ctx, init_request(2)).await.unwrap();
    assert!(resp.success, "{}", resp.message);
    assert!(!resp.network_id.is_empty());
    assert!(!resp.endpoints.is_empty());

    let entry = svc.registry().lookup(&resp.network_id).await.unwrap();
    assert_eq!(entry.state(), NetworkState::Running);
    let network = entry.network();
    assert_eq!(network.organizations.len(), 2);
    assert!(network.organizations.iter().all(|o| !o.peers.is_empty()));
    assert_eq!(network.channel.name, "mychannel");

    // every peer joined the channel
    let joins = mock
        .calls()
        .iter()
        .filter(|c| c.has_arg("channel") && c.has_arg("join") && c.has_arg("peer"))
        .count();
    assert_eq!(joins, 2);

    let invoked = svc
        .invoke_transaction(
            &ctx,
            InvokeTransactionRequest {
                network_id: resp.network_id.clone(),
                chaincode_name: "basic".to_string(),
                function_name: "noop".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(invoked.success, "{}", invoked.message);
    assert_eq!(invoked.transaction_id, "abc123");

    let queried = svc
        .query_ledger(
            &ctx,
            QueryLedgerRequest {
                network_id: resp.network_id.clone(),
                chaincode_name: "basic".to_string(),
                function_name: "get".to_string(),
                args: vec!["a".to_string()],
            },
        )
        .await
        .unwrap();
    assert!(queried.success);
    assert_eq!(queried.payload, b"{\"a\":1}".to_vec());

    let status = svc
        .get_network_status(
            &ctx,
            GetNetworkStatusRequest {
                network_id: resp.network_id.clone(),
            },
        )
        .await
        .unwrap();
    assert!(status.running, "{}", status.status_text);
    assert!(status.nodes.len() >= 3);

    let listed = svc.list_networks().await;
    assert_eq!(listed.networks.len(), 1);
    assert_eq!(listed.networks[0].organizations, 2);

    let stopped = svc
        .stop_network(
            &ctx,
            StopNetworkRequest {
                network_id: resp.network_id.clone(),
                cleanup: true,
            },
        )
        .await
        .unwrap();
    assert!(stopped.success, "{}", stopped.message);
    assert!(svc.registry().is_empty().await);
    assert!(!network.artifacts_dir.exists());
    assert_eq!(entry.state(), NetworkState::Stopped);

    let again = svc
        .stop_network(
            &ctx,
            StopNetworkRequest {
                network_id: resp.network_id.clone(),
                cleanup: true,
            },
        )
        .await
        .unwrap();
    assert!(!again.success);
    assert!(again.message.contains("not found"));
}

#[tokio::test]
async fn failed_stop_keeps_network_registered_for_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();
    let id = svc.init_network(&ctx, init_request(1)).await.unwrap().network_id;

    mock.respond_times(
        1,
        |c| c.has_arg("rm") && c.has_arg("cli.example.com"),
        MockResponse::failure(1, "device or resource busy"),
    );
    let stop = StopNetworkRequest {
        network_id: id.clone(),
        cleanup: true,
    };

    let first = svc.stop_network(&ctx, stop.clone()).await.unwrap();
    assert!(!first.success);
    assert!(first.message.contains("cli.example.com"), "{}", first.message);
    let entry = svc.registry().get(&id).await.expect("network dropped after failed stop");
    assert_eq!(entry.state(), NetworkState::Stopping);

    let status = svc
        .get_network_status(&ctx, GetNetworkStatusRequest { network_id: id.clone() })
        .await
        .unwrap();
    assert!(!status.status_text.contains("not found"), "{}", status.status_text);

    let retry = svc.stop_network(&ctx, stop).await.unwrap();
    assert!(retry.success, "{}", retry.message);
    assert!(svc.registry().get(&id).await.is_none());
    assert_eq!(entry.state(), NetworkState::Stopped);
}

#[tokio::test]
async fn invoke_without_echoed_tx_id_reports_unknown() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();
    let id = svc.init_network(&ctx, init_request(1)).await.unwrap().network_id;

    let resp = svc
        .invoke_transaction(
            &ctx,
            InvokeTransactionRequest {
                network_id: id,
                chaincode_name: "basic".to_string(),
                function_name: "noop".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.transaction_id, "unknown");
}

#[tokio::test]
async fn transient_data_is_forwarded() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();
    let id = svc.init_network(&ctx, init_request(1)).await.unwrap().network_id;

    let mut transient = HashMap::new();
    transient.insert("secret".to_string(), b"s3cr3t".to_vec());
    let resp = svc
        .invoke_transaction(
            &ctx,
            InvokeTransactionRequest {
                network_id: id,
                chaincode_name: "private".to_string(),
                function_name: "store".to_string(),
                args: vec![],
                transient,
            },
        )
        .await
        .unwrap();
    assert!(resp.success);

    let invoke = mock
        .calls()
        .into_iter()
        .find(|c| c.has_arg("invoke"))
        .unwrap();
    assert!(invoke.flag_value("--transient").unwrap().contains("secret"));
}

#[tokio::test]
async fn unknown_network_is_reported_not_raised() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();

    let stop = svc
        .stop_network(
            &ctx,
            StopNetworkRequest {
                network_id: "missing".to_string(),
                cleanup: false,
            },
        )
        .await
        .unwrap();
    assert!(!stop.success);
    assert!(stop.message.contains("not found"));

    let invoke = svc
        .invoke_transaction(
            &ctx,
            InvokeTransactionRequest {
                network_id: "missing".to_string(),
                chaincode_name: "basic".to_string(),
                function_name: "noop".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!invoke.success);
    assert!(invoke.message.contains("not found"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn invalid_config_fails_without_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);

    let resp = svc
        .init_network(&OpContext::background(), init_request(0))
        .await
        .unwrap();
    assert!(!resp.success);
    assert!(resp.network_id.is_empty());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn failed_start_rolls_back_and_registers_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    mock.respond_when(
        |c| c.has_arg("run") && c.has_arg("peer0.org1.example.com"),
        MockResponse::failure(125, "port is already allocated"),
    );
    let svc = service(&mock, tmp.path(), 10);

    let resp = svc
        .init_network(&OpContext::background(), init_request(1))
        .await
        .unwrap();
    assert!(!resp.success);
    assert!(resp.message.contains("peer0.org1.example.com"));
    assert!(svc.registry().is_empty().await);

    assert!(mock
        .calls()
        .iter()
        .any(|c| c.has_arg("rm") && c.has_arg("orderer.example.com")));
    assert!(!tmp.path().join("networks").join(&resp.network_id).exists());
}

#[tokio::test]
async fn readiness_timeout_fails_within_deadline() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExecutor::new());
    mock.respond_when(is_inspect, MockResponse::text("created"));
    let svc = service(&mock, tmp.path(), 1);

    let started = Instant::now();
    let resp = svc
        .init_network(&OpContext::background(), init_request(1))
        .await
        .unwrap();
    assert!(!resp.success);
    assert!(resp.message.contains("timed out"), "{}", resp.message);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(svc.registry().is_empty().await);
}

#[tokio::test]
async fn cancelled_context_spawns_no_invocation() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let id = svc
        .init_network(&OpContext::background(), init_request(1))
        .await
        .unwrap()
        .network_id;
    mock.clear_calls();

    let ctx = OpContext::background();
    ctx.cancel();
    let resp = svc
        .invoke_transaction(
            &ctx,
            InvokeTransactionRequest {
                network_id: id,
                chaincode_name: "basic".to_string(),
                function_name: "noop".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!resp.success);
    assert!(resp.message.contains("cancelled"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_init_and_stop_keep_registry_consistent() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = Arc::new(service(&mock, tmp.path(), 10));

    let mut inits = Vec::new();
    for _ in 0..8 {
        let svc = svc.clone();
        inits.push(tokio::spawn(async move {
            svc.init_network(&OpContext::background(), init_request(1))
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    for handle in inits {
        let resp = handle.await.unwrap();
        assert!(resp.success, "{}", resp.message);
        ids.push(resp.network_id);
    }
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), 8);
    assert_eq!(svc.registry().len().await, 8);

    let mut stops = Vec::new();
    for id in ids.iter().take(4).cloned() {
        let svc = svc.clone();
        stops.push(tokio::spawn(async move {
            svc.stop_network(
                &OpContext::background(),
                StopNetworkRequest {
                    network_id: id,
                    cleanup: true,
                },
            )
            .await
            .unwrap()
        }));
    }
    for handle in stops {
        assert!(handle.await.unwrap().success);
    }

    let remaining: HashSet<String> = svc
        .list_networks()
        .await
        .networks
        .into_iter()
        .map(|n| n.network_id)
        .collect();
    let expected: HashSet<String> = ids.iter().skip(4).cloned().collect();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn stream_logs_forwards_lines_until_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    mock.respond_when(
        |c| c.has_arg("logs"),
        MockResponse::Lines(vec!["starting peer".to_string(), "joined channel".to_string()]),
    );
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();
    let id = svc.init_network(&ctx, init_request(1)).await.unwrap().network_id;

    let logs = svc
        .stream_logs(
            &ctx,
            StreamLogsRequest {
                network_id: id,
                container_name: "peer0.org1.example.com".to_string(),
            },
        )
        .await
        .unwrap();
    let entries: Vec<_> = logs.collect().await;
    assert_eq!(entries.len(), 2);
    let first = entries[0].as_ref().unwrap();
    assert_eq!(first.container, "peer0.org1.example.com");
    assert_eq!(first.message, "starting peer");
}

#[tokio::test]
async fn stream_logs_stops_on_cancel() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    mock.respond_when(|c| c.has_arg("logs"), MockResponse::Hang);
    let svc = service(&mock, tmp.path(), 10);
    let id = svc
        .init_network(&OpContext::background(), init_request(1))
        .await
        .unwrap()
        .network_id;

    let ctx = OpContext::background();
    let mut logs = svc
        .stream_logs(
            &ctx,
            StreamLogsRequest {
                network_id: id,
                container_name: "orderer.example.com".to_string(),
            },
        )
        .await
        .unwrap();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let item = tokio::time::timeout(Duration::from_secs(5), logs.next())
        .await
        .expect("stream did not stop after cancel");
    let err = item.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(logs.next().await.is_none());
}

#[tokio::test]
async fn stream_logs_rejects_foreign_container() {
    let tmp = tempfile::tempdir().unwrap();
    let mock = healthy_mock();
    let svc = service(&mock, tmp.path(), 10);
    let ctx = OpContext::background();
    let id = svc.init_network(&ctx, init_request(1)).await.unwrap().network_id;

    let err = match svc
        .stream_logs(
            &ctx,
            StreamLogsRequest {
                network_id: id,
                container_name: "postgres".to_string(),
            },
        )
        .await
    {
        Ok(_) => panic!("foreign container accepted"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), ErrorKind::ContainerFailed);
}
