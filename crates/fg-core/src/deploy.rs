//! Chaincode lifecycle: package, install, approve, commit.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use fg_types::{ChaincodeSpec, ErrorKind, FabricGridError, Network, Organization, Peer, Result};
use regex::Regex;
use tracing::{debug, info};

use crate::command::{endorsement_args, orderer_args, ControlCommand};
use crate::context::OpContext;
use crate::executor::Executor;
use crate::invoke::acting_identity;
use crate::output_parser::clean_output;

const LANGUAGES: &[&str] = &["golang", "node", "java"];

static COMMITTED_SEQUENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sequence:[ \t]*(\d+)").expect("valid committed sequence regex")
});

pub struct ChaincodeDeployer {
    executor: Arc<dyn Executor>,
    docker_bin: String,
    command_timeout: Option<Duration>,
}

impl ChaincodeDeployer {
    pub fn new(executor: Arc<dyn Executor>, docker_bin: impl Into<String>) -> Self {
        Self {
            executor,
            docker_bin: docker_bin.into(),
            command_timeout: None,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Deploy `spec` on the network's channel and return its package id.
    pub async fn deploy(&self, ctx: &OpContext, network: &Network, spec: &ChaincodeSpec) -> Result<String> {
        ctx.check("deploy_chaincode")?;
        let language = normalize_language(&spec.language)?;
        if spec.name.trim().is_empty() || spec.version.trim().is_empty() {
            return Err(FabricGridError::InvalidConfig(
                "chaincode name and version must not be empty".to_string(),
            ));
        }
        let (_, _, orderer) = acting_identity(network)?;
        let orgs = endorsing_orgs(network, &spec.endorsing_orgs)?;
        let (lead_org, lead) = lead_peer(orgs[0])?;

        let label = spec.label();
        let package_file = format!("{label}.tar.gz");
        let channel = network.channel.name.as_str();

        info!(
            network = %network.id,
            chaincode = %spec.name,
            version = %spec.version,
            orgs = orgs.len(),
            "Deploying chaincode"
        );

        let package = ControlCommand::peer(network, lead_org, lead)
            .args(["lifecycle", "chaincode", "package"])
            .arg(package_file.as_str())
            .arg("--path")
            .arg(spec.path.as_str())
            .arg("--lang")
            .arg(language)
            .arg("--label")
            .arg(label.as_str());
        self.stage(ctx, spec, "package", &package).await?;

        for org in &orgs {
            for peer in &org.peers {
                let install = ControlCommand::peer(network, org, peer)
                    .args(["lifecycle", "chaincode", "install"])
                    .arg(package_file.as_str());
                match self.stage(ctx, spec, "install", &install).await {
                    Ok(_) => debug!(peer = %peer.name, "Chaincode installed"),
                    Err(e) if already_installed(&e) => {
                        debug!(peer = %peer.name, "Chaincode already installed")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let query = ControlCommand::peer(network, lead_org, lead)
            .args(["lifecycle", "chaincode", "queryinstalled"]);
        let listing = self.stage(ctx, spec, "queryinstalled", &query).await?;
        let package_id = parse_package_id(&listing, &label).ok_or_else(|| {
            FabricGridError::ChaincodeDeployFailed {
                chaincode: spec.name.clone(),
                stage: "queryinstalled".to_string(),
                message: format!("no installed package with label {label}"),
                output: listing.clone(),
            }
        })?;

        let sequence = match spec.sequence {
            Some(sequence) => sequence,
            None => {
                let committed = ControlCommand::peer(network, lead_org, lead)
                    .args(["lifecycle", "chaincode", "querycommitted", "-C", channel, "--name"])
                    .arg(spec.name.as_str());
                let current = match self.stage(ctx, spec, "querycommitted", &committed).await {
                    Ok(out) => parse_committed_sequence(&out).unwrap_or(0),
                    Err(e) if not_committed(&e) => 0,
                    Err(e) => return Err(e),
                };
                current + 1
            }
        }
        .to_string();
        debug!(chaincode = %spec.name, sequence = %sequence, "Chaincode definition sequence");

        for org in &orgs {
            let (org, peer) = lead_peer(org)?;
            let approve = ControlCommand::peer(network, org, peer)
                .args(["lifecycle", "chaincode", "approveformyorg"])
                .args(orderer_args(network, orderer))
                .args(["-C", channel, "--name", spec.name.as_str(), "--version"])
                .arg(spec.version.as_str())
                .arg("--package-id")
                .arg(package_id.as_str())
                .arg("--sequence")
                .arg(sequence.as_str());
            self.stage(ctx, spec, "approve", &approve).await?;
        }

        let commit = ControlCommand::peer(network, lead_org, lead)
            .args(["lifecycle", "chaincode", "commit"])
            .args(orderer_args(network, orderer))
            .args(["-C", channel, "--name", spec.name.as_str(), "--version"])
            .arg(spec.version.as_str())
            .arg("--sequence")
            .arg(sequence.as_str())
            .args(endorsement_args(
                orgs.iter().flat_map(|o| o.peers.iter().map(move |p| (*o, p))),
            ));
        self.stage(ctx, spec, "commit", &commit).await?;

        info!(network = %network.id, chaincode = %spec.name, package_id = %package_id, "Chaincode committed");
        Ok(package_id)
    }

    async fn stage(
        &self,
        ctx: &OpContext,
        spec: &ChaincodeSpec,
        stage: &str,
        cmd: &ControlCommand,
    ) -> Result<String> {
        let ctx = match self.command_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        debug!(chaincode = %spec.name, stage, "Running chaincode lifecycle stage");
        match self
            .executor
            .execute_combined(&ctx, &self.docker_bin, &cmd.to_docker_args())
            .await
        {
            Ok(out) => Ok(clean_output(&String::from_utf8_lossy(&out))),
            Err(e) if matches!(
                e.kind(),
                ErrorKind::Cancelled | ErrorKind::Timeout | ErrorKind::BinaryMissing
            ) =>
            {
                Err(e)
            }
            Err(e) => {
                let output = match e.root() {
                    FabricGridError::ProcessFailed { output, .. } => output.clone(),
                    _ => String::new(),
                };
                Err(FabricGridError::ChaincodeDeployFailed {
                    chaincode: spec.name.clone(),
                    stage: stage.to_string(),
                    message: e.to_string(),
                    output,
                })
            }
        }
    }
}

/// Organizations named in `names` (by name or MSP id), or all when empty.
fn endorsing_orgs<'a>(network: &'a Network, names: &[String]) -> Result<Vec<&'a Organization>> {
    if names.is_empty() {
        return Ok(network.organizations.iter().collect());
    }
    let mut orgs: Vec<&Organization> = Vec::new();
    for name in names {
        let org = network.find_organization(name).ok_or_else(|| {
            FabricGridError::InvalidConfig(format!(
                "unknown endorsing organization {name} in network {}",
                network.id
            ))
        })?;
        if !orgs.iter().any(|o| o.name == org.name) {
            orgs.push(org);
        }
    }
    Ok(orgs)
}

fn lead_peer(org: &Organization) -> Result<(&Organization, &Peer)> {
    org.peers
        .first()
        .map(|p| (org, p))
        .ok_or_else(|| FabricGridError::InvalidConfig(format!("organization {} has no peers", org.name)))
}

fn normalize_language(language: &str) -> Result<&'static str> {
    let lower = language.trim().to_lowercase();
    let lower = if lower == "go" { "golang".to_string() } else { lower };
    LANGUAGES
        .iter()
        .find(|l| **l == lower)
        .copied()
        .ok_or_else(|| {
            FabricGridError::InvalidConfig(format!(
                "unsupported chaincode language {language:?}, expected one of {}",
                LANGUAGES.join(", ")
            ))
        })
}

/// Package id for `label` from `queryinstalled` output.
pub fn parse_package_id(output: &str, label: &str) -> Option<String> {
    let pattern = format!(r"(?m)Package ID: (\S+), Label: {}\s*$", regex::escape(label));
    let re = Regex::new(&pattern).ok()?;
    re.captures(output).map(|caps| caps[1].to_string())
}

/// Sequence of the committed definition from `querycommitted` output.
pub fn parse_committed_sequence(output: &str) -> Option<u32> {
    COMMITTED_SEQUENCE_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

fn not_committed(err: &FabricGridError) -> bool {
    match err.root() {
        FabricGridError::ChaincodeDeployFailed { output, .. } => {
            output.contains("404") || output.contains("is not defined")
        }
        _ => false,
    }
}

fn already_installed(err: &FabricGridError) -> bool {
    match err.root() {
        FabricGridError::ChaincodeDeployFailed { output, .. } => {
            output.contains("chaincode already successfully installed")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MockExecutor, MockResponse};
    use crate::topology::{synthesize, TopologyDefaults};
    use fg_types::NetworkConfig;
    use std::path::PathBuf;

    const INSTALLED: &str = "\
Installed chaincodes on peer:
Package ID: basic_1.0:4ec191e793b27e953ff2ede5a8bcc63152cecb1e4c3f301a26e22692c61967ad, Label: basic_1.0
Package ID: basic_1.01:aaaa, Label: basic_1.01
";

    fn network(orgs: u32) -> Network {
        let cfg = NetworkConfig {
            name: "demo".to_string(),
            org_count: orgs,
            channel_name: "mychannel".to_string(),
            ..Default::default()
        };
        synthesize("net-1", &cfg, &TopologyDefaults::default(), PathBuf::from("/tmp/net-1"))
            .unwrap()
    }

    fn spec(orgs: &[&str]) -> ChaincodeSpec {
        ChaincodeSpec {
            name: "basic".to_string(),
            path: "/opt/chaincode/basic".to_string(),
            version: "1.0".to_string(),
            language: "go".to_string(),
            endorsing_orgs: orgs.iter().map(|s| s.to_string()).collect(),
            sequence: Some(1),
        }
    }

    #[test]
    fn package_id_matches_exact_label() {
        assert_eq!(
            parse_package_id(INSTALLED, "basic_1.0").as_deref(),
            Some("basic_1.0:4ec191e793b27e953ff2ede5a8bcc63152cecb1e4c3f301a26e22692c61967ad")
        );
        assert_eq!(parse_package_id(INSTALLED, "basic_1.01").as_deref(), Some("basic_1.01:aaaa"));
        assert!(parse_package_id(INSTALLED, "basic_2.0").is_none());
    }

    #[tokio::test]
    async fn deploy_runs_every_stage() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        let net = network(2);

        let id = ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &net, &spec(&[]))
            .await
            .unwrap();
        assert!(id.starts_with("basic_1.0:4ec191"));

        let stages: Vec<String> = mock
            .calls()
            .iter()
            .map(|c| {
                let at = c.args.iter().position(|a| a == "chaincode").unwrap();
                c.args[at + 1].clone()
            })
            .collect();
        assert_eq!(
            stages,
            vec!["package", "install", "install", "queryinstalled", "approveformyorg", "approveformyorg", "commit"]
        );

        let calls = mock.calls();
        assert_eq!(calls[0].flag_value("--lang"), Some("golang"));
        assert_eq!(calls[0].flag_value("--label"), Some("basic_1.0"));
        assert!(calls[5].has_arg("CORE_PEER_LOCALMSPID=Org2MSP"));
        assert_eq!(calls[5].flag_value("--package-id"), Some(id.as_str()));
        assert_eq!(calls[6].flag_values("--peerAddresses").len(), 2);
    }

    #[test]
    fn committed_sequence_from_querycommitted() {
        let out = "Committed chaincode definition for chaincode 'basic' on channel 'mychannel':\n\
Version: 1.0, Sequence: 3, Endorsement Plugin: escc, Validation Plugin: vscc, Approvals: [Org1MSP: true]";
        assert_eq!(parse_committed_sequence(out), Some(3));
        assert_eq!(parse_committed_sequence(""), None);
    }

    #[tokio::test]
    async fn upgrade_uses_next_sequence() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        mock.respond_when_args_contain(
            "querycommitted",
            MockResponse::text("Version: 1.0, Sequence: 2, Endorsement Plugin: escc, Validation Plugin: vscc"),
        );
        let mut upgrade = spec(&[]);
        upgrade.sequence = None;

        ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &network(1), &upgrade)
            .await
            .unwrap();

        let calls = mock.calls();
        let approve = calls.iter().find(|c| c.has_arg("approveformyorg")).unwrap();
        assert_eq!(approve.flag_value("--sequence"), Some("3"));
        assert_eq!(calls.last().unwrap().flag_value("--sequence"), Some("3"));
    }

    #[tokio::test]
    async fn first_deploy_starts_at_sequence_one() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        mock.respond_when_args_contain(
            "querycommitted",
            MockResponse::failure(1, "Error: query failed with status: 404 - namespace basic is not defined"),
        );
        let mut first = spec(&[]);
        first.sequence = None;

        ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &network(1), &first)
            .await
            .unwrap();
        assert_eq!(mock.calls().last().unwrap().flag_value("--sequence"), Some("1"));
    }

    #[tokio::test]
    async fn endorsing_subset_limits_install() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        let net = network(3);

        ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &net, &spec(&["Org2MSP"]))
            .await
            .unwrap();

        let installs = mock.calls_mentioning("install");
        // install + queryinstalled
        assert_eq!(installs.len(), 2);
        assert!(installs[0].has_arg("CORE_PEER_LOCALMSPID=Org2MSP"));
        assert_eq!(mock.calls().last().unwrap().flag_values("--peerAddresses"), vec!["peer0.org2.example.com:9051"]);
    }

    #[tokio::test]
    async fn stage_failure_names_stage() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        mock.respond_when_args_contain(
            "approveformyorg",
            MockResponse::failure(1, "Error: proposal failed with status: 500 - failed to invoke backing implementation"),
        );

        let err = ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &network(1), &spec(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChaincodeDeployFailed);
        let ctx = err.context();
        assert_eq!(ctx.get("stage").unwrap(), "approve");
        assert!(ctx.get("output").unwrap().contains("backing implementation"));
    }

    #[tokio::test]
    async fn reinstall_is_tolerated() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text(INSTALLED));
        mock.respond_when(
            |c| c.args.iter().any(|a| a == "install"),
            MockResponse::failure(
                1,
                "Error: chaincode install failed with status: 500 - chaincode already successfully installed",
            ),
        );

        ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &network(1), &spec(&[]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_package_is_deploy_failure() {
        let mock = Arc::new(MockExecutor::new());
        mock.respond_when_args_contain("queryinstalled", MockResponse::text("Installed chaincodes on peer:\n"));

        let err = ChaincodeDeployer::new(mock.clone(), "docker")
            .deploy(&OpContext::background(), &network(1), &spec(&[]))
            .await
            .unwrap_err();
        assert_eq!(err.context().get("stage").unwrap(), "queryinstalled");
    }

    #[tokio::test]
    async fn invalid_input_runs_nothing() {
        let mock = Arc::new(MockExecutor::new());
        let deployer = ChaincodeDeployer::new(mock.clone(), "docker");
        let net = network(1);

        let mut bad_lang = spec(&[]);
        bad_lang.language = "cobol".to_string();
        let err = deployer.deploy(&OpContext::background(), &net, &bad_lang).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        let err = deployer
            .deploy(&OpContext::background(), &net, &spec(&["Org9"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert_eq!(mock.call_count(), 0);
    }
}
