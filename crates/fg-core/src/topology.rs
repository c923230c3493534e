//! Deterministic name and port assignment for a network.

use std::path::PathBuf;
use std::sync::LazyLock;

use fg_config::Config;
use fg_types::{
    Channel, FabricGridError, Network, NetworkConfig, Orderer, Organization, Peer, Result,
};
use regex::Regex;

static CHANNEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9.-]*$").expect("valid channel regex"));

/// Port spacing between organizations.
const ORG_PORT_STRIDE: u32 = 2000;
/// Port spacing between peers of one organization, and between orderers.
const NODE_PORT_STRIDE: u32 = 100;
/// Offset of an orderer's channel participation endpoint from its listen port.
const ADMIN_PORT_OFFSET: u32 = 3;

/// Values used when a network's option map does not override them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDefaults {
    pub domain: String,
    pub peers_per_org: u32,
    pub orderer_count: u32,
    pub peer_port_base: u16,
    pub orderer_port_base: u16,
}

impl Default for TopologyDefaults {
    fn default() -> Self {
        Self {
            domain: "example.com".to_string(),
            peers_per_org: 1,
            orderer_count: 1,
            peer_port_base: 7051,
            orderer_port_base: 7050,
        }
    }
}

impl TopologyDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            domain: config.domain.clone(),
            peer_port_base: config.peer_port_base,
            orderer_port_base: config.orderer_port_base,
            ..Self::default()
        }
    }
}

/// Reject bootstrap input that cannot describe a network.
pub fn validate_config(config: &NetworkConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(FabricGridError::InvalidConfig(
            "network name must not be empty".to_string(),
        ));
    }
    if config.org_count < 1 {
        return Err(FabricGridError::InvalidConfig(format!(
            "organization count must be >= 1, got {}",
            config.org_count
        )));
    }
    if config.channel_name.is_empty() {
        return Err(FabricGridError::InvalidConfig(
            "channel name must not be empty".to_string(),
        ));
    }
    if !CHANNEL_NAME_RE.is_match(&config.channel_name) {
        return Err(FabricGridError::InvalidConfig(format!(
            "invalid channel name {:?}: use lowercase letters, digits, '.' and '-'",
            config.channel_name
        )));
    }
    Ok(())
}

/// Build the topology for `config`. Same input, same output (except `id`).
pub fn synthesize(
    id: &str,
    config: &NetworkConfig,
    defaults: &TopologyDefaults,
    artifacts_dir: PathBuf,
) -> Result<Network> {
    validate_config(config)?;

    let domain = config
        .options
        .get("domain")
        .map(|d| d.trim().to_lowercase())
        .unwrap_or_else(|| defaults.domain.clone());
    if domain.is_empty() {
        return Err(FabricGridError::InvalidConfig(
            "domain must not be empty".to_string(),
        ));
    }
    let peers_per_org = option_number(config, "peers_per_org", defaults.peers_per_org)?;
    let orderer_count = option_number(config, "orderer_count", defaults.orderer_count)?;
    let peer_port_base = option_number(config, "peer_port_base", defaults.peer_port_base)?;
    let orderer_port_base = option_number(config, "orderer_port_base", defaults.orderer_port_base)?;

    if peers_per_org < 1 {
        return Err(FabricGridError::InvalidConfig(
            "peers_per_org must be >= 1".to_string(),
        ));
    }
    if orderer_count < 1 {
        return Err(FabricGridError::InvalidConfig(
            "orderer_count must be >= 1".to_string(),
        ));
    }

    let orderers = (0..orderer_count)
        .map(|i| -> Result<Orderer> {
            let name = if i == 0 {
                format!("orderer.{domain}")
            } else {
                format!("orderer{}.{domain}", i + 1)
            };
            let port = u32::from(orderer_port_base) + NODE_PORT_STRIDE * i;
            Ok(Orderer {
                port: to_port(&name, port)?,
                admin_port: to_port(&name, port + ADMIN_PORT_OFFSET)?,
                name,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let organizations = (1..=config.org_count)
        .map(|n| -> Result<Organization> {
            let org_domain = format!("org{n}.{domain}");
            let peers = (0..peers_per_org)
                .map(|j| -> Result<Peer> {
                    let name = format!("peer{j}.{org_domain}");
                    let port = u32::from(peer_port_base)
                        + ORG_PORT_STRIDE * (n - 1)
                        + NODE_PORT_STRIDE * j;
                    Ok(Peer {
                        port: to_port(&name, port)?,
                        name,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Organization {
                name: format!("Org{n}"),
                msp_id: format!("Org{n}MSP"),
                domain: org_domain,
                peers,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Network {
        id: id.to_string(),
        name: config.name.clone(),
        channel: Channel {
            name: config.channel_name.clone(),
        },
        organizations,
        orderers,
        control_container: format!("cli.{domain}"),
        docker_network: format!("fabricgrid_{domain}"),
        artifacts_dir,
        domain,
    })
}

fn option_number<T: std::str::FromStr>(config: &NetworkConfig, key: &str, default: T) -> Result<T> {
    match config.options.get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            FabricGridError::InvalidConfig(format!("option {key} is not a valid number: {raw:?}"))
        }),
        None => Ok(default),
    }
}

fn to_port(node: &str, port: u32) -> Result<u16> {
    u16::try_from(port).map_err(|_| {
        FabricGridError::InvalidConfig(format!("port {port} for {node} exceeds 65535"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_types::ErrorKind;
    use std::collections::HashMap;

    fn config(orgs: u32) -> NetworkConfig {
        NetworkConfig {
            name: "demo".to_string(),
            org_count: orgs,
            channel_name: "mychannel".to_string(),
            options: HashMap::new(),
        }
    }

    fn build(cfg: &NetworkConfig) -> Result<Network> {
        synthesize("net-1", cfg, &TopologyDefaults::default(), PathBuf::from("/tmp/net-1"))
    }

    #[test]
    fn two_org_layout() {
        let net = build(&config(2)).unwrap();

        assert_eq!(net.organizations.len(), 2);
        assert_eq!(net.organizations[0].name, "Org1");
        assert_eq!(net.organizations[1].msp_id, "Org2MSP");
        assert_eq!(net.organizations[1].domain, "org2.example.com");
        assert_eq!(net.organizations[0].peers[0].address(), "peer0.org1.example.com:7051");
        assert_eq!(net.organizations[1].peers[0].address(), "peer0.org2.example.com:9051");
        assert_eq!(net.orderers.len(), 1);
        assert_eq!(net.orderers[0].address(), "orderer.example.com:7050");
        assert_eq!(net.orderers[0].admin_port, 7053);
        assert_eq!(net.control_container, "cli.example.com");
        assert_eq!(net.docker_network, "fabricgrid_example.com");
        assert_eq!(net.channel.name, "mychannel");
    }

    #[test]
    fn options_override_defaults() {
        let mut cfg = config(1);
        cfg.options.insert("domain".to_string(), "Acme.io".to_string());
        cfg.options.insert("peers_per_org".to_string(), "2".to_string());
        cfg.options.insert("orderer_count".to_string(), "3".to_string());
        cfg.options.insert("peer_port_base".to_string(), "8051".to_string());
        let net = build(&cfg).unwrap();

        assert_eq!(net.domain, "acme.io");
        let peers: Vec<String> = net.peers().map(|(_, p)| p.address()).collect();
        assert_eq!(peers, vec!["peer0.org1.acme.io:8051", "peer1.org1.acme.io:8151"]);
        let orderers: Vec<&str> = net.orderers.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(orderers, vec!["orderer.acme.io", "orderer2.acme.io", "orderer3.acme.io"]);
        assert_eq!(net.orderers[2].port, 7250);
    }

    #[test]
    fn synthesis_is_reproducible() {
        let cfg = config(3);
        assert_eq!(build(&cfg).unwrap(), build(&cfg).unwrap());
    }

    #[test]
    fn rejects_zero_orgs() {
        let err = build(&config(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn rejects_bad_channel_names() {
        for name in ["", "MyChannel", "1channel", "my channel"] {
            let mut cfg = config(1);
            cfg.channel_name = name.to_string();
            assert_eq!(build(&cfg).unwrap_err().kind(), ErrorKind::InvalidConfig, "{name:?}");
        }
    }

    #[test]
    fn rejects_port_overflow() {
        let mut cfg = config(40);
        cfg.options.insert("peer_port_base".to_string(), "60000".to_string());
        let err = build(&cfg).unwrap_err();
        assert!(err.to_string().contains("exceeds 65535"));
    }

    #[test]
    fn rejects_non_numeric_option() {
        let mut cfg = config(1);
        cfg.options.insert("peers_per_org".to_string(), "many".to_string());
        assert_eq!(build(&cfg).unwrap_err().kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn rejects_zero_peers() {
        let mut cfg = config(1);
        cfg.options.insert("peers_per_org".to_string(), "0".to_string());
        assert_eq!(build(&cfg).unwrap_err().kind(), ErrorKind::InvalidConfig);
    }
}
