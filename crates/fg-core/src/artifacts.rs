//! Identity material and channel artifact generation.
//!
//! The heavy lifting (certificates, genesis/channel block) is delegated to an
//! external tool invoked through the [`Executor`]:
//!
//! ```text
//! <tool> generate --network-id <id> --output <dir> --channel <ch> --domain <domain>
//!        --orderers <n> --org <Name>:<domain>:<MSP>:<peers> ...
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fg_types::{ErrorKind, FabricGridError, Network, Result};
use tracing::{info, warn};

use crate::context::OpContext;
use crate::executor::Executor;

/// Subdirectory holding peer and orderer organizations.
pub const ORGANIZATIONS_DIR: &str = "organizations";
/// Subdirectory holding `<channel>.block`.
pub const CHANNEL_ARTIFACTS_DIR: &str = "channel-artifacts";

#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// Populate `network.artifacts_dir`. Fails with `CryptoGenFailed`.
    async fn generate(&self, ctx: &OpContext, network: &Network) -> Result<()>;

    /// Remove everything `generate` wrote. Missing directories are fine.
    async fn remove(&self, network: &Network) -> Result<()>;
}

pub struct ToolArtifactGenerator {
    executor: Arc<dyn Executor>,
    tool: String,
}

impl ToolArtifactGenerator {
    pub fn new(executor: Arc<dyn Executor>, tool: impl Into<String>) -> Self {
        Self {
            executor,
            tool: tool.into(),
        }
    }
}

/// Arguments for the generator tool.
pub fn generate_args(network: &Network) -> Vec<String> {
    let mut args = vec![
        "generate".to_string(),
        "--network-id".to_string(),
        network.id.clone(),
        "--output".to_string(),
        network.artifacts_dir.display().to_string(),
        "--channel".to_string(),
        network.channel.name.clone(),
        "--domain".to_string(),
        network.domain.clone(),
        "--orderers".to_string(),
        network.orderers.len().to_string(),
    ];
    for org in &network.organizations {
        args.push("--org".to_string());
        args.push(format!(
            "{}:{}:{}:{}",
            org.name,
            org.domain,
            org.msp_id,
            org.peers.len()
        ));
    }
    args
}

pub fn organizations_dir(artifacts_dir: &Path) -> PathBuf {
    artifacts_dir.join(ORGANIZATIONS_DIR)
}

pub fn channel_artifacts_dir(artifacts_dir: &Path) -> PathBuf {
    artifacts_dir.join(CHANNEL_ARTIFACTS_DIR)
}

#[async_trait]
impl ArtifactGenerator for ToolArtifactGenerator {
    async fn generate(&self, ctx: &OpContext, network: &Network) -> Result<()> {
        tokio::fs::create_dir_all(organizations_dir(&network.artifacts_dir)).await?;
        tokio::fs::create_dir_all(channel_artifacts_dir(&network.artifacts_dir)).await?;

        let args = generate_args(network);
        match self.executor.execute_combined(ctx, &self.tool, &args).await {
            Ok(_) => {
                info!(
                    network = %network.id,
                    dir = %network.artifacts_dir.display(),
                    "Generated network artifacts"
                );
                Ok(())
            }
            Err(e) if matches!(
                e.kind(),
                ErrorKind::Cancelled | ErrorKind::Timeout | ErrorKind::BinaryMissing
            ) =>
            {
                Err(e)
            }
            Err(e) => {
                warn!(network = %network.id, error = %e, "Artifact generation failed");
                Err(FabricGridError::CryptoGenFailed(e.to_string()))
            }
        }
    }

    async fn remove(&self, network: &Network) -> Result<()> {
        match tokio::fs::remove_dir_all(&network.artifacts_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
