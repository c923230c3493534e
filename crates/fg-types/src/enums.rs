use serde::{Deserialize, Serialize};

/// Lifecycle state of a network.
///
/// `Created -> Starting -> Ready -> Running -> Stopping -> Stopped`; a network
/// may also move to `Stopping` from `Starting` or `Ready` when start-up is
/// rolled back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    #[default]
    Created,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
}

impl NetworkState {
    pub fn can_transition_to(self, next: NetworkState) -> bool {
        use NetworkState::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Ready)
                | (Ready, Running)
                | (Running, Stopping)
                | (Created, Stopping)
                | (Starting, Stopping)
                | (Ready, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Role a container plays in a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRole {
    Orderer,
    Peer,
    Cli,
}

impl std::fmt::Display for ContainerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Orderer => "orderer",
            Self::Peer => "peer",
            Self::Cli => "cli",
        };
        write!(f, "{s}")
    }
}

/// Container state as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Created,
    Restarting,
    Paused,
    Exited,
    Dead,
    NotFound,
    Other(String),
}

impl ContainerState {
    /// Parse the runtime's textual status (`docker inspect` `.State.Status`).
    pub fn parse(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "created" => Self::Created,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            "" | "not_found" => Self::NotFound,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        *self == Self::Running
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Created => write!(f, "created"),
            Self::Restarting => write!(f, "restarting"),
            Self::Paused => write!(f, "paused"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::NotFound => write!(f, "not_found"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}
