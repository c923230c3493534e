pub mod context;
pub mod executor;
pub mod logging;
pub mod output_parser;
pub mod utils;

// Fabric control plane
pub mod artifacts;
pub mod command;
pub mod deploy;
pub mod invoke;
pub mod lifecycle;
pub mod runtime;
pub mod topology;

pub use context::{DoneReason, OpContext};
pub use executor::{
    ExecMode, Executor, MockExecutor, MockResponse, ProcessStream, RecordedCall, SystemExecutor,
};
pub use logging::init_logging;
pub use output_parser::{clean_output, extract_payload, extract_tx_id, parse_query_result};
pub use utils::GracefulShutdown;

pub use artifacts::{ArtifactGenerator, ToolArtifactGenerator};
pub use command::{build_args_json, ControlCommand};
pub use deploy::ChaincodeDeployer;
pub use invoke::{acting_identity, InvocationEngine};
pub use lifecycle::{ImageSet, LifecycleManager, LifecycleSettings, NetworkStatus};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
pub use topology::{synthesize, validate_config, TopologyDefaults};
