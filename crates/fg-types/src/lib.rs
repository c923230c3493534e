pub mod enums;
pub mod error;
pub mod invocation;
pub mod rpc;
pub mod topology;

// Re-exports for convenience
pub use enums::{ContainerRole, ContainerState, NetworkState};
pub use error::{ErrorKind, FabricGridError, Result, ResultExt};
pub use invocation::{ChaincodeSpec, InvocationResult, UNKNOWN_TX_ID};
pub use topology::{Channel, Network, NetworkConfig, Orderer, Organization, Peer};
