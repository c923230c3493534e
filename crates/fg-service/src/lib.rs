pub mod registry;
pub mod server;
pub mod service;

pub use registry::{NetworkEntry, NetworkRegistry};
pub use server::{serve, RpcError, RpcReply, RpcRequest};
pub use service::{LogStream, NetworkService};
