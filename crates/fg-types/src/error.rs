use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable classification of a failure, independent of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidConfig,
    CryptoGenFailed,
    ContainerFailed,
    DockerUnavailable,
    BinaryMissing,
    NetworkNotFound,
    ChaincodeDeployFailed,
    TransactionFailed,
    Timeout,
    Cancelled,
    ProcessFailed,
    Io,
    Json,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidConfig => "invalid_config",
            Self::CryptoGenFailed => "crypto_gen_failed",
            Self::ContainerFailed => "container_failed",
            Self::DockerUnavailable => "docker_unavailable",
            Self::BinaryMissing => "binary_missing",
            Self::NetworkNotFound => "network_not_found",
            Self::ChaincodeDeployFailed => "chaincode_deploy_failed",
            Self::TransactionFailed => "transaction_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ProcessFailed => "process_failed",
            Self::Io => "io",
            Self::Json => "json",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Top-level error type for FabricGrid.
#[derive(Error, Debug)]
pub enum FabricGridError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("artifact generation failed: {0}")]
    CryptoGenFailed(String),

    #[error("container {container} failed: {message}")]
    ContainerFailed { container: String, message: String },

    #[error("container runtime unavailable: {0}")]
    DockerUnavailable(String),

    #[error("required binary not found: {0}")]
    BinaryMissing(String),

    #[error("network not found: {0}")]
    NetworkNotFound(String),

    #[error("chaincode {chaincode} deploy failed during {stage}: {message}")]
    ChaincodeDeployFailed {
        chaincode: String,
        stage: String,
        message: String,
        output: String,
    },

    #[error("transaction {chaincode}.{function} failed: {message}")]
    TransactionFailed {
        chaincode: String,
        function: String,
        message: String,
        output: String,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("process {program} exited with status {exit_code:?}: {}", .output.trim())]
    ProcessFailed {
        program: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{op}: {source}")]
    Operation {
        op: &'static str,
        source: Box<FabricGridError>,
    },

    #[error("{0}")]
    Internal(String),
}

impl FabricGridError {
    /// Classification of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::CryptoGenFailed(_) => ErrorKind::CryptoGenFailed,
            Self::ContainerFailed { .. } => ErrorKind::ContainerFailed,
            Self::DockerUnavailable(_) => ErrorKind::DockerUnavailable,
            Self::BinaryMissing(_) => ErrorKind::BinaryMissing,
            Self::NetworkNotFound(_) => ErrorKind::NetworkNotFound,
            Self::ChaincodeDeployFailed { .. } => ErrorKind::ChaincodeDeployFailed,
            Self::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Operation { source, .. } => source.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wrap this error with the name of the operation that failed.
    pub fn in_op(self, op: &'static str) -> Self {
        Self::Operation {
            op,
            source: Box::new(self),
        }
    }

    /// The innermost (unwrapped) error.
    pub fn root(&self) -> &FabricGridError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Operation names from outermost to innermost.
    pub fn operations(&self) -> Vec<&'static str> {
        let mut ops = Vec::new();
        let mut current = self;
        while let Self::Operation { op, source } = current {
            ops.push(*op);
            current = source;
        }
        ops
    }

    /// Structured diagnostic context carried by this error.
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut ctx = BTreeMap::new();
        ctx.insert("kind".to_string(), self.kind().to_string());

        let ops = self.operations();
        if !ops.is_empty() {
            ctx.insert("operation".to_string(), ops.join(" > "));
        }

        match self.root() {
            Self::ContainerFailed { container, .. } => {
                ctx.insert("container".to_string(), container.clone());
            }
            Self::ChaincodeDeployFailed {
                chaincode,
                stage,
                output,
                ..
            } => {
                ctx.insert("chaincode".to_string(), chaincode.clone());
                ctx.insert("stage".to_string(), stage.clone());
                ctx.insert("output".to_string(), output.clone());
            }
            Self::TransactionFailed {
                chaincode,
                function,
                output,
                ..
            } => {
                ctx.insert("chaincode".to_string(), chaincode.clone());
                ctx.insert("function".to_string(), function.clone());
                ctx.insert("output".to_string(), output.clone());
            }
            Self::ProcessFailed {
                program,
                exit_code,
                output,
            } => {
                ctx.insert("program".to_string(), program.clone());
                if let Some(code) = exit_code {
                    ctx.insert("exit_code".to_string(), code.to_string());
                }
                ctx.insert("output".to_string(), output.clone());
            }
            _ => {}
        }
        ctx
    }

    /// Domain failures are reported to callers as `success=false`; everything
    /// else is exceptional and surfaces as a transport error.
    pub fn is_domain_failure(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::DockerUnavailable | ErrorKind::Io | ErrorKind::Json | ErrorKind::Internal
        )
    }
}

/// Attach an operation name to the error side of a result.
pub trait ResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| e.in_op(op))
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, FabricGridError>;
