use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("failed to connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("RPC request `{method}` failed: {message}")]
    Rpc {
        method: &'static str,
        message: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no receipt for transaction {0}")]
    MissingReceipt(String),

    /// The mid-simulation revert required by the address-expansion pass did
    /// not succeed; the fork can no longer provide historical balances for
    /// this request.
    #[error("snapshot revert failed during simulation: {0}")]
    RevertFailed(String),

    /// State restoration itself failed on every fallback. The fork is in an
    /// unknown state; no further simulation may run until the operator
    /// re-establishes a clean fork.
    #[error("fatal: fork state not restored. original error: {original}; restore error: {restore}")]
    FatalRestore { original: String, restore: String },

    #[error("provider error: {0}")]
    Provider(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),

    #[error("chain client error: {0}")]
    Subxt(#[from] subxt::Error),

    #[error("codec error: {0}")]
    Codec(#[from] parity_scale_codec::Error),
}

impl SimulationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalRestore { .. })
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;
