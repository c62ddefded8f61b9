//! Grid sync error types.

use thiserror::Error;

use ipamgrid_core::GridId;

/// Errors returned by an appliance gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The endpoint does not exist on this appliance protocol version.
    #[error("endpoint not supported by appliance: {0}")]
    Unsupported(String),

    #[error("appliance unreachable: {0}")]
    Transport(String),

    #[error("invalid appliance response: {0}")]
    InvalidResponse(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur during grid sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Grid policy is missing or self-contradictory. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("grid not found: {0}")]
    GridNotFound(GridId),

    #[error("appliance gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("state store error: {0}")]
    State(#[from] ipamgrid_state::StateError),
}

pub type SyncResult<T> = Result<T, SyncError>;
