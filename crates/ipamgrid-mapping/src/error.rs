//! Mapping error types.

use thiserror::Error;

use ipamgrid_core::GridId;
use ipamgrid_state::StateError;
use ipamgrid_sync::SyncError;

/// Errors that can occur while resolving or releasing a mapping.
#[derive(Debug, Error)]
pub enum MappingError {
    /// Catalog or grid policy is malformed or self-contradictory.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No eligible member, or a referenced member is gone.
    #[error("reservation error: {0}")]
    Reservation(String),

    #[error("grid {0} has not completed a grid sync")]
    SyncNotPerformed(GridId),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("grid sync error: {0}")]
    Sync(#[from] SyncError),
}

impl MappingError {
    /// Whether the caller may retry the whole resolution.
    ///
    /// Only reservation failures can clear up on their own (a member comes
    /// back or a view is released).
    pub fn is_retryable(&self) -> bool {
        matches!(self, MappingError::Reservation(_))
    }
}

pub type MappingResult<T> = Result<T, MappingError>;
