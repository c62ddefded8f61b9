//! Stable identifiers derived from natural keys.
//!
//! Member and network-view ids are hashes of the attributes that make them
//! unique, so the same member keeps its id across IP changes and two
//! writers creating the same view compute the same row key.

use sha2::{Digest, Sha256};

use crate::types::GridId;

/// Number of hash bytes kept in an id (32 hex characters).
const ID_BYTES: usize = 16;

/// Id of a grid member: hash over the grid id and the member host name.
pub fn member_id(grid_id: GridId, host_name: &str) -> String {
    digest(&format!("{grid_id}:{host_name}"))
}

/// Id of a network view: hash over the grid id and the view name.
pub fn network_view_id(grid_id: GridId, name: &str) -> String {
    digest(&format!("{grid_id}/{name}"))
}

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hex::encode(&hash[..ID_BYTES])
}
