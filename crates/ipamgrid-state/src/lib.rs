//! ipamgrid-state — the mapping store.
//!
//! Backed by [redb](https://docs.rs/redb), holds grids, members, network
//! views and the authority/service assignments between them. It is the
//! sole arbiter of truth: every component reads it fresh per call and
//! writes it only inside [`StateStore::write`].
//!
//! # Schema
//!
//! ```text
//! grids ──┬── grid_members
//!         └── network_views ──┬── mapping_conditions
//!                             └── mapping_members
//! service_members          (network_id, role, member_id)
//! neutron_object_mapping   (network_id, subnet_id) → network_view_id
//! ```
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns. Keys encode
//! each table's uniqueness constraint, and deletes cascade along the tree
//! above.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{InsertOutcome, StateStore, StoreRead, StoreReader, StoreTxn};
pub use types::*;
