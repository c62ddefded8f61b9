//! redb table definitions for the mapping store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized rows).
//! Keys encode the uniqueness constraint of each table, so an insert
//! against an existing key is a conflict the store resolves by reusing the
//! row already there.

use redb::TableDefinition;

/// Grids keyed by `{grid_id}`.
pub const GRIDS: TableDefinition<&str, &[u8]> = TableDefinition::new("grids");

/// Members keyed by `{grid_id}/{member_id}`.
pub const GRID_MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("grid_members");

/// Network views keyed by `{network_view_id}`, a hash of (grid id, view name).
pub const NETWORK_VIEWS: TableDefinition<&str, &[u8]> = TableDefinition::new("network_views");

/// Static catalog conditions keyed by `{grid_id}/{condition}`.
pub const MAPPING_CONDITIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("mapping_conditions");

/// Authority members keyed by `{network_view_id}` (one per view).
pub const MAPPING_MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("mapping_members");

/// Service members keyed by `{network_id}/{network_view_id}/{role}/{member_id}`.
///
/// A network whose subnets land in several views keeps one set of rows per view.
pub const SERVICE_MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("service_members");

/// Network/subnet to view links keyed by `{network_id}/{subnet_id}`.
pub const NEUTRON_OBJECT_MAPPING: TableDefinition<&str, &[u8]> =
    TableDefinition::new("neutron_object_mapping");

pub(crate) const ALL: [TableDefinition<&str, &[u8]>; 7] = [
    GRIDS,
    GRID_MEMBERS,
    NETWORK_VIEWS,
    MAPPING_CONDITIONS,
    MAPPING_MEMBERS,
    SERVICE_MEMBERS,
    NEUTRON_OBJECT_MAPPING,
];
