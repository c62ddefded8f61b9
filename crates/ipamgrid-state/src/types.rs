//! Persisted rows of the mapping store.
//!
//! These types are the durable source of truth for grids, members,
//! network views and the assignments between them. All types are
//! serializable to/from JSON for storage in redb tables.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use ipamgrid_core::{
    GridId, GridSection, IpAllocationStrategy, IpVersion, MappingRelation, MemberId,
    MemberRole, MemberStatus, NetworkViewId, NetworkViewScope, ServiceRole,
};

// ── Grid ──────────────────────────────────────────────────────────

/// One addressing domain controller and its sync bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grid {
    pub id: GridId,
    pub name: String,
    pub connection: GridSection,
    pub active: bool,
    /// Grid-wide policy from the last successful settings sync.
    pub settings: Option<GridSettings>,
    /// Bumped whenever a sync changes `settings`.
    pub settings_version: u64,
    /// Unix timestamp (seconds) of the last completed grid sync.
    pub last_sync_time: Option<u64>,
    /// Bumped on every completed grid sync.
    pub sync_generation: u64,
}

impl Grid {
    /// A freshly registered, never synced grid.
    pub fn new(connection: GridSection) -> Self {
        Self {
            id: connection.id,
            name: connection.name.clone(),
            connection,
            active: false,
            settings: None,
            settings_version: 0,
            last_sync_time: None,
            sync_generation: 0,
        }
    }

    /// Whether member discovery and settings sync have both completed.
    pub fn is_synced(&self) -> bool {
        self.settings.is_some() && self.last_sync_time.is_some()
    }
}

/// Grid-wide default policy read from the grid master.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridSettings {
    pub default_network_view_scope: NetworkViewScope,
    pub default_network_view: String,
    pub default_host_name_pattern: String,
    pub default_domain_name_pattern: String,
    pub external_host_name_pattern: Option<String>,
    pub external_domain_name_pattern: Option<String>,
    pub ns_group: Option<String>,
    pub network_template: Option<String>,
    pub ip_allocation_strategy: IpAllocationStrategy,
    pub dns_record_binding_types: Vec<String>,
    pub dns_record_unbinding_types: Vec<String>,
    pub dns_record_removable_types: Vec<String>,
    pub dhcp_support: bool,
    pub dns_support: bool,
    pub relay_support: bool,
    pub use_grid_master_for_dhcp: bool,
    pub admin_network_deletion: bool,
    pub allow_service_restart: bool,
    pub zone_creation_strategy: Vec<String>,
    pub tenant_name_persistence: bool,
    pub report_grid_sync_time: bool,
    pub grid_sync_support: bool,
    pub grid_sync_minimum_wait_secs: u64,
    pub grid_sync_maximum_wait_secs: u64,
}

impl GridSettings {
    /// Built-in defaults with the given resync window.
    pub fn with_sync_window(minimum_wait_secs: u64, maximum_wait_secs: u64) -> Self {
        Self {
            grid_sync_minimum_wait_secs: minimum_wait_secs,
            grid_sync_maximum_wait_secs: maximum_wait_secs,
            ..Self::default()
        }
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            default_network_view_scope: NetworkViewScope::Single,
            default_network_view: "default".to_string(),
            default_host_name_pattern: "host-{ip_address}".to_string(),
            default_domain_name_pattern: "{subnet_id}.cloud.global.com".to_string(),
            external_host_name_pattern: None,
            external_domain_name_pattern: None,
            ns_group: None,
            network_template: None,
            ip_allocation_strategy: IpAllocationStrategy::FixedAddress,
            dns_record_binding_types: Vec::new(),
            dns_record_unbinding_types: Vec::new(),
            dns_record_removable_types: Vec::new(),
            dhcp_support: false,
            dns_support: false,
            relay_support: false,
            use_grid_master_for_dhcp: true,
            admin_network_deletion: false,
            allow_service_restart: true,
            zone_creation_strategy: vec!["Forward".to_string()],
            tenant_name_persistence: false,
            report_grid_sync_time: false,
            grid_sync_support: true,
            grid_sync_minimum_wait_secs: 60,
            grid_sync_maximum_wait_secs: 300,
        }
    }
}

// ── Member ────────────────────────────────────────────────────────

/// One appliance node of a grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridMember {
    pub id: MemberId,
    pub grid_id: GridId,
    pub name: String,
    /// Appliance object reference, used to read extended attributes.
    pub member_ref: Option<String>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
    /// DHCP interface addresses; `None` means "use the primary interface".
    pub dhcp_ipv4: Option<Ipv4Addr>,
    pub dhcp_ipv6: Option<Ipv6Addr>,
    /// DNS interface addresses; `None` means "use the primary interface".
    pub dns_ipv4: Option<Ipv4Addr>,
    pub dns_ipv6: Option<Ipv6Addr>,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub licenses: Vec<String>,
    /// Unix timestamp of the sync pass that last saw this member.
    pub updated_at: u64,
}

impl GridMember {
    /// Address this member serves `role` on for the given IP version.
    pub fn service_address(&self, role: ServiceRole, version: IpVersion) -> Option<IpAddr> {
        let (v4, v6) = match role {
            ServiceRole::Dhcp => (self.dhcp_ipv4, self.dhcp_ipv6),
            ServiceRole::Dns => (self.dns_ipv4, self.dns_ipv6),
        };
        match version {
            IpVersion::V4 => v4.or(self.ipv4_address).map(IpAddr::V4),
            IpVersion::V6 => v6.or(self.ipv6_address).map(IpAddr::V6),
        }
    }

    /// Whether `reference` names this member by id or host name.
    pub fn is_named(&self, reference: &str) -> bool {
        self.id == reference || self.name.eq_ignore_ascii_case(reference)
    }
}

// ── Network view ──────────────────────────────────────────────────

/// An appliance-side addressing domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkView {
    pub id: NetworkViewId,
    pub grid_id: GridId,
    pub name: String,
    /// Unix timestamp when this row was created.
    pub created_at: u64,
}

/// Index row linking a static catalog condition to its network view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingCondition {
    pub grid_id: GridId,
    pub network_view_id: NetworkViewId,
    /// The condition key exactly as the catalog declares it.
    pub condition: String,
}

/// The authority member of a network view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingMember {
    pub network_view_id: NetworkViewId,
    pub grid_id: GridId,
    pub member_id: MemberId,
    pub relation: MappingRelation,
    pub reserved_at: u64,
}

/// A member serving DHCP or DNS for one orchestration network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceMember {
    pub network_id: String,
    pub network_view_id: NetworkViewId,
    pub member_id: MemberId,
    pub role: ServiceRole,
    pub reserved_at: u64,
}

/// Link between an orchestration network/subnet pair and its view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMapping {
    pub network_id: String,
    pub subnet_id: String,
    pub network_view_id: NetworkViewId,
    pub created_at: u64,
}

impl GridMember {
    /// Build the composite key for the grid members table.
    pub fn table_key(&self) -> String {
        member_key(self.grid_id, &self.id)
    }
}

impl MappingCondition {
    /// Build the composite key for the mapping conditions table.
    pub fn table_key(&self) -> String {
        condition_key(self.grid_id, &self.condition)
    }
}

impl ServiceMember {
    /// Build the composite key for the service members table.
    pub fn table_key(&self) -> String {
        service_key(&self.network_id, &self.network_view_id, self.role, &self.member_id)
    }
}

impl ObjectMapping {
    /// Build the composite key for the object mapping table.
    pub fn table_key(&self) -> String {
        object_key(&self.network_id, &self.subnet_id)
    }
}

pub(crate) fn member_key(grid_id: GridId, member_id: &str) -> String {
    format!("{grid_id}/{member_id}")
}

pub(crate) fn condition_key(grid_id: GridId, condition: &str) -> String {
    format!("{grid_id}/{condition}")
}

pub(crate) fn service_key(
    network_id: &str,
    view_id: &str,
    role: ServiceRole,
    member_id: &str,
) -> String {
    format!("{network_id}/{view_id}/{role}/{member_id}")
}

pub(crate) fn object_key(network_id: &str, subnet_id: &str) -> String {
    format!("{network_id}/{subnet_id}")
}
