//! Grid-wide policy read from the grid master's extended attributes.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use ipamgrid_core::{GridId, IpAllocationStrategy, NetworkViewScope, SyncSection};
use ipamgrid_state::*;

use crate::error::{SyncError, SyncResult};
use crate::gateway::{ApplianceGateway, AttributeMap, AttributeValue};

/// Extended attribute names on the grid master.
pub mod attr {
    pub const DEFAULT_NETWORK_VIEW_SCOPE: &str = "Default Network View Scope";
    pub const DEFAULT_NETWORK_VIEW: &str = "Default Network View";
    pub const DEFAULT_HOST_NAME_PATTERN: &str = "Default Host Name Pattern";
    pub const DEFAULT_DOMAIN_NAME_PATTERN: &str = "Default Domain Name Pattern";
    pub const EXTERNAL_HOST_NAME_PATTERN: &str = "External Host Name Pattern";
    pub const EXTERNAL_DOMAIN_NAME_PATTERN: &str = "External Domain Name Pattern";
    pub const NS_GROUP: &str = "NS Group";
    pub const NETWORK_TEMPLATE: &str = "Network Template";
    pub const IP_ALLOCATION_STRATEGY: &str = "IP Allocation Strategy";
    pub const DNS_RECORD_BINDING_TYPES: &str = "DNS Record Binding Types";
    pub const DNS_RECORD_UNBINDING_TYPES: &str = "DNS Record Unbinding Types";
    pub const DNS_RECORD_REMOVABLE_TYPES: &str = "DNS Record Removable Types";
    pub const DHCP_SUPPORT: &str = "DHCP Support";
    pub const DNS_SUPPORT: &str = "DNS Support";
    pub const RELAY_SUPPORT: &str = "Relay Support";
    pub const USE_GRID_MASTER_FOR_DHCP: &str = "Use Grid Master for DHCP";
    pub const ADMIN_NETWORK_DELETION: &str = "Admin Network Deletion";
    pub const ALLOW_SERVICE_RESTART: &str = "Allow Service Restart";
    pub const ZONE_CREATION_STRATEGY: &str = "Zone Creation Strategy";
    pub const TENANT_NAME_PERSISTENCE: &str = "Tenant Name Persistence";
    pub const REPORT_GRID_SYNC_TIME: &str = "Report Grid Sync Time";
    pub const GRID_SYNC_SUPPORT: &str = "Grid Sync Support";
    pub const GRID_SYNC_MINIMUM_WAIT_TIME: &str = "Grid Sync Minimum Wait Time";
    pub const GRID_SYNC_MAXIMUM_WAIT_TIME: &str = "Grid Sync Maximum Wait Time";
}

/// Pulls [`GridSettings`] from the grid master and stores them on the grid row.
pub struct GridConfigSync {
    state: StateStore,
    gateway: Arc<dyn ApplianceGateway>,
}

impl GridConfigSync {
    pub fn new(state: StateStore, gateway: Arc<dyn ApplianceGateway>) -> Self {
        Self { state, gateway }
    }

    /// Read the grid master's attributes and persist the resulting settings.
    ///
    /// Fails with [`SyncError::Configuration`] when no grid master has been
    /// discovered yet, or when an attribute value cannot be parsed.
    pub fn sync(&self, grid_id: GridId, fallback: &SyncSection) -> SyncResult<GridSettings> {
        let master = self.state.authority_member(grid_id)?.ok_or_else(|| {
            SyncError::Configuration(format!(
                "grid {grid_id} has no registered grid master; run member sync first"
            ))
        })?;
        let member_ref = master.member_ref.as_deref().ok_or_else(|| {
            SyncError::Configuration(format!("grid master {} has no object reference", master.name))
        })?;

        let attributes = self.gateway.get_extended_attributes(member_ref)?;
        let settings = parse_settings(&attributes, fallback)?;
        debug!(grid_id, attributes = attributes.len(), "grid settings parsed");

        self.state.write(|txn| {
            let mut grid = txn
                .get_grid(grid_id)?
                .ok_or(SyncError::GridNotFound(grid_id))?;
            if grid.settings.as_ref() != Some(&settings) {
                grid.settings = Some(settings.clone());
                grid.settings_version += 1;
                txn.put_grid(&grid)?;
                info!(
                    grid_id,
                    settings_version = grid.settings_version,
                    scope = settings.default_network_view_scope.label(),
                    "grid settings updated"
                );
            }
            Ok::<_, SyncError>(())
        })?;

        Ok(settings)
    }
}

/// Build settings from extended attributes; absent attributes keep defaults.
pub fn parse_settings(attrs: &AttributeMap, fallback: &SyncSection) -> SyncResult<GridSettings> {
    let mut s =
        GridSettings::with_sync_window(fallback.minimum_wait_secs, fallback.maximum_wait_secs);

    if let Some(v) = scalar(attrs, attr::DEFAULT_NETWORK_VIEW_SCOPE)? {
        s.default_network_view_scope =
            parse_kind::<NetworkViewScope>(attr::DEFAULT_NETWORK_VIEW_SCOPE, v)?;
    }
    if let Some(v) = scalar(attrs, attr::DEFAULT_NETWORK_VIEW)? {
        s.default_network_view = v.trim().to_string();
    }
    if let Some(v) = scalar(attrs, attr::DEFAULT_HOST_NAME_PATTERN)? {
        s.default_host_name_pattern = v.to_string();
    }
    if let Some(v) = scalar(attrs, attr::DEFAULT_DOMAIN_NAME_PATTERN)? {
        s.default_domain_name_pattern = v.to_string();
    }
    s.external_host_name_pattern = optional(attrs, attr::EXTERNAL_HOST_NAME_PATTERN)?;
    s.external_domain_name_pattern = optional(attrs, attr::EXTERNAL_DOMAIN_NAME_PATTERN)?;
    s.ns_group = optional(attrs, attr::NS_GROUP)?;
    s.network_template = optional(attrs, attr::NETWORK_TEMPLATE)?;
    if let Some(v) = scalar(attrs, attr::IP_ALLOCATION_STRATEGY)? {
        s.ip_allocation_strategy =
            parse_kind::<IpAllocationStrategy>(attr::IP_ALLOCATION_STRATEGY, v)?;
    }

    if let Some(v) = list(attrs, attr::DNS_RECORD_BINDING_TYPES) {
        s.dns_record_binding_types = v;
    }
    if let Some(v) = list(attrs, attr::DNS_RECORD_UNBINDING_TYPES) {
        s.dns_record_unbinding_types = v;
    }
    if let Some(v) = list(attrs, attr::DNS_RECORD_REMOVABLE_TYPES) {
        s.dns_record_removable_types = v;
    }
    if let Some(v) = list(attrs, attr::ZONE_CREATION_STRATEGY) {
        s.zone_creation_strategy = v;
    }

    let flags = [
        (attr::DHCP_SUPPORT, &mut s.dhcp_support),
        (attr::DNS_SUPPORT, &mut s.dns_support),
        (attr::RELAY_SUPPORT, &mut s.relay_support),
        (attr::USE_GRID_MASTER_FOR_DHCP, &mut s.use_grid_master_for_dhcp),
        (attr::ADMIN_NETWORK_DELETION, &mut s.admin_network_deletion),
        (attr::ALLOW_SERVICE_RESTART, &mut s.allow_service_restart),
        (attr::TENANT_NAME_PERSISTENCE, &mut s.tenant_name_persistence),
        (attr::REPORT_GRID_SYNC_TIME, &mut s.report_grid_sync_time),
        (attr::GRID_SYNC_SUPPORT, &mut s.grid_sync_support),
    ];
    for (name, slot) in flags {
        if let Some(v) = scalar(attrs, name)? {
            *slot = parse_bool(name, v)?;
        }
    }

    if let Some(v) = scalar(attrs, attr::GRID_SYNC_MINIMUM_WAIT_TIME)? {
        s.grid_sync_minimum_wait_secs = parse_secs(attr::GRID_SYNC_MINIMUM_WAIT_TIME, v)?;
    }
    if let Some(v) = scalar(attrs, attr::GRID_SYNC_MAXIMUM_WAIT_TIME)? {
        s.grid_sync_maximum_wait_secs = parse_secs(attr::GRID_SYNC_MAXIMUM_WAIT_TIME, v)?;
    }
    if s.grid_sync_minimum_wait_secs > s.grid_sync_maximum_wait_secs {
        return Err(SyncError::Configuration(format!(
            "{} ({}) exceeds {} ({})",
            attr::GRID_SYNC_MINIMUM_WAIT_TIME,
            s.grid_sync_minimum_wait_secs,
            attr::GRID_SYNC_MAXIMUM_WAIT_TIME,
            s.grid_sync_maximum_wait_secs
        )));
    }

    Ok(s)
}

/// A single-valued attribute. A one-element list is accepted as its value.
fn scalar<'a>(attrs: &'a AttributeMap, name: &str) -> SyncResult<Option<&'a str>> {
    match attrs.get(name) {
        None => Ok(None),
        Some(AttributeValue::Single(v)) => Ok(Some(v.as_str())),
        Some(AttributeValue::List(v)) if v.len() == 1 => Ok(Some(v[0].as_str())),
        Some(AttributeValue::List(v)) => Err(SyncError::Configuration(format!(
            "{name} expects one value, got {}",
            v.len()
        ))),
    }
}

/// A single-valued attribute where blank means unset.
fn optional(attrs: &AttributeMap, name: &str) -> SyncResult<Option<String>> {
    Ok(scalar(attrs, name)?
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}

fn list(attrs: &AttributeMap, name: &str) -> Option<Vec<String>> {
    attrs.get(name).map(|value| match value {
        AttributeValue::Single(v) => vec![v.clone()],
        AttributeValue::List(v) => v.clone(),
    })
}

fn parse_kind<T>(name: &str, value: &str) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| SyncError::Configuration(format!("{name}: {e}")))
}

fn parse_bool(name: &str, value: &str) -> SyncResult<bool> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(SyncError::Configuration(format!(
            "{name}: expected True or False, got {other:?}"
        ))),
    }
}

fn parse_secs(name: &str, value: &str) -> SyncResult<u64> {
    value.trim().parse().map_err(|_| {
        SyncError::Configuration(format!("{name}: expected seconds, got {value:?}"))
    })
}
