//! MappingResolver — (network, subnet) → network view and members.
//!
//! Resolution runs in one write transaction. A recorded object mapping is
//! returned as is; otherwise the catalog (or the grid default scope) picks
//! the view name, the view is found or created, members are reserved and
//! the mapping is recorded. Any error aborts the whole transaction.

use std::net::IpAddr;

use serde::Serialize;
use tracing::{debug, info};

use ipamgrid_core::{
    GridId, IpVersion, MappingRelation, MemberId, MemberRole, NetworkViewId, ServiceRole,
    epoch_secs,
};
use ipamgrid_state::*;

use crate::catalog::{ConditionCatalog, ReservationPolicy};
use crate::error::{MappingError, MappingResult};
use crate::reservation::{MemberReservationEngine, Reservation};
use crate::scope::{Network, ScopeAttributes, Subnet};

const DEFAULT_VIEW: &str = "default";

/// A member as handed to the allocation and DNS layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedMember {
    pub id: MemberId,
    pub name: String,
    pub member_ref: Option<String>,
    pub role: MemberRole,
    /// Interface address for the subnet's IP version.
    pub address: Option<IpAddr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnsMembers {
    pub primary: Vec<ResolvedMember>,
    pub secondary: Vec<ResolvedMember>,
}

/// Everything downstream needs to manage one subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingContext {
    pub grid_id: GridId,
    pub network_view_id: NetworkViewId,
    pub network_view_name: String,
    pub dns_view_name: String,
    pub mapping_relation: MappingRelation,
    pub authority_member: ResolvedMember,
    pub dhcp_members: Vec<ResolvedMember>,
    pub dns_members: DnsMembers,
}

pub struct MappingResolver<'a> {
    txn: &'a StoreTxn,
    grid: &'a Grid,
}

impl<'a> MappingResolver<'a> {
    pub fn new(txn: &'a StoreTxn, grid: &'a Grid) -> Self {
        Self { txn, grid }
    }

    /// Resolve a subnet, recording a new mapping if it has none.
    pub fn resolve(
        &self,
        network: &Network,
        subnet: &Subnet,
        catalog: &ConditionCatalog,
    ) -> MappingResult<MappingContext> {
        match self.existing(network, subnet)? {
            Some(context) => Ok(context),
            None => self.create(network, subnet, catalog),
        }
    }

    /// The recorded mapping of a subnet, if any. Never consults the catalog.
    pub fn existing(
        &self,
        network: &Network,
        subnet: &Subnet,
    ) -> MappingResult<Option<MappingContext>> {
        let Some(mapping) = self.txn.get_object_mapping(&network.id, &subnet.id)? else {
            return Ok(None);
        };
        let view = self
            .txn
            .get_network_view(&mapping.network_view_id)?
            .ok_or_else(|| {
                MappingError::NotFound(format!(
                    "network view {} of subnet {}",
                    mapping.network_view_id, subnet.id
                ))
            })?;
        let authority = self.txn.get_mapping_member(&view.id)?.ok_or_else(|| {
            MappingError::NotFound(format!("authority member of network view {}", view.name))
        })?;
        let services = self.txn.list_view_service_members(&network.id, &view.id)?;

        debug!(network_view = %view.name, subnet_id = %subnet.id, "recorded mapping reused");
        let reservation = Reservation {
            authority,
            services,
        };
        self.context(&view, &reservation, subnet.ip_version()).map(Some)
    }

    /// Match, reserve, and record a mapping for an unmapped subnet.
    pub fn create(
        &self,
        network: &Network,
        subnet: &Subnet,
        catalog: &ConditionCatalog,
    ) -> MappingResult<MappingContext> {
        let attrs = ScopeAttributes::new(network, subnet);
        let (view_name, policy) = match catalog.matching(&attrs) {
            Some(entry) => {
                debug!(condition = %entry.condition, subnet_id = %subnet.id, "condition matched");
                (entry.view.render(&attrs)?, entry.policy.clone())
            }
            None => self.default_scope(&attrs)?,
        };

        let view = self
            .txn
            .find_or_create_network_view(self.grid.id, &view_name)?
            .into_inner();
        let reservation = MemberReservationEngine::new(self.txn, self.grid.id)?
            .reserve(&view, &network.id, &policy)?;

        let recorded = self.txn.insert_object_mapping(ObjectMapping {
            network_id: network.id.clone(),
            subnet_id: subnet.id.clone(),
            network_view_id: view.id.clone(),
            created_at: epoch_secs(),
        })?;
        if !recorded.is_inserted() {
            // Another resolution recorded this pair first; adopt it.
            return self.existing(network, subnet)?.ok_or_else(|| {
                MappingError::NotFound(format!("mapping of subnet {}", subnet.id))
            });
        }

        info!(
            network_view = %view.name,
            network_id = %network.id,
            subnet_id = %subnet.id,
            relation = %reservation.authority.relation,
            "mapping recorded"
        );
        self.context(&view, &reservation, subnet.ip_version())
    }

    /// View name and policy of the grid-wide default scope.
    fn default_scope(&self, attrs: &ScopeAttributes) -> MappingResult<(String, ReservationPolicy)> {
        let settings = self
            .grid
            .settings
            .as_ref()
            .ok_or(MappingError::SyncNotPerformed(self.grid.id))?;
        let name = attrs
            .default_view_name(settings.default_network_view_scope, &settings.default_network_view)
            .ok_or_else(|| {
                MappingError::Configuration(format!(
                    "no condition matches subnet {} and the {} default scope yields no view",
                    attrs.subnet_id,
                    settings.default_network_view_scope.label()
                ))
            })?;
        let grid_master = self.txn.authority_member(self.grid.id)?.ok_or_else(|| {
            MappingError::Reservation(format!("grid {} has no grid master", self.grid.id))
        })?;
        if !grid_master.status.is_on() {
            return Err(MappingError::Reservation(format!(
                "grid master {} is off and cannot serve the default scope",
                grid_master.name
            )));
        }
        debug!(network_view = %name, subnet_id = %attrs.subnet_id, "default scope applied");
        Ok((
            name,
            ReservationPolicy::grid_default(&grid_master.id, settings.use_grid_master_for_dhcp),
        ))
    }

    fn context(
        &self,
        view: &NetworkView,
        reservation: &Reservation,
        version: IpVersion,
    ) -> MappingResult<MappingContext> {
        let relation = reservation.authority.relation;
        let authority = self.member(&reservation.authority.member_id)?;

        let mut dhcp_members = Vec::new();
        let mut dns_reserved = Vec::new();
        for service in &reservation.services {
            let member = self.member(&service.member_id)?;
            let resolved = resolved(&member, member.service_address(service.role, version));
            match service.role {
                ServiceRole::Dhcp => dhcp_members.push(resolved),
                ServiceRole::Dns => dns_reserved.push(resolved),
            }
        }

        let dns_members = match relation {
            MappingRelation::Delegated | MappingRelation::AuthorityOwned => DnsMembers {
                primary: dns_reserved,
                secondary: Vec::new(),
            },
            MappingRelation::AuthorityOwnedDistributed => DnsMembers {
                primary: vec![resolved(
                    &authority,
                    authority.service_address(ServiceRole::Dns, version),
                )],
                secondary: dns_reserved
                    .into_iter()
                    .filter(|m| m.id != authority.id)
                    .collect(),
            },
        };

        Ok(MappingContext {
            grid_id: self.grid.id,
            network_view_id: view.id.clone(),
            network_view_name: view.name.clone(),
            dns_view_name: dns_view_name(&view.name),
            mapping_relation: relation,
            authority_member: resolved(&authority, primary_address(&authority, version)),
            dhcp_members,
            dns_members,
        })
    }

    fn member(&self, member_id: &str) -> MappingResult<GridMember> {
        self.txn.get_member(self.grid.id, member_id)?.ok_or_else(|| {
            MappingError::NotFound(format!("member {member_id} in grid {}", self.grid.id))
        })
    }
}

/// Undo the mapping of one subnet.
///
/// Drops the network's service rows in a view once none of its subnets map
/// there, and a view no condition is bound to once it has no subnet left,
/// which frees its authority member. Returns whether a mapping existed.
pub fn release_subnet(txn: &StoreTxn, network_id: &str, subnet_id: &str) -> MappingResult<bool> {
    let Some(mapping) = txn.delete_object_mapping(network_id, subnet_id)? else {
        return Ok(false);
    };
    let view_id = &mapping.network_view_id;

    let remaining = txn.list_object_mappings_for_network(network_id)?;
    let removed = if remaining.is_empty() {
        txn.delete_service_members(network_id)?
    } else if remaining.iter().all(|m| m.network_view_id != *view_id) {
        txn.delete_view_service_members(network_id, view_id)?
    } else {
        Vec::new()
    };
    if !removed.is_empty() {
        debug!(network_id, removed = removed.len(), "service members released");
    }

    if txn.list_object_mappings_for_view(view_id)?.is_empty() {
        if let Some(view) = txn.get_network_view(view_id)? {
            let bound = txn
                .list_conditions(view.grid_id)?
                .iter()
                .any(|c| c.network_view_id == view.id);
            if !bound {
                txn.delete_network_view(&view.id)?;
                info!(network_view = %view.name, "unused network view released");
            }
        }
    }

    info!(network_id, subnet_id, "mapping released");
    Ok(true)
}

/// DNS view paired with a network view.
pub fn dns_view_name(network_view: &str) -> String {
    if network_view == DEFAULT_VIEW {
        DEFAULT_VIEW.to_string()
    } else {
        format!("{DEFAULT_VIEW}.{network_view}")
    }
}

fn primary_address(member: &GridMember, version: IpVersion) -> Option<IpAddr> {
    match version {
        IpVersion::V4 => member.ipv4_address.map(IpAddr::V4),
        IpVersion::V6 => member.ipv6_address.map(IpAddr::V6),
    }
}

fn resolved(member: &GridMember, address: Option<IpAddr>) -> ResolvedMember {
    ResolvedMember {
        id: member.id.clone(),
        name: member.name.clone(),
        member_ref: member.member_ref.clone(),
        role: member.role,
        address,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_view_follows_network_view() {
        assert_eq!(dns_view_name("default"), "default");
        assert_eq!(dns_view_name("tenant-a"), "default.tenant-a");
    }
}
