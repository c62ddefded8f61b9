//! MemberReservationEngine — authority and service member reservation.
//!
//! Runs inside the caller's write transaction: the "is this member still
//! free" check and the row that claims it commit together, and an error
//! anywhere aborts every row written for the resolution.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use ipamgrid_core::{GridId, MemberRole, ServiceRole, epoch_secs};
use ipamgrid_state::*;

use crate::catalog::{AuthorityPolicy, ReservationPolicy, ServicePolicy};
use crate::error::{MappingError, MappingResult};

/// Members holding a network view and serving one network.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub authority: MappingMember,
    /// Service rows for the network in this view, by role (DHCP first) then member id.
    pub services: Vec<ServiceMember>,
}

pub struct MemberReservationEngine<'a> {
    txn: &'a StoreTxn,
    grid_id: GridId,
    members: HashMap<String, GridMember>,
}

impl<'a> MemberReservationEngine<'a> {
    /// Snapshot the grid's members inside `txn`.
    pub fn new(txn: &'a StoreTxn, grid_id: GridId) -> MappingResult<Self> {
        let members = txn
            .list_members(grid_id)?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        Ok(Self {
            txn,
            grid_id,
            members,
        })
    }

    /// A registered member of the grid.
    pub fn member(&self, member_id: &str) -> MappingResult<&GridMember> {
        self.members.get(member_id).ok_or_else(|| {
            MappingError::Reservation(format!("member {member_id} is not registered"))
        })
    }

    /// Ensure `view` has an authority and `network_id` its service members.
    pub fn reserve(
        &self,
        view: &NetworkView,
        network_id: &str,
        policy: &ReservationPolicy,
    ) -> MappingResult<Reservation> {
        let authority = match self.txn.get_mapping_member(&view.id)? {
            Some(existing) => {
                debug!(network_view = %view.name, member_id = %existing.member_id, "authority reused");
                existing
            }
            None => self.reserve_authority(view, policy)?,
        };
        let authority_member = self.member(&authority.member_id)?;

        let mut services = Vec::new();
        for role in ServiceRole::ALL {
            let chosen: Vec<&GridMember> = match policy.service(role) {
                ServicePolicy::Members(ids) => {
                    let mut chosen = Vec::with_capacity(ids.len());
                    for id in ids {
                        let member = self.member(id)?;
                        if !member.status.is_on() {
                            warn!(
                                member = %member.name,
                                %role,
                                network_id,
                                "reserving configured service member that is off"
                            );
                        }
                        chosen.push(member);
                    }
                    chosen
                }
                ServicePolicy::NextAvailable if authority.relation.authority_serves() => {
                    if !authority_member.status.is_on() {
                        return Err(MappingError::Reservation(format!(
                            "authority member {} of network view {} is off",
                            authority_member.name, view.name
                        )));
                    }
                    vec![authority_member]
                }
                // Appliance-level defaults serve the network.
                ServicePolicy::NextAvailable => Vec::new(),
            };

            for member in chosen {
                let outcome = self.txn.insert_service_member(ServiceMember {
                    network_id: network_id.to_string(),
                    network_view_id: view.id.clone(),
                    member_id: member.id.clone(),
                    role,
                    reserved_at: epoch_secs(),
                })?;
                if outcome.is_inserted() {
                    info!(member = %member.name, %role, network_id, "service member reserved");
                }
                services.push(outcome.into_inner());
            }
        }
        // Same order as the store lists them.
        services.sort_by(|a, b| (a.role, &a.member_id).cmp(&(b.role, &b.member_id)));

        Ok(Reservation {
            authority,
            services,
        })
    }

    fn reserve_authority(
        &self,
        view: &NetworkView,
        policy: &ReservationPolicy,
    ) -> MappingResult<MappingMember> {
        let taken: HashMap<String, String> = self
            .txn
            .list_mapping_members(self.grid_id)?
            .into_iter()
            .map(|m| (m.member_id, m.network_view_id))
            .collect();

        let member = match &policy.authority {
            AuthorityPolicy::Member(id) => {
                let member = self.member(id)?;
                match member.role {
                    MemberRole::Authority => {}
                    MemberRole::DelegatedAuthority => {
                        if let Some(other) = taken.get(&member.id) {
                            return Err(MappingError::Reservation(format!(
                                "member {} already owns network view {other}",
                                member.name
                            )));
                        }
                    }
                    MemberRole::Regular => {
                        return Err(MappingError::Reservation(format!(
                            "member {} cannot own network views",
                            member.name
                        )));
                    }
                }
                member
            }
            AuthorityPolicy::NextAvailable => self.next_available(&taken.keys().collect())?,
        };

        let row = MappingMember {
            network_view_id: view.id.clone(),
            grid_id: self.grid_id,
            member_id: member.id.clone(),
            relation: policy.relation(member),
            reserved_at: epoch_secs(),
        };
        let row = self.txn.insert_mapping_member(row)?.into_inner();
        info!(
            network_view = %view.name,
            member = %member.name,
            relation = %row.relation,
            "authority reserved"
        );
        Ok(row)
    }

    /// First healthy, unreserved cloud platform member by host name, then id.
    fn next_available(&self, taken: &HashSet<&String>) -> MappingResult<&GridMember> {
        let mut candidates: Vec<&GridMember> = self
            .members
            .values()
            .filter(|m| m.role == MemberRole::DelegatedAuthority)
            .filter(|m| m.status.is_on())
            .filter(|m| !taken.contains(&m.id))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        candidates.first().copied().ok_or_else(|| {
            MappingError::Reservation(format!(
                "no member available in grid {} to own a network view",
                self.grid_id
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipamgrid_core::{MappingRelation, MemberStatus, member_id};

    fn member(name: &str, role: MemberRole, status: MemberStatus) -> GridMember {
        GridMember {
            id: member_id(1, name),
            grid_id: 1,
            name: name.to_string(),
            member_ref: None,
            ipv4_address: None,
            ipv6_address: None,
            dhcp_ipv4: None,
            dhcp_ipv6: None,
            dns_ipv4: None,
            dns_ipv6: None,
            role,
            status,
            licenses: vec![],
            updated_at: 0,
        }
    }

    fn store(members: &[GridMember]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(|txn| {
                for m in members {
                    txn.put_member(m)?;
                }
                Ok::<_, StateError>(())
            })
            .unwrap();
        store
    }

    fn pick_any() -> ReservationPolicy {
        ReservationPolicy {
            authority: AuthorityPolicy::NextAvailable,
            dhcp: ServicePolicy::NextAvailable,
            dns: ServicePolicy::NextAvailable,
        }
    }

    fn reserve(
        store: &StateStore,
        view: &str,
        network: &str,
        policy: &ReservationPolicy,
    ) -> MappingResult<Reservation> {
        store.write(|txn| {
            let view = txn.find_or_create_network_view(1, view)?.into_inner();
            MemberReservationEngine::new(txn, 1)?.reserve(&view, network, policy)
        })
    }

    #[test]
    fn pick_any_takes_first_free_cpm_by_name() {
        let store = store(&[
            member("gm", MemberRole::Authority, MemberStatus::On),
            member("cpm2", MemberRole::DelegatedAuthority, MemberStatus::On),
            member("cpm1", MemberRole::DelegatedAuthority, MemberStatus::On),
        ]);

        let first = reserve(&store, "t1", "net-1", &pick_any()).unwrap();
        assert_eq!(first.authority.member_id, member_id(1, "cpm1"));
        assert_eq!(first.authority.relation, MappingRelation::Delegated);
        // The delegated authority serves both roles.
        assert_eq!(first.services.len(), 2);
        assert!(first.services.iter().all(|s| s.member_id == member_id(1, "cpm1")));

        let second = reserve(&store, "t2", "net-2", &pick_any()).unwrap();
        assert_eq!(second.authority.member_id, member_id(1, "cpm2"));

        let err = reserve(&store, "t3", "net-3", &pick_any()).unwrap_err();
        assert!(matches!(err, MappingError::Reservation(_)));
        // The failed reservation left no view behind.
        assert!(store.find_network_view(1, "t3").unwrap().is_none());
    }

    #[test]
    fn off_members_are_never_picked() {
        let store = store(&[
            member("cpm1", MemberRole::DelegatedAuthority, MemberStatus::Off),
            member("cpm2", MemberRole::DelegatedAuthority, MemberStatus::On),
        ]);
        let r = reserve(&store, "t1", "net-1", &pick_any()).unwrap();
        assert_eq!(r.authority.member_id, member_id(1, "cpm2"));
    }

    #[test]
    fn existing_authority_is_reused() {
        let store = store(&[
            member("cpm1", MemberRole::DelegatedAuthority, MemberStatus::On),
            member("cpm2", MemberRole::DelegatedAuthority, MemberStatus::On),
        ]);
        let first = reserve(&store, "t1", "net-1", &pick_any()).unwrap();
        let again = reserve(&store, "t1", "net-1", &pick_any()).unwrap();
        assert_eq!(first, again);
        assert_eq!(store.list_mapping_members(1).unwrap().len(), 1);
        assert_eq!(store.list_service_members("net-1").unwrap().len(), 2);
    }

    #[test]
    fn literal_cpm_already_owning_a_view_is_rejected() {
        let cpm = member("cpm1", MemberRole::DelegatedAuthority, MemberStatus::On);
        let store = store(&[cpm.clone()]);
        let policy = ReservationPolicy {
            authority: AuthorityPolicy::Member(cpm.id.clone()),
            dhcp: ServicePolicy::Members(vec![cpm.id.clone()]),
            dns: ServicePolicy::Members(vec![cpm.id.clone()]),
        };
        reserve(&store, "v1", "net-1", &policy).unwrap();
        let err = reserve(&store, "v2", "net-2", &policy).unwrap_err();
        assert!(matches!(err, MappingError::Reservation(_)));
    }

    #[test]
    fn grid_master_owns_many_views() {
        let gm = member("gm", MemberRole::Authority, MemberStatus::On);
        let store = store(&[gm.clone()]);
        let policy = ReservationPolicy::grid_default(&gm.id, true);

        let a = reserve(&store, "v1", "net-1", &policy).unwrap();
        let b = reserve(&store, "v2", "net-2", &policy).unwrap();
        assert_eq!(a.authority.relation, MappingRelation::AuthorityOwned);
        assert_eq!(b.authority.member_id, gm.id);
    }

    #[test]
    fn distributed_pick_any_reserves_no_service_member() {
        let gm = member("gm", MemberRole::Authority, MemberStatus::On);
        let store = store(&[gm.clone()]);
        let policy = ReservationPolicy::grid_default(&gm.id, false);

        let r = reserve(&store, "default", "net-1", &policy).unwrap();
        assert_eq!(r.authority.relation, MappingRelation::AuthorityOwnedDistributed);
        assert!(r.services.is_empty());
    }

    #[test]
    fn literal_service_members_are_upserted() {
        let gm = member("gm", MemberRole::Authority, MemberStatus::On);
        let dns1 = member("dns1", MemberRole::Regular, MemberStatus::Off);
        let store = store(&[gm.clone(), dns1.clone()]);
        let policy = ReservationPolicy {
            authority: AuthorityPolicy::Member(gm.id.clone()),
            dhcp: ServicePolicy::Members(vec![]),
            dns: ServicePolicy::Members(vec![gm.id.clone(), dns1.id.clone()]),
        };

        let r = reserve(&store, "default", "net-1", &policy).unwrap();
        // An explicitly configured member is reserved even when off.
        assert_eq!(r.services.len(), 2);
        assert!(r.services.iter().all(|s| s.role == ServiceRole::Dns));

        reserve(&store, "default", "net-1", &policy).unwrap();
        assert_eq!(store.list_service_members("net-1").unwrap().len(), 2);
    }

    #[test]
    fn off_authority_cannot_serve_pick_any() {
        let cpm = member("cpm1", MemberRole::DelegatedAuthority, MemberStatus::On);
        let store = store(&[cpm.clone()]);
        reserve(&store, "t1", "net-1", &pick_any()).unwrap();

        let mut off = cpm;
        off.status = MemberStatus::Off;
        store.write(|txn| txn.put_member(&off)).unwrap();

        let err = reserve(&store, "t1", "net-2", &pick_any()).unwrap_err();
        assert!(matches!(err, MappingError::Reservation(_)));
    }

    #[test]
    fn vanished_authority_member_is_a_reservation_error() {
        let store = store(&[]);
        let policy = ReservationPolicy {
            authority: AuthorityPolicy::Member("gone".to_string()),
            dhcp: ServicePolicy::NextAvailable,
            dns: ServicePolicy::NextAvailable,
        };
        assert!(matches!(
            reserve(&store, "v", "net-1", &policy),
            Err(MappingError::Reservation(_))
        ));
    }
}
