//! Member registry — discovers and classifies grid members.
//!
//! Each sync pass lists the appliance's members, classifies their role and
//! health, and reconciles the result with the persisted members. Members
//! that disappear are marked `Off`, never removed, because authority and
//! service rows may still reference them.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use tracing::{debug, info, warn};

use ipamgrid_core::{
    GridSection, MemberRole, MemberStatus, ServiceRole, epoch_secs, member_id,
};
use ipamgrid_state::*;

use crate::error::{GatewayError, GatewayResult, SyncError, SyncResult};
use crate::gateway::{
    ApplianceGateway, CLOUD_API_LICENSE, LicenseRecord, MEMBER_RETURN_FIELDS, MemberRecord,
    NODE_STATUS_WORKING, ServiceSettingRecord,
};

/// Counts from one registry sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub disabled: usize,
}

/// Everything discovered about the grid's members in one pass.
struct Discovery {
    members: Vec<MemberRecord>,
    licenses: Vec<LicenseRecord>,
    dhcp: Vec<ServiceSettingRecord>,
    dns: Vec<ServiceSettingRecord>,
}

/// Discovers appliance members and persists them to the `StateStore`.
pub struct MemberRegistry {
    state: StateStore,
    gateway: Arc<dyn ApplianceGateway>,
}

impl MemberRegistry {
    pub fn new(state: StateStore, gateway: Arc<dyn ApplianceGateway>) -> Self {
        Self { state, gateway }
    }

    /// Discover members and reconcile them with the store.
    pub fn sync(&self, grid: &GridSection) -> SyncResult<SyncReport> {
        let discovery = self.discover(grid)?;
        let now = epoch_secs();

        let report = self.state.write(|txn| {
            let existing: HashMap<String, GridMember> = txn
                .list_members(grid.id)?
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect();

            let mut report = SyncReport::default();
            let mut seen = HashSet::new();

            for record in &discovery.members {
                let member = classify(grid, record, &discovery, now);
                if !seen.insert(member.id.clone()) {
                    warn!(host = %record.host_name, "duplicate member in discovery, keeping first");
                    continue;
                }
                match existing.get(&member.id) {
                    None => {
                        info!(
                            member = %member.name,
                            role = %member.role,
                            status = ?member.status,
                            "member added"
                        );
                        report.added += 1;
                    }
                    Some(old) if !same_member(old, &member) => {
                        debug!(member = %member.name, role = %member.role, "member updated");
                        report.updated += 1;
                    }
                    Some(_) => {}
                }
                txn.put_member(&member)?;
            }

            for old in existing.values() {
                if seen.contains(&old.id) || !old.status.is_on() {
                    continue;
                }
                let mut gone = old.clone();
                gone.status = MemberStatus::Off;
                gone.updated_at = now;
                txn.put_member(&gone)?;
                warn!(member = %gone.name, "member no longer discovered, marked off");
                report.disabled += 1;
            }

            Ok::<_, SyncError>(report)
        })?;

        info!(
            grid_id = grid.id,
            added = report.added,
            updated = report.updated,
            disabled = report.disabled,
            "member sync complete"
        );
        Ok(report)
    }

    fn discover(&self, grid: &GridSection) -> SyncResult<Discovery> {
        let members = self.gateway.list_members(MEMBER_RETURN_FIELDS)?;
        let licenses = degrade(self.gateway.list_member_licenses(), "member licenses")?;

        // Service interface settings only exist from protocol 2.2 onwards.
        let (dhcp, dns) = if grid.wapi_at_least(2, 2) {
            (
                degrade(
                    self.gateway.list_member_service_settings(ServiceRole::Dhcp),
                    "member dhcp settings",
                )?,
                degrade(
                    self.gateway.list_member_service_settings(ServiceRole::Dns),
                    "member dns settings",
                )?,
            )
        } else {
            debug!(wapi_version = %grid.wapi_version, "skipping member service settings");
            (Vec::new(), Vec::new())
        };

        Ok(Discovery {
            members,
            licenses,
            dhcp,
            dns,
        })
    }
}

/// Treat an endpoint missing on this appliance as an empty result.
fn degrade<T>(result: GatewayResult<Vec<T>>, what: &str) -> GatewayResult<Vec<T>> {
    match result {
        Err(GatewayError::Unsupported(endpoint)) => {
            debug!(%endpoint, "{what} unavailable, using defaults");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Build the persisted member for one discovered record.
fn classify(grid: &GridSection, record: &MemberRecord, discovery: &Discovery, now: u64) -> GridMember {
    let licenses: Vec<String> = discovery
        .licenses
        .iter()
        .filter(|l| l.host_name.eq_ignore_ascii_case(&record.host_name))
        .map(|l| l.kind.clone())
        .collect();
    let (dhcp_ipv4, dhcp_ipv6) = service_interface(&discovery.dhcp, &record.host_name);
    let (dns_ipv4, dns_ipv6) = service_interface(&discovery.dns, &record.host_name);

    GridMember {
        id: member_id(grid.id, &record.host_name),
        grid_id: grid.id,
        name: record.host_name.clone(),
        member_ref: Some(record.member_ref.clone()),
        ipv4_address: record.ipv4_address,
        ipv6_address: record.ipv6_address,
        dhcp_ipv4,
        dhcp_ipv6,
        dns_ipv4,
        dns_ipv6,
        role: classify_role(grid, record, &licenses),
        status: classify_status(record),
        licenses,
        updated_at: now,
    }
}

fn classify_role(grid: &GridSection, record: &MemberRecord, licenses: &[String]) -> MemberRole {
    let is_master = grid.is_master(&record.host_name)
        || record
            .ipv4_address
            .is_some_and(|ip| grid.is_master(&ip.to_string()))
        || record
            .ipv6_address
            .is_some_and(|ip| grid.is_master(&ip.to_string()));
    if is_master {
        return MemberRole::Authority;
    }

    let licensed = !grid.cloud_license_required
        || licenses.iter().any(|l| l.eq_ignore_ascii_case(CLOUD_API_LICENSE));
    if record.cloud_platform && licensed {
        MemberRole::DelegatedAuthority
    } else {
        MemberRole::Regular
    }
}

fn classify_status(record: &MemberRecord) -> MemberStatus {
    match record.node_status.as_deref() {
        // Older appliances report no node status for listed members.
        None => MemberStatus::On,
        Some(status) if status.eq_ignore_ascii_case(NODE_STATUS_WORKING) => MemberStatus::On,
        Some(_) => MemberStatus::Off,
    }
}

fn service_interface(
    settings: &[ServiceSettingRecord],
    host_name: &str,
) -> (Option<Ipv4Addr>, Option<Ipv6Addr>) {
    settings
        .iter()
        .find(|s| s.host_name.eq_ignore_ascii_case(host_name))
        .map(|s| (s.ipv4_address, s.ipv6_address))
        .unwrap_or((None, None))
}

/// Equal apart from the sync timestamp.
fn same_member(a: &GridMember, b: &GridMember) -> bool {
    GridMember {
        updated_at: b.updated_at,
        ..a.clone()
    } == *b
}
