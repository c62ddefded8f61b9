//! ConditionCatalog — validated, ordered matching rules.
//!
//! Raw `[[conditions]]` entries are validated against the members of one
//! grid sync generation. Rules keyed on a specific tenant or subnet range
//! ("variable" rules) are tried before the `global`/`tenant` keywords
//! ("static" rules); within each group declaration order wins.

use std::collections::{HashMap, HashSet};

use ipnetwork::IpNetwork;
use tracing::{debug, info, warn};

use ipamgrid_core::{
    AuthoritySelector, ConditionConfig, GridId, MappingRelation, MemberId, MemberPolicy,
    MemberRole, ServiceRole, epoch_secs,
};
use ipamgrid_state::*;

use crate::error::{MappingError, MappingResult};
use crate::scope::{ScopeAttributes, ViewTemplate};

const TENANT_ID_PREFIX: &str = "tenant_id:";
const SUBNET_RANGE_PREFIX: &str = "subnet_range:";

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionKey {
    /// Externally routed networks.
    Global,
    /// Tenant (not externally routed) networks.
    Tenant,
    TenantId(String),
    SubnetRange(IpNetwork),
}

impl ConditionKey {
    pub fn parse(condition: &str) -> MappingResult<Self> {
        let condition = condition.trim();
        if condition.eq_ignore_ascii_case("global") {
            return Ok(ConditionKey::Global);
        }
        if condition.eq_ignore_ascii_case("tenant") {
            return Ok(ConditionKey::Tenant);
        }
        if let Some(id) = condition.strip_prefix(TENANT_ID_PREFIX) {
            let id = id.trim();
            if id.is_empty() {
                return Err(MappingError::Configuration(format!(
                    "condition {condition:?} names no tenant"
                )));
            }
            return Ok(ConditionKey::TenantId(id.to_string()));
        }
        if let Some(cidr) = condition.strip_prefix(SUBNET_RANGE_PREFIX) {
            let cidr = cidr.trim().parse::<IpNetwork>().map_err(|e| {
                MappingError::Configuration(format!("condition {condition:?}: {e}"))
            })?;
            return Ok(ConditionKey::SubnetRange(cidr));
        }
        Err(MappingError::Configuration(format!(
            "unknown condition {condition:?}"
        )))
    }

    /// Whether the rule targets a specific tenant or subnet range.
    pub fn is_variable(&self) -> bool {
        matches!(self, ConditionKey::TenantId(_) | ConditionKey::SubnetRange(_))
    }

    pub fn matches(&self, attrs: &ScopeAttributes) -> bool {
        match self {
            ConditionKey::Global => attrs.router_external,
            ConditionKey::Tenant => !attrs.router_external,
            ConditionKey::TenantId(id) => attrs.tenant_id == *id,
            ConditionKey::SubnetRange(cidr) => {
                cidr.prefix() == attrs.subnet_cidr.prefix()
                    && cidr.network() == attrs.subnet_cidr.network()
            }
        }
    }
}

/// Authority member policy with member references resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityPolicy {
    Member(MemberId),
    NextAvailable,
}

/// DHCP or DNS member policy with member references resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServicePolicy {
    NextAvailable,
    Members(Vec<MemberId>),
}

/// The member policy a network view is reserved with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPolicy {
    pub authority: AuthorityPolicy,
    pub dhcp: ServicePolicy,
    pub dns: ServicePolicy,
}

impl ReservationPolicy {
    /// Policy of the grid-wide default scope: the grid master owns the view
    /// and, if `use_grid_master_for_dhcp`, serves it too.
    pub fn grid_default(grid_master: &str, use_grid_master_for_dhcp: bool) -> Self {
        let service = if use_grid_master_for_dhcp {
            ServicePolicy::Members(vec![grid_master.to_string()])
        } else {
            ServicePolicy::NextAvailable
        };
        Self {
            authority: AuthorityPolicy::Member(grid_master.to_string()),
            dhcp: service.clone(),
            dns: service,
        }
    }

    pub fn service(&self, role: ServiceRole) -> &ServicePolicy {
        match role {
            ServiceRole::Dhcp => &self.dhcp,
            ServiceRole::Dns => &self.dns,
        }
    }

    /// How duties split once `authority` owns the view.
    pub fn relation(&self, authority: &GridMember) -> MappingRelation {
        match authority.role {
            MemberRole::DelegatedAuthority => MappingRelation::Delegated,
            _ => match &self.dhcp {
                ServicePolicy::Members(ids) if ids.len() == 1 && ids[0] == authority.id => {
                    MappingRelation::AuthorityOwned
                }
                _ => MappingRelation::AuthorityOwnedDistributed,
            },
        }
    }
}

/// One validated rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// The condition exactly as declared.
    pub condition: String,
    pub key: ConditionKey,
    pub view: ViewTemplate,
    pub policy: ReservationPolicy,
}

/// Validated rules for one grid, bound to one sync generation.
#[derive(Debug, Clone)]
pub struct ConditionCatalog {
    grid_id: GridId,
    generation: u64,
    variable: Vec<CatalogEntry>,
    fixed: Vec<CatalogEntry>,
}

impl ConditionCatalog {
    /// Validate raw entries against the grid's registered members.
    ///
    /// Any invalid entry fails the whole catalog.
    pub fn validate(
        grid_id: GridId,
        generation: u64,
        entries: &[ConditionConfig],
        members: &[GridMember],
    ) -> MappingResult<Self> {
        let mut seen = HashSet::new();
        let mut static_authorities: HashMap<String, (String, MemberId)> = HashMap::new();
        let mut variable = Vec::new();
        let mut fixed = Vec::new();

        for raw in entries {
            let condition = raw.condition.trim().to_string();
            if !seen.insert(condition.clone()) {
                return Err(MappingError::Configuration(format!(
                    "condition {condition:?} is declared twice"
                )));
            }
            let entry = validate_entry(&condition, raw, members)?;

            let named = match &entry.policy.authority {
                AuthorityPolicy::Member(id) if !entry.view.is_dynamic() => Some(id),
                _ => None,
            };
            if let Some(id) = named {
                let view = entry.view.as_str().to_string();
                for (other_view, (other_condition, other_id)) in &static_authorities {
                    if *other_view == view && other_id != id {
                        return Err(MappingError::Configuration(format!(
                            "network view {view:?} has conflicting authority members in \
                             {other_condition:?} and {condition:?}"
                        )));
                    }
                    if *other_view != view && other_id == id && is_cpm(members, id) {
                        return Err(MappingError::Configuration(format!(
                            "cloud platform member {id} is authority for both {other_view:?} \
                             and {view:?}"
                        )));
                    }
                }
                static_authorities.insert(view, (condition.clone(), id.clone()));
            }

            if entry.key.is_variable() {
                variable.push(entry);
            } else {
                fixed.push(entry);
            }
        }

        debug!(
            grid_id,
            generation,
            variable = variable.len(),
            fixed = fixed.len(),
            "condition catalog validated"
        );
        Ok(Self {
            grid_id,
            generation,
            variable,
            fixed,
        })
    }

    pub fn grid_id(&self) -> GridId {
        self.grid_id
    }

    /// The grid sync generation this catalog was validated against.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All rules in precedence order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.variable.iter().chain(self.fixed.iter())
    }

    /// The first rule that matches, in precedence order.
    pub fn matching(&self, attrs: &ScopeAttributes) -> Option<&CatalogEntry> {
        self.entries().find(|entry| entry.key.matches(attrs))
    }

    /// Create the static network views, reserve their named authority
    /// members, and regenerate the grid's condition rows.
    ///
    /// Reserving at bind time keeps a named cloud platform member out of the
    /// pick-any pool before its view maps any subnet.
    pub fn bind(&self, txn: &StoreTxn) -> MappingResult<()> {
        let mut keep = Vec::new();
        for entry in self.entries().filter(|e| !e.view.is_dynamic()) {
            let view = txn
                .find_or_create_network_view(self.grid_id, entry.view.as_str())?
                .into_inner();
            if let AuthorityPolicy::Member(member_id) = &entry.policy.authority {
                self.bind_authority(txn, entry, &view, member_id)?;
            }
            txn.put_condition(&MappingCondition {
                grid_id: self.grid_id,
                network_view_id: view.id,
                condition: entry.condition.clone(),
            })?;
            keep.push(entry.condition.as_str());
        }
        let removed = txn.retain_conditions(self.grid_id, &keep)?;
        info!(
            grid_id = self.grid_id,
            generation = self.generation,
            conditions = keep.len(),
            removed,
            "condition catalog bound"
        );
        Ok(())
    }

    fn bind_authority(
        &self,
        txn: &StoreTxn,
        entry: &CatalogEntry,
        view: &NetworkView,
        member_id: &str,
    ) -> MappingResult<()> {
        let member = txn.get_member(self.grid_id, member_id)?.ok_or_else(|| {
            MappingError::NotFound(format!("member {member_id} in grid {}", self.grid_id))
        })?;
        if member.role == MemberRole::DelegatedAuthority {
            let owned = txn
                .list_mapping_members(self.grid_id)?
                .into_iter()
                .find(|m| m.member_id == member.id && m.network_view_id != view.id);
            if let Some(owned) = owned {
                return Err(MappingError::Configuration(format!(
                    "{}: cloud platform member {} already owns network view {}",
                    entry.condition, member.name, owned.network_view_id
                )));
            }
        }

        let row = MappingMember {
            network_view_id: view.id.clone(),
            grid_id: self.grid_id,
            member_id: member.id.clone(),
            relation: entry.policy.relation(&member),
            reserved_at: epoch_secs(),
        };
        match txn.insert_mapping_member(row)? {
            InsertOutcome::Inserted(row) => {
                info!(
                    network_view = %view.name,
                    member = %member.name,
                    relation = %row.relation,
                    "static authority reserved"
                );
            }
            InsertOutcome::Existing(row) if row.member_id != member.id => {
                warn!(
                    network_view = %view.name,
                    recorded = %row.member_id,
                    configured = %member.name,
                    "network view keeps its recorded authority member"
                );
            }
            InsertOutcome::Existing(_) => {}
        }
        Ok(())
    }
}

fn validate_entry(
    condition: &str,
    raw: &ConditionConfig,
    members: &[GridMember],
) -> MappingResult<CatalogEntry> {
    let key = ConditionKey::parse(condition)?;
    let view = ViewTemplate::parse(&raw.network_view)?;

    let authority = match (&raw.authority_member, view.is_dynamic()) {
        (AuthoritySelector::NextAvailable, true) => AuthorityPolicy::NextAvailable,
        (AuthoritySelector::Member(_), true) => {
            return Err(MappingError::Configuration(format!(
                "{condition}: templated network view {view} must use the next available authority member"
            )));
        }
        (AuthoritySelector::NextAvailable, false) => {
            return Err(MappingError::Configuration(format!(
                "{condition}: network view {view} needs a named authority member"
            )));
        }
        (AuthoritySelector::Member(reference), false) => {
            let member = lookup(members, condition, reference)?;
            if !member.role.can_own_views() {
                return Err(MappingError::Configuration(format!(
                    "{condition}: authority member {} is a {} member",
                    member.name, member.role
                )));
            }
            if !member.status.is_on() {
                return Err(MappingError::Configuration(format!(
                    "{condition}: authority member {} is off",
                    member.name
                )));
            }
            AuthorityPolicy::Member(member.id.clone())
        }
    };

    let dhcp = service_policy(condition, &raw.dhcp_members, members)?;
    let dns = service_policy(condition, &raw.dns_members, members)?;

    if let AuthorityPolicy::Member(id) = &authority {
        let pick_any = dhcp == ServicePolicy::NextAvailable || dns == ServicePolicy::NextAvailable;
        if pick_any && is_cpm(members, id) {
            return Err(MappingError::Configuration(format!(
                "{condition}: a cloud platform authority member needs explicit DHCP and DNS members"
            )));
        }
    }

    Ok(CatalogEntry {
        condition: condition.to_string(),
        key,
        view,
        policy: ReservationPolicy {
            authority,
            dhcp,
            dns,
        },
    })
}

fn service_policy(
    condition: &str,
    policy: &MemberPolicy,
    members: &[GridMember],
) -> MappingResult<ServicePolicy> {
    match policy {
        MemberPolicy::NextAvailable => Ok(ServicePolicy::NextAvailable),
        MemberPolicy::Members(references) => {
            let mut ids: Vec<MemberId> = Vec::with_capacity(references.len());
            for reference in references {
                let id = lookup(members, condition, reference)?.id.clone();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Ok(ServicePolicy::Members(ids))
        }
    }
}

fn lookup<'a>(
    members: &'a [GridMember],
    condition: &str,
    reference: &str,
) -> MappingResult<&'a GridMember> {
    members
        .iter()
        .find(|m| m.is_named(reference))
        .ok_or_else(|| {
            MappingError::Configuration(format!(
                "{condition}: member {reference:?} is not registered"
            ))
        })
}

fn is_cpm(members: &[GridMember], id: &str) -> bool {
    members
        .iter()
        .any(|m| m.id == id && m.role == MemberRole::DelegatedAuthority)
}
