//! Shared types used across ipamgrid crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a grid (operator assigned).
pub type GridId = u32;

/// Identifier of a grid member (see [`crate::ids::member_id`]).
pub type MemberId = String;

/// Identifier of a network view (see [`crate::ids::network_view_id`]).
pub type NetworkViewId = String;

/// A string did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseKindError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ── Members ───────────────────────────────────────────────────────

/// Role of a member within its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    /// The grid master; may own any number of network views.
    #[serde(rename = "GM")]
    Authority,
    /// A cloud platform member that can own exactly one network view.
    #[serde(rename = "CPM")]
    DelegatedAuthority,
    #[serde(rename = "REGULAR")]
    Regular,
}

impl MemberRole {
    pub fn label(&self) -> &'static str {
        match self {
            MemberRole::Authority => "GM",
            MemberRole::DelegatedAuthority => "CPM",
            MemberRole::Regular => "REGULAR",
        }
    }

    /// Whether a member of this role may own a network view at all.
    pub fn can_own_views(&self) -> bool {
        !matches!(self, MemberRole::Regular)
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Health status of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberStatus {
    On,
    Off,
}

impl MemberStatus {
    pub fn is_on(&self) -> bool {
        matches!(self, MemberStatus::On)
    }
}

// ── Mapping ───────────────────────────────────────────────────────

/// How authority and service duties for a network view are split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingRelation {
    /// A CPM owns the view and serves it.
    Delegated,
    /// The GM owns the view and is its only DHCP member.
    AuthorityOwned,
    /// The GM owns the view; DHCP/DNS serving lives elsewhere.
    AuthorityOwnedDistributed,
}

impl MappingRelation {
    /// Whether the authority member itself stands in for "next available"
    /// service members.
    pub fn authority_serves(&self) -> bool {
        matches!(
            self,
            MappingRelation::Delegated | MappingRelation::AuthorityOwned
        )
    }
}

impl fmt::Display for MappingRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MappingRelation::Delegated => "delegated",
            MappingRelation::AuthorityOwned => "authority_owned",
            MappingRelation::AuthorityOwnedDistributed => "authority_owned_distributed",
        })
    }
}

/// Service a member performs for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    Dhcp,
    Dns,
}

impl ServiceRole {
    pub const ALL: [ServiceRole; 2] = [ServiceRole::Dhcp, ServiceRole::Dns];

    pub fn label(&self) -> &'static str {
        match self {
            ServiceRole::Dhcp => "dhcp",
            ServiceRole::Dns => "dns",
        }
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// IP version of a subnet or address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IpVersion::V4 => "ipv4",
            IpVersion::V6 => "ipv6",
        })
    }
}

// ── Grid policy ───────────────────────────────────────────────────

/// Attribute that decides how many network views a deployment creates
/// when no catalog rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkViewScope {
    Single,
    Tenant,
    Network,
    Subnet,
    AddressScope,
}

impl NetworkViewScope {
    pub fn label(&self) -> &'static str {
        match self {
            NetworkViewScope::Single => "Single",
            NetworkViewScope::Tenant => "Tenant",
            NetworkViewScope::Network => "Network",
            NetworkViewScope::Subnet => "Subnet",
            NetworkViewScope::AddressScope => "Address Scope",
        }
    }
}

impl FromStr for NetworkViewScope {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(NetworkViewScope::Single),
            "tenant" => Ok(NetworkViewScope::Tenant),
            "network" => Ok(NetworkViewScope::Network),
            "subnet" => Ok(NetworkViewScope::Subnet),
            "address scope" | "address_scope" => Ok(NetworkViewScope::AddressScope),
            _ => Err(ParseKindError::new("network view scope", s)),
        }
    }
}

/// How downstream allocation registers addresses on the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpAllocationStrategy {
    HostRecord,
    FixedAddress,
}

impl FromStr for IpAllocationStrategy {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host record" | "host_record" => Ok(IpAllocationStrategy::HostRecord),
            "fixed address" | "fixed_address" => Ok(IpAllocationStrategy::FixedAddress),
            _ => Err(ParseKindError::new("ip allocation strategy", s)),
        }
    }
}
