//! Appliance gateway — read-only discovery calls against the grid.
//!
//! The HTTP management client lives outside this crate; grid sync only
//! needs the handful of calls on [`ApplianceGateway`]. [`StaticGateway`]
//! serves a fixed discovery snapshot, which is how captured appliance
//! state is replayed and how the sync paths are tested.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use ipamgrid_core::ServiceRole;

use crate::error::{GatewayError, GatewayResult};

/// Fields requested from the member listing.
pub const MEMBER_RETURN_FIELDS: &[&str] = &[
    "host_name",
    "vip_setting",
    "ipv6_setting",
    "node_info",
    "platform",
];

/// License type that lets a cloud platform member own a network view.
pub const CLOUD_API_LICENSE: &str = "CLOUD_API";

/// Appliance node status that maps to a healthy member.
pub const NODE_STATUS_WORKING: &str = "WORKING";

/// One member as listed by the appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Appliance object reference of the member.
    pub member_ref: String,
    pub host_name: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
    /// Node service status (`WORKING`, `FAILED`, ...), if reported.
    pub node_status: Option<String>,
    /// Whether the member runs a cloud platform appliance.
    pub cloud_platform: bool,
}

/// One installed license.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub host_name: String,
    pub kind: String,
}

/// Interface a member serves DHCP or DNS on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettingRecord {
    pub host_name: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv6_address: Option<Ipv6Addr>,
}

/// Value of one extended attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    List(Vec<String>),
}

/// Extended attributes of an appliance object, keyed by attribute name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// Read-only discovery calls consumed by grid sync.
pub trait ApplianceGateway: Send + Sync {
    /// List every member of the grid.
    fn list_members(&self, return_fields: &[&str]) -> GatewayResult<Vec<MemberRecord>>;

    /// List licenses installed on members.
    fn list_member_licenses(&self) -> GatewayResult<Vec<LicenseRecord>>;

    /// List per-member DHCP or DNS interface settings.
    ///
    /// Older appliances answer [`GatewayError::Unsupported`].
    fn list_member_service_settings(
        &self,
        role: ServiceRole,
    ) -> GatewayResult<Vec<ServiceSettingRecord>>;

    /// Extended attributes of the object behind `member_ref`.
    fn get_extended_attributes(&self, member_ref: &str) -> GatewayResult<AttributeMap>;
}

#[derive(Debug, Default)]
struct Snapshot {
    members: Vec<MemberRecord>,
    licenses: Option<Vec<LicenseRecord>>,
    dhcp_settings: Option<Vec<ServiceSettingRecord>>,
    dns_settings: Option<Vec<ServiceSettingRecord>>,
    attributes: HashMap<String, AttributeMap>,
    unreachable: bool,
}

/// Gateway serving a fixed, replaceable discovery snapshot.
///
/// Endpoints left unset answer [`GatewayError::Unsupported`], like an
/// appliance on an older protocol version.
#[derive(Debug, Default)]
pub struct StaticGateway {
    snapshot: RwLock<Snapshot>,
}

impl StaticGateway {
    pub fn new(members: Vec<MemberRecord>) -> Self {
        let gateway = Self::default();
        gateway.set_members(members);
        gateway
    }

    pub fn with_licenses(self, licenses: Vec<LicenseRecord>) -> Self {
        self.write(|s| s.licenses = Some(licenses));
        self
    }

    pub fn with_service_settings(
        self,
        role: ServiceRole,
        settings: Vec<ServiceSettingRecord>,
    ) -> Self {
        self.write(|s| match role {
            ServiceRole::Dhcp => s.dhcp_settings = Some(settings),
            ServiceRole::Dns => s.dns_settings = Some(settings),
        });
        self
    }

    pub fn with_attributes(self, member_ref: &str, attributes: AttributeMap) -> Self {
        self.set_attributes(member_ref, attributes);
        self
    }

    /// Replace the member listing.
    pub fn set_members(&self, members: Vec<MemberRecord>) {
        self.write(|s| s.members = members);
    }

    /// Replace the extended attributes of one object.
    pub fn set_attributes(&self, member_ref: &str, attributes: AttributeMap) {
        self.write(|s| {
            s.attributes.insert(member_ref.to_string(), attributes);
        });
    }

    /// Make every call fail with a transport error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.write(|s| s.unreachable = unreachable);
    }

    fn write(&self, f: impl FnOnce(&mut Snapshot)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut snapshot);
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> GatewayResult<T>) -> GatewayResult<T> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        if snapshot.unreachable {
            return Err(GatewayError::Transport("static gateway marked unreachable".to_string()));
        }
        f(&snapshot)
    }
}

impl ApplianceGateway for StaticGateway {
    fn list_members(&self, _return_fields: &[&str]) -> GatewayResult<Vec<MemberRecord>> {
        self.read(|s| Ok(s.members.clone()))
    }

    fn list_member_licenses(&self) -> GatewayResult<Vec<LicenseRecord>> {
        self.read(|s| {
            s.licenses
                .clone()
                .ok_or_else(|| GatewayError::Unsupported("license".to_string()))
        })
    }

    fn list_member_service_settings(
        &self,
        role: ServiceRole,
    ) -> GatewayResult<Vec<ServiceSettingRecord>> {
        self.read(|s| {
            let settings = match role {
                ServiceRole::Dhcp => &s.dhcp_settings,
                ServiceRole::Dns => &s.dns_settings,
            };
            settings
                .clone()
                .ok_or_else(|| GatewayError::Unsupported(format!("member:{role}")))
        })
    }

    fn get_extended_attributes(&self, member_ref: &str) -> GatewayResult<AttributeMap> {
        self.read(|s| Ok(s.attributes.get(member_ref).cloned().unwrap_or_default()))
    }
}
