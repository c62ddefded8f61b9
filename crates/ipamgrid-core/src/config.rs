//! ipamgrid.toml configuration parser.
//!
//! Holds the grid connection, grid sync fallbacks, and the raw condition
//! catalog entries. Catalog entries are validated later, against the
//! members discovered by grid sync.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::GridId;

/// Member policy keyword asking the engine to pick any eligible member.
pub const NEXT_AVAILABLE_MEMBER: &str = "<next-available-member>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    pub grid: GridSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

/// Connection parameters and identity of the grid master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSection {
    pub id: GridId,
    pub name: String,
    /// IP address or host name the grid master answers on.
    pub master_host: String,
    /// Host name of the grid master, if `master_host` is an address.
    pub master_name: Option<String>,
    #[serde(default = "default_wapi_version")]
    pub wapi_version: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ssl_verify: bool,
    /// Members need a CLOUD_API license to act as cloud platform members.
    #[serde(default = "default_true")]
    pub cloud_license_required: bool,
}

/// Fallback resync intervals, used when the grid does not define them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_minimum_wait")]
    pub minimum_wait_secs: u64,
    #[serde(default = "default_maximum_wait")]
    pub maximum_wait_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            minimum_wait_secs: default_minimum_wait(),
            maximum_wait_secs: default_maximum_wait(),
        }
    }
}

/// One operator-authored matching rule, as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// `global`, `tenant`, `tenant_id:<id>` or `subnet_range:<cidr>`.
    pub condition: String,
    /// A literal view name, or a template such as `{tenant_id}`.
    pub network_view: String,
    #[serde(default)]
    pub authority_member: AuthoritySelector,
    #[serde(default)]
    pub dhcp_members: MemberPolicy,
    #[serde(default)]
    pub dns_members: MemberPolicy,
}

/// Authority member named by a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthoritySelector {
    #[default]
    NextAvailable,
    /// Member host name or member id.
    Member(String),
}

impl From<String> for AuthoritySelector {
    fn from(value: String) -> Self {
        if value.trim() == NEXT_AVAILABLE_MEMBER {
            AuthoritySelector::NextAvailable
        } else {
            AuthoritySelector::Member(value.trim().to_string())
        }
    }
}

impl From<AuthoritySelector> for String {
    fn from(value: AuthoritySelector) -> Self {
        match value {
            AuthoritySelector::NextAvailable => NEXT_AVAILABLE_MEMBER.to_string(),
            AuthoritySelector::Member(name) => name,
        }
    }
}

/// DHCP or DNS member policy named by a catalog entry.
///
/// Accepts the next-available keyword, a single member, or a list. An
/// empty list asks for no member in that role.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawMemberPolicy", into = "RawMemberPolicy")]
pub enum MemberPolicy {
    #[default]
    NextAvailable,
    Members(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawMemberPolicy {
    One(String),
    Many(Vec<String>),
}

impl From<RawMemberPolicy> for MemberPolicy {
    fn from(raw: RawMemberPolicy) -> Self {
        let names = match raw {
            RawMemberPolicy::One(name) => vec![name],
            RawMemberPolicy::Many(names) => names,
        };
        let names: Vec<String> = names.iter().map(|n| n.trim().to_string()).collect();
        if names.iter().any(|n| n == NEXT_AVAILABLE_MEMBER) {
            MemberPolicy::NextAvailable
        } else {
            MemberPolicy::Members(names)
        }
    }
}

impl From<MemberPolicy> for RawMemberPolicy {
    fn from(policy: MemberPolicy) -> Self {
        match policy {
            MemberPolicy::NextAvailable => RawMemberPolicy::One(NEXT_AVAILABLE_MEMBER.to_string()),
            MemberPolicy::Members(names) => RawMemberPolicy::Many(names),
        }
    }
}

impl GridSection {
    /// The appliance protocol version as a semver version (`2.3` → `2.3.0`).
    pub fn wapi_version(&self) -> Result<semver::Version, semver::Error> {
        let version = self.wapi_version.trim().trim_start_matches('v');
        let padded = match version.split('.').count() {
            1 => format!("{version}.0.0"),
            2 => format!("{version}.0"),
            _ => version.to_string(),
        };
        semver::Version::parse(&padded)
    }

    /// Whether the appliance protocol is at least `major.minor`.
    ///
    /// Unparseable versions are treated as current.
    pub fn wapi_at_least(&self, major: u64, minor: u64) -> bool {
        match self.wapi_version() {
            Ok(v) => v >= semver::Version::new(major, minor, 0),
            Err(_) => true,
        }
    }

    /// Whether `host` names the grid master (by address or host name).
    pub fn is_master(&self, host: &str) -> bool {
        let host = host.trim();
        host.eq_ignore_ascii_case(self.master_host.trim())
            || self
                .master_name
                .as_deref()
                .is_some_and(|name| host.eq_ignore_ascii_case(name.trim()))
    }
}

impl IpamConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: IpamConfig = toml::from_str(content)?;
        if config.sync.minimum_wait_secs > config.sync.maximum_wait_secs {
            anyhow::bail!(
                "sync.minimum_wait_secs ({}) exceeds sync.maximum_wait_secs ({})",
                config.sync.minimum_wait_secs,
                config.sync.maximum_wait_secs
            );
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn default_wapi_version() -> String {
    "2.3".to_string()
}

fn default_true() -> bool {
    true
}

fn default_minimum_wait() -> u64 {
    60
}

fn default_maximum_wait() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[grid]
id = 1
name = "Default Grid"
master_host = "192.168.1.10"
master_name = "gm.example.com"
username = "admin"
password = "infoblox"

[sync]
minimum_wait_secs = 30

[[conditions]]
condition = "global"
network_view = "default"
authority_member = "gm.example.com"
dhcp_members = ["gm.example.com"]
dns_members = "gm.example.com"

[[conditions]]
condition = "tenant"
network_view = "{tenant_id}"
authority_member = "<next-available-member>"
"#;

    #[test]
    fn test_parse_full() {
        let config = IpamConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.grid.id, 1);
        assert_eq!(config.grid.wapi_version, "2.3");
        assert!(config.grid.cloud_license_required);
        assert_eq!(config.sync.minimum_wait_secs, 30);
        assert_eq!(config.sync.maximum_wait_secs, 300);
        assert_eq!(config.conditions.len(), 2);

        let global = &config.conditions[0];
        assert_eq!(
            global.authority_member,
            AuthoritySelector::Member("gm.example.com".to_string())
        );
        assert_eq!(
            global.dhcp_members,
            MemberPolicy::Members(vec!["gm.example.com".to_string()])
        );
        assert_eq!(
            global.dns_members,
            MemberPolicy::Members(vec!["gm.example.com".to_string()])
        );

        let tenant = &config.conditions[1];
        assert_eq!(tenant.authority_member, AuthoritySelector::NextAvailable);
        assert_eq!(tenant.dhcp_members, MemberPolicy::NextAvailable);
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[grid]
id = 7
name = "lab"
master_host = "gm.lab"
username = "admin"
password = "secret"
"#;
        let config = IpamConfig::from_toml_str(toml_str).unwrap();
        assert!(config.conditions.is_empty());
        assert_eq!(config.sync.minimum_wait_secs, 60);
    }

    #[test]
    fn empty_member_list_means_no_member() {
        let toml_str = r#"
condition = "tenant"
network_view = "{network_id}"
dhcp_members = []
"#;
        let entry: ConditionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(entry.dhcp_members, MemberPolicy::Members(vec![]));
        assert_eq!(entry.dns_members, MemberPolicy::NextAvailable);
        assert_eq!(entry.authority_member, AuthoritySelector::NextAvailable);
    }

    #[test]
    fn inverted_sync_window_rejected() {
        let toml_str = r#"
[grid]
id = 1
name = "g"
master_host = "gm"
username = "u"
password = "p"

[sync]
minimum_wait_secs = 600
maximum_wait_secs = 60
"#;
        assert!(IpamConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn wapi_version_comparison() {
        let mut config = IpamConfig::from_toml_str(FULL).unwrap();
        assert!(config.grid.wapi_at_least(2, 2));
        config.grid.wapi_version = "1.4".to_string();
        assert!(!config.grid.wapi_at_least(2, 2));
        config.grid.wapi_version = "2.10.1".to_string();
        assert!(config.grid.wapi_at_least(2, 2));
    }

    #[test]
    fn master_identity_matches_address_or_name() {
        let config = IpamConfig::from_toml_str(FULL).unwrap();
        assert!(config.grid.is_master("192.168.1.10"));
        assert!(config.grid.is_master("GM.example.com"));
        assert!(!config.grid.is_master("cpm1.example.com"));
    }

    #[test]
    fn to_toml_round_trip_keeps_keyword() {
        let config = IpamConfig::from_toml_str(FULL).unwrap();
        let s = config.to_toml_string().unwrap();
        assert!(s.contains(NEXT_AVAILABLE_MEMBER));
    }
}
