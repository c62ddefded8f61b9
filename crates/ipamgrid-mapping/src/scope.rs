//! Orchestration-side inputs and the attributes a scope is resolved from.

use std::fmt;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};

use ipamgrid_core::{IpVersion, NetworkViewScope};

use crate::error::{MappingError, MappingResult};

/// An orchestration-platform network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    /// Whether the network is routed externally (`global` rules match these).
    pub router_external: bool,
}

/// Address scope of a subnet's address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressScope {
    pub id: String,
    pub name: String,
}

/// An orchestration-platform subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub tenant_id: String,
    pub cidr: IpNetwork,
    pub address_scope: Option<AddressScope>,
}

impl Subnet {
    pub fn ip_version(&self) -> IpVersion {
        match self.cidr {
            IpNetwork::V4(_) => IpVersion::V4,
            IpNetwork::V6(_) => IpVersion::V6,
        }
    }
}

/// Everything a (network, subnet) pair offers to rule matching and templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeAttributes {
    pub network_id: String,
    pub network_name: String,
    pub tenant_id: String,
    pub tenant_name: Option<String>,
    pub subnet_id: String,
    pub subnet_name: String,
    pub subnet_cidr: IpNetwork,
    pub address_scope_id: Option<String>,
    pub address_scope_name: Option<String>,
    pub router_external: bool,
    pub ip_version: IpVersion,
}

impl ScopeAttributes {
    pub fn new(network: &Network, subnet: &Subnet) -> Self {
        // A subnet may be created by an admin on behalf of the network owner.
        let tenant_id = if subnet.tenant_id.is_empty() {
            network.tenant_id.clone()
        } else {
            subnet.tenant_id.clone()
        };
        Self {
            network_id: network.id.clone(),
            network_name: network.name.clone(),
            tenant_id,
            tenant_name: network.tenant_name.clone(),
            subnet_id: subnet.id.clone(),
            subnet_name: subnet.name.clone(),
            subnet_cidr: subnet.cidr,
            address_scope_id: subnet.address_scope.as_ref().map(|s| s.id.clone()),
            address_scope_name: subnet.address_scope.as_ref().map(|s| s.name.clone()),
            router_external: network.router_external,
            ip_version: subnet.ip_version(),
        }
    }

    /// Value of a template variable, if this subnet has one.
    pub fn variable(&self, var: TemplateVar) -> Option<&str> {
        let value = match var {
            TemplateVar::TenantId => Some(&self.tenant_id),
            TemplateVar::TenantName => self.tenant_name.as_ref(),
            TemplateVar::NetworkId => Some(&self.network_id),
            TemplateVar::NetworkName => Some(&self.network_name),
            TemplateVar::SubnetId => Some(&self.subnet_id),
            TemplateVar::SubnetName => Some(&self.subnet_name),
            TemplateVar::AddressScopeId => self.address_scope_id.as_ref(),
            TemplateVar::AddressScopeName => self.address_scope_name.as_ref(),
        };
        value.map(String::as_str).filter(|v| !v.is_empty())
    }

    /// View name a grid-wide default scope yields for this subnet.
    ///
    /// `single_view` is the grid's default network view name.
    pub fn default_view_name(&self, scope: NetworkViewScope, single_view: &str) -> Option<String> {
        let name = match scope {
            NetworkViewScope::Single => Some(single_view.trim()),
            NetworkViewScope::Tenant => self.variable(TemplateVar::TenantId),
            NetworkViewScope::Network => self.variable(TemplateVar::NetworkId),
            NetworkViewScope::Subnet => self.variable(TemplateVar::SubnetId),
            NetworkViewScope::AddressScope => self.variable(TemplateVar::AddressScopeId),
        };
        name.filter(|n| !n.is_empty()).map(str::to_string)
    }
}

/// A scope attribute usable inside a network view template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateVar {
    TenantId,
    TenantName,
    NetworkId,
    NetworkName,
    SubnetId,
    SubnetName,
    AddressScopeId,
    AddressScopeName,
}

impl TemplateVar {
    pub fn name(&self) -> &'static str {
        match self {
            TemplateVar::TenantId => "tenant_id",
            TemplateVar::TenantName => "tenant_name",
            TemplateVar::NetworkId => "network_id",
            TemplateVar::NetworkName => "network_name",
            TemplateVar::SubnetId => "subnet_id",
            TemplateVar::SubnetName => "subnet_name",
            TemplateVar::AddressScopeId => "address_scope_id",
            TemplateVar::AddressScopeName => "address_scope_name",
        }
    }
}

impl FromStr for TemplateVar {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant_id" => Ok(TemplateVar::TenantId),
            "tenant_name" => Ok(TemplateVar::TenantName),
            "network_id" => Ok(TemplateVar::NetworkId),
            "network_name" => Ok(TemplateVar::NetworkName),
            "subnet_id" => Ok(TemplateVar::SubnetId),
            "subnet_name" => Ok(TemplateVar::SubnetName),
            "address_scope_id" => Ok(TemplateVar::AddressScopeId),
            "address_scope_name" => Ok(TemplateVar::AddressScopeName),
            other => Err(MappingError::Configuration(format!(
                "unknown network view template variable {{{other}}}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Var(TemplateVar),
}

/// A network view name: literal (`default`) or templated (`cloud-{tenant_id}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewTemplate {
    raw: String,
    parts: Vec<Part>,
}

impl ViewTemplate {
    pub fn parse(raw: &str) -> MappingResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MappingError::Configuration("empty network view name".to_string()));
        }
        let var_re = Regex::new(r"\{([^{}]*)\}")
            .map_err(|e| MappingError::Configuration(e.to_string()))?;

        let mut parts = Vec::new();
        let mut last = 0;
        for caps in var_re.captures_iter(raw) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Part::Literal(raw[last..whole.start()].to_string()));
            }
            parts.push(Part::Var(name.as_str().trim().parse()?));
            last = whole.end();
        }
        if last < raw.len() {
            parts.push(Part::Literal(raw[last..].to_string()));
        }
        if parts
            .iter()
            .any(|p| matches!(p, Part::Literal(l) if l.contains(['{', '}'])))
        {
            return Err(MappingError::Configuration(format!(
                "unbalanced braces in network view {raw:?}"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    /// Whether the name depends on the subnet being resolved.
    pub fn is_dynamic(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Var(_)))
    }

    /// The name as written in the catalog.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Substitute scope attributes into the template.
    pub fn render(&self, attrs: &ScopeAttributes) -> MappingResult<String> {
        let mut name = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => name.push_str(text),
                Part::Var(var) => {
                    let value = attrs.variable(*var).ok_or_else(|| {
                        MappingError::Configuration(format!(
                            "network view {:?} needs {{{}}}, which subnet {} does not have",
                            self.raw,
                            var.name(),
                            attrs.subnet_id
                        ))
                    })?;
                    name.push_str(value);
                }
            }
        }
        Ok(name)
    }
}

impl fmt::Display for ViewTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> ScopeAttributes {
        let network = Network {
            id: "net-1".to_string(),
            name: "web".to_string(),
            tenant_id: "80afaaba012acb9c12888128d5123a09".to_string(),
            tenant_name: Some("acme".to_string()),
            router_external: false,
        };
        let subnet = Subnet {
            id: "sub-1".to_string(),
            name: "web-v4".to_string(),
            network_id: "net-1".to_string(),
            tenant_id: String::new(),
            cidr: "10.10.0.0/24".parse().unwrap(),
            address_scope: None,
        };
        ScopeAttributes::new(&network, &subnet)
    }

    #[test]
    fn literal_view_is_static() {
        let t = ViewTemplate::parse("default").unwrap();
        assert!(!t.is_dynamic());
        assert_eq!(t.render(&attrs()).unwrap(), "default");
    }

    #[test]
    fn tenant_template_renders_tenant_id() {
        let t = ViewTemplate::parse("{tenant_id}").unwrap();
        assert!(t.is_dynamic());
        assert_eq!(t.render(&attrs()).unwrap(), "80afaaba012acb9c12888128d5123a09");
    }

    #[test]
    fn literal_text_around_variables_is_kept() {
        let t = ViewTemplate::parse("cloud-{tenant_name}-{network_name}").unwrap();
        assert_eq!(t.render(&attrs()).unwrap(), "cloud-acme-web");
    }

    #[test]
    fn unknown_variable_rejected() {
        assert!(matches!(
            ViewTemplate::parse("{project_id}"),
            Err(MappingError::Configuration(_))
        ));
        assert!(ViewTemplate::parse("view-{tenant_id").is_err());
        assert!(ViewTemplate::parse("  ").is_err());
    }

    #[test]
    fn missing_value_fails_render() {
        let t = ViewTemplate::parse("{address_scope_id}").unwrap();
        assert!(matches!(
            t.render(&attrs()),
            Err(MappingError::Configuration(_))
        ));
    }

    #[test]
    fn subnet_tenant_falls_back_to_network() {
        assert_eq!(attrs().tenant_id, "80afaaba012acb9c12888128d5123a09");
    }

    #[test]
    fn ip_version_follows_cidr() {
        let mut subnet = Subnet {
            id: "s".to_string(),
            name: "s".to_string(),
            network_id: "n".to_string(),
            tenant_id: "t".to_string(),
            cidr: "fd00::/64".parse().unwrap(),
            address_scope: None,
        };
        assert_eq!(subnet.ip_version(), IpVersion::V6);
        subnet.cidr = "192.168.0.0/16".parse().unwrap();
        assert_eq!(subnet.ip_version(), IpVersion::V4);
    }

    #[test]
    fn default_scope_view_names() {
        let a = attrs();
        assert_eq!(
            a.default_view_name(NetworkViewScope::Single, "default"),
            Some("default".to_string())
        );
        assert_eq!(a.default_view_name(NetworkViewScope::Single, " "), None);
        assert_eq!(
            a.default_view_name(NetworkViewScope::Network, "default"),
            Some("net-1".to_string())
        );
        assert_eq!(a.default_view_name(NetworkViewScope::AddressScope, "default"), None);
    }
}
