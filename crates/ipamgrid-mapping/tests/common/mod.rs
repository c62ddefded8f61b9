//! Shared fixtures: one grid with a grid master and cloud platform members.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Once};

use ipamgrid_core::IpamConfig;
use ipamgrid_mapping::{IpamEngine, Network, Subnet};
use ipamgrid_state::StateStore;
use ipamgrid_sync::gateway::CLOUD_API_LICENSE;
use ipamgrid_sync::{AttributeMap, AttributeValue, LicenseRecord, MemberRecord, StaticGateway};

pub const GRID_TOML: &str = r#"
[grid]
id = 1
name = "Default Grid"
master_host = "10.0.0.1"
username = "admin"
password = "infoblox"
"#;

/// Tenant rule: one view per tenant, owned by the next free CPM.
pub const TENANT_RULE: &str = r#"
[[conditions]]
condition = "tenant"
network_view = "{tenant_id}"
authority_member = "<next-available-member>"
"#;

/// Global rule: externally routed networks live in `default`, owned by the GM.
pub const GLOBAL_RULE: &str = r#"
[[conditions]]
condition = "global"
network_view = "default"
authority_member = "gm"
dhcp_members = ["gm"]
dns_members = ["gm"]
"#;

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=debug`).
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Grid fixtures ────────────────────────────────────────────────

pub fn config(conditions: &str) -> IpamConfig {
    IpamConfig::from_toml_str(&format!("{GRID_TOML}\n{conditions}")).unwrap()
}

pub fn member(host: &str, last_octet: u8, cloud: bool) -> MemberRecord {
    MemberRecord {
        member_ref: format!("member/{host}"),
        host_name: host.to_string(),
        ipv4_address: Some(Ipv4Addr::new(10, 0, 0, last_octet)),
        ipv6_address: Some(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, u16::from(last_octet))),
        node_status: Some("WORKING".to_string()),
        cloud_platform: cloud,
    }
}

/// `gm` plus `cpm1..=cpmN`, every CPM licensed.
pub fn gateway_with_cpms(count: u8) -> Arc<StaticGateway> {
    let mut members = vec![member("gm", 1, false)];
    let mut licenses = Vec::new();
    for n in 1..=count {
        let host = format!("cpm{n}");
        members.push(member(&host, 1 + n, true));
        licenses.push(LicenseRecord {
            host_name: host,
            kind: CLOUD_API_LICENSE.to_string(),
        });
    }
    Arc::new(StaticGateway::new(members).with_licenses(licenses))
}

/// `gm`, `cpm1`, `cpm2`.
pub fn gateway() -> Arc<StaticGateway> {
    gateway_with_cpms(2)
}

pub fn attributes(pairs: &[(&str, &str)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), AttributeValue::Single(v.to_string())))
        .collect()
}

/// An engine over a fresh in-memory store, not yet synced.
pub fn unsynced_engine(conditions: &str, gateway: Arc<StaticGateway>) -> IpamEngine {
    init_tracing();
    IpamEngine::new(StateStore::open_in_memory().unwrap(), gateway, &config(conditions))
}

/// An engine whose grid has completed one sync.
pub fn engine_with(conditions: &str, gateway: Arc<StaticGateway>) -> IpamEngine {
    let engine = unsynced_engine(conditions, gateway);
    engine.sync_grid(true).unwrap();
    engine
}

pub fn engine(conditions: &str) -> IpamEngine {
    engine_with(conditions, gateway())
}

// ── Orchestration objects ────────────────────────────────────────

pub fn network(id: &str, tenant: &str, external: bool) -> Network {
    Network {
        id: id.to_string(),
        name: format!("{id}-name"),
        tenant_id: tenant.to_string(),
        tenant_name: Some(format!("{tenant}-name")),
        router_external: external,
    }
}

pub fn subnet(id: &str, network: &Network, cidr: &str) -> Subnet {
    Subnet {
        id: id.to_string(),
        name: format!("{id}-name"),
        network_id: network.id.clone(),
        tenant_id: network.tenant_id.clone(),
        cidr: cidr.parse().unwrap(),
        address_scope: None,
    }
}

pub fn member_id(host: &str) -> String {
    ipamgrid_core::member_id(1, host)
}
