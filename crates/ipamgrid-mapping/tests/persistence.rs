//! Mappings survive closing and reopening the store file.

mod common;

use common::*;
use ipamgrid_mapping::IpamEngine;
use ipamgrid_state::StoreRead;

#[test]
fn reopened_engine_returns_recorded_mappings_without_resync() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ipam.redb");
    let net = network("net-a", "T1", false);
    let sub = subnet("sub-a", &net, "10.1.0.0/24");

    let first = {
        let engine = IpamEngine::open(&path, gateway(), &config(TENANT_RULE)).unwrap();
        engine.sync_grid(true).unwrap();
        engine.resolve_mapping(&net, &sub).unwrap()
    };

    let engine = IpamEngine::open(&path, gateway(), &config(TENANT_RULE)).unwrap();
    let again = engine.resolve_mapping(&net, &sub).unwrap();
    assert_eq!(again, first);
    assert_eq!(engine.state().list_mapping_members(1).unwrap().len(), 1);

    // The reserved CPM stays taken across the restart.
    let other = network("net-b", "T2", false);
    let ctx = engine
        .resolve_mapping(&other, &subnet("sub-b", &other, "10.2.0.0/24"))
        .unwrap();
    assert_ne!(ctx.authority_member.id, first.authority_member.id);
}
