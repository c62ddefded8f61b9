//! Concurrent resolvers sharing one store.

mod common;

use std::collections::HashSet;

use common::*;
use ipamgrid_mapping::MappingError;
use ipamgrid_state::StoreRead;

#[test]
fn concurrent_tenants_never_share_an_authority() {
    let engine = engine_with(TENANT_RULE, gateway_with_cpms(6));

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = &engine;
                s.spawn(move || {
                    let net = network(&format!("net-{i}"), &format!("T{i}"), false);
                    engine.resolve_mapping(&net, &subnet(&format!("sub-{i}"), &net, "10.0.0.0/24"))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let resolved: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let failed: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(resolved.len(), 6);
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|e| matches!(e, MappingError::Reservation(_))));

    let authorities: HashSet<_> = resolved.iter().map(|c| &c.authority_member.id).collect();
    assert_eq!(authorities.len(), 6);

    let rows = engine.state().list_mapping_members(1).unwrap();
    let members: HashSet<_> = rows.iter().map(|r| &r.member_id).collect();
    assert_eq!(rows.len(), members.len());
}

#[test]
fn concurrent_subnets_in_one_tenant_share_a_view() {
    let engine = engine(TENANT_RULE);

    let contexts: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = &engine;
                s.spawn(move || {
                    let net = network(&format!("net-{i}"), "T1", false);
                    engine
                        .resolve_mapping(&net, &subnet(&format!("sub-{i}"), &net, "10.0.0.0/24"))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let views: HashSet<_> = contexts.iter().map(|c| &c.network_view_id).collect();
    assert_eq!(views.len(), 1);
    assert_eq!(engine.state().list_network_views(1).unwrap().len(), 1);
    assert_eq!(engine.state().list_mapping_members(1).unwrap().len(), 1);
}

#[test]
fn concurrent_resolution_of_one_subnet_records_one_mapping() {
    let engine = engine(TENANT_RULE);
    let net = network("net-a", "T1", false);
    let sub = subnet("sub-a", &net, "10.1.0.0/24");

    let contexts: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| engine.resolve_mapping(&net, &sub).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(contexts.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        engine
            .state()
            .list_object_mappings_for_network("net-a")
            .unwrap()
            .len(),
        1
    );
    assert_eq!(engine.state().list_service_members("net-a").unwrap().len(), 2);
}
