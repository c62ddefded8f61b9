//! Releasing subnets returns views and members to the pool.

mod common;

use common::*;
use ipamgrid_state::StoreRead;

#[test]
fn releasing_last_subnet_frees_dynamic_view_and_authority() {
    let engine = engine_with(TENANT_RULE, gateway_with_cpms(1));
    let net = network("net-a", "T1", false);
    let sub = subnet("sub-a", &net, "10.1.0.0/24");
    engine.resolve_mapping(&net, &sub).unwrap();

    assert!(engine.release_subnet("net-a", "sub-a").unwrap());

    let state = engine.state();
    assert!(state.get_object_mapping("net-a", "sub-a").unwrap().is_none());
    assert!(state.list_service_members("net-a").unwrap().is_empty());
    assert!(state.find_network_view(1, "T1").unwrap().is_none());
    assert!(state.list_mapping_members(1).unwrap().is_empty());

    // The only CPM is free again for another tenant.
    let other = network("net-b", "T2", false);
    let ctx = engine
        .resolve_mapping(&other, &subnet("sub-b", &other, "10.2.0.0/24"))
        .unwrap();
    assert_eq!(ctx.authority_member.id, member_id("cpm1"));
}

#[test]
fn view_with_remaining_subnets_is_kept() {
    let engine = engine(TENANT_RULE);
    let net = network("net-a", "T1", false);
    engine
        .resolve_mapping(&net, &subnet("sub-v4", &net, "10.1.0.0/24"))
        .unwrap();
    engine
        .resolve_mapping(&net, &subnet("sub-v6", &net, "fd10::/64"))
        .unwrap();

    assert!(engine.release_subnet("net-a", "sub-v4").unwrap());

    let state = engine.state();
    assert!(state.find_network_view(1, "T1").unwrap().is_some());
    assert_eq!(state.list_mapping_members(1).unwrap().len(), 1);
    // The network still has a subnet, so it keeps its service members.
    assert_eq!(state.list_service_members("net-a").unwrap().len(), 2);
}

#[test]
fn bound_static_view_outlives_its_subnets() {
    let engine = engine(GLOBAL_RULE);
    let net = network("ext", "admin", true);
    engine
        .resolve_mapping(&net, &subnet("ext-sub", &net, "203.0.113.0/24"))
        .unwrap();

    assert!(engine.release_subnet("ext", "ext-sub").unwrap());

    let state = engine.state();
    let view = state.find_network_view(1, "default").unwrap().unwrap();
    assert!(state.get_mapping_member(&view.id).unwrap().is_some());
    assert!(state.list_service_members("ext").unwrap().is_empty());
}

#[test]
fn releasing_a_view_keeps_the_network_rows_of_its_other_view() {
    let conditions = format!(
        r#"
[[conditions]]
condition = "subnet_range:10.5.0.0/24"
network_view = "range-view"
authority_member = "gm"
dhcp_members = ["gm"]
dns_members = ["gm"]
{GLOBAL_RULE}"#
    );
    let engine = engine(&conditions);
    let net = network("ext", "admin", true);
    let in_range = subnet("sub-range", &net, "10.5.0.0/24");
    let outside = subnet("sub-other", &net, "10.6.0.0/24");
    engine.resolve_mapping(&net, &in_range).unwrap();
    let kept = engine.resolve_mapping(&net, &outside).unwrap();

    assert!(engine.release_subnet("ext", "sub-range").unwrap());

    let state = engine.state();
    let range_view = state.find_network_view(1, "range-view").unwrap().unwrap();
    assert!(state.list_view_service_members("ext", &range_view.id).unwrap().is_empty());
    assert_eq!(state.list_service_members("ext").unwrap().len(), 2);
    assert_eq!(engine.resolve_mapping(&net, &outside).unwrap(), kept);
}

#[test]
fn releasing_unknown_subnet_is_a_no_op() {
    let engine = engine(TENANT_RULE);
    assert!(!engine.release_subnet("net-x", "sub-x").unwrap());
}

#[test]
fn re_resolving_after_release_records_a_fresh_mapping() {
    let engine = engine(TENANT_RULE);
    let net = network("net-a", "T1", false);
    let sub = subnet("sub-a", &net, "10.1.0.0/24");

    let first = engine.resolve_mapping(&net, &sub).unwrap();
    engine.release_subnet("net-a", "sub-a").unwrap();
    let second = engine.resolve_mapping(&net, &sub).unwrap();

    assert_eq!(first.network_view_name, second.network_view_name);
    assert!(engine.state().get_object_mapping("net-a", "sub-a").unwrap().is_some());
}
