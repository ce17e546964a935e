use ovs_netlink::openvswitch::{new_ethertype_flow_key, new_in_port_flow_key, Dpif, FlowSpec};

// Requires CAP_NET_ADMIN and the openvswitch kernel module loaded.
#[test]
#[ignore]
fn create_list_delete_datapath() {
    let mut dpif = Dpif::new().unwrap();
    let dp = dpif.create_datapath("ovs-nlctl-test0").unwrap();
    assert_eq!(dp.name, "ovs-nlctl-test0");

    let found = dpif.enumerate_datapaths().unwrap();
    assert!(found.contains_key("ovs-nlctl-test0"));

    dpif.delete_datapath(&dp).unwrap();
    assert!(dpif.lookup_datapath("ovs-nlctl-test0").unwrap().is_none());
}

#[test]
#[ignore]
fn install_and_remove_flow() {
    let mut dpif = Dpif::new().unwrap();
    let dp = dpif.create_datapath("ovs-nlctl-test1").unwrap();

    let mut spec = FlowSpec::new();
    spec.add_key(new_in_port_flow_key(1));
    spec.add_key(new_ethertype_flow_key(0x0800));

    dp.create_flow(&mut dpif, &spec).unwrap();
    let flows = dp.enumerate_flows(&mut dpif).unwrap();
    assert!(flows.iter().any(|f| f.equals(&spec)));

    dp.delete_flow(&mut dpif, &spec).unwrap();
    dpif.delete_datapath(&dp).unwrap();
}
