//! OVS-specific layers built atop the generic netlink transport: the
//! flow-key codec, flow install/remove/enumerate, and datapath
//! lifecycle management (§4.6, §4.8).

pub mod dpif;
pub mod flow;
pub mod flowkey;

pub use dpif::{Dpif, Family};
pub use flow::Datapath;
pub use flowkey::{
    new_ethernet_flow_key, new_ethertype_flow_key, new_in_port_flow_key, new_priority_flow_key,
    new_skb_mark_flow_key, BlobFlowKey, FlowKey, FlowKeyParsers, FlowKeys, FlowSpec,
    TunnelFlowKey,
};
