//! User-space client for the Open vSwitch kernel datapath, talking
//! generic netlink directly rather than shelling out to `ovs-vsctl`/
//! `ovs-dpctl`.

pub mod error;
pub mod netlink;
pub mod openvswitch;

pub use error::{Error, Result};
