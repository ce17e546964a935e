//! Flow install/remove/enumerate (§4.6 continued), grounded in
//! `original_source/openvswitch/flow.go`'s `Datapath.CreateFlow`/
//! `DeleteFlow`/`EnumerateFlows`.

use crate::error::{Error, Result};
use crate::netlink::bindings::{
    genlmsghdr, OVS_FLOW_ATTR_KEY, OVS_FLOW_ATTR_MASK, OVS_FLOW_CMD_DEL, OVS_FLOW_CMD_GET,
    OVS_FLOW_CMD_NEW, OVS_FLOW_VERSION,
};
use crate::netlink::{request, request_multi, Message, MsgBuilder};

use super::dpif::{Dpif, Family};
use super::flowkey::{flow_key_parsers, parse_flow_keys, FlowKeys, FlowSpec};

/// A kernel-resident OVS switch instance (§GLOSSARY "Datapath"),
/// identified by the kernel-assigned `ifindex` and its administrator-
/// chosen `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datapath {
    pub ifindex: i32,
    pub name: String,
}

impl Datapath {
    fn flow_request(&self, dpif: &mut Dpif, cmd: u8, dump: bool) -> Result<(u16, MsgBuilder)> {
        let family_id = dpif.family_id(Family::Flow)?;
        let mut req = MsgBuilder::new(family_id)
            .echo()
            .generic(cmd, OVS_FLOW_VERSION)
            .ovs_header(self.ifindex);
        if dump {
            req = req.dump();
        }
        Ok((family_id, req))
    }

    fn parse_flow_spec(&self, family_id: u16, msg: &mut Message) -> Result<FlowSpec> {
        msg.expect_header(family_id)?;
        let _: genlmsghdr = msg.expect_generic(OVS_FLOW_CMD_NEW)?;
        let ovs_hdr = msg.expect_ovs_header()?;
        if ovs_hdr.dp_ifindex != self.ifindex {
            return Err(Error::WrongDatapath {
                got: ovs_hdr.dp_ifindex,
                expected: self.ifindex,
            });
        }

        let attrs = msg.take_attrs()?;
        let keys = attrs.required_nested(OVS_FLOW_ATTR_KEY)?;
        let masks = attrs.nested(OVS_FLOW_ATTR_MASK, true)?;

        let keys: FlowKeys = parse_flow_keys(&keys, masks.as_ref(), &flow_key_parsers())?;
        Ok(FlowSpec { keys })
    }

    /// Installs `flow` on this datapath (`OVS_FLOW_CMD_NEW`).
    pub fn create_flow(&self, dpif: &mut Dpif, flow: &FlowSpec) -> Result<()> {
        let (_, req) = self.flow_request(dpif, OVS_FLOW_CMD_NEW, false)?;
        let req = flow.encode(req);
        request(dpif.sock(), req)?;
        Ok(())
    }

    /// Removes `flow` from this datapath (`OVS_FLOW_CMD_DEL`), mapping
    /// `ENOENT` to [`Error::NoSuchFlow`] (§4.7, §7).
    pub fn delete_flow(&self, dpif: &mut Dpif, flow: &FlowSpec) -> Result<()> {
        let (_, req) = self.flow_request(dpif, OVS_FLOW_CMD_DEL, false)?;
        let req = flow.encode(req);
        match request(dpif.sock(), req) {
            Ok(_) => Ok(()),
            Err(Error::Netlink(errno)) if errno == nix::errno::Errno::ENOENT => {
                Err(Error::NoSuchFlow)
            }
            Err(e) => Err(e),
        }
    }

    /// Enumerates every flow currently installed on this datapath
    /// (`OVS_FLOW_CMD_GET` with `NLM_F_DUMP`).
    pub fn enumerate_flows(&self, dpif: &mut Dpif) -> Result<Vec<FlowSpec>> {
        let (family_id, req) = self.flow_request(dpif, OVS_FLOW_CMD_GET, true)?;

        let mut res = Vec::new();
        request_multi(dpif.sock(), req, |mut msg| {
            res.push(self.parse_flow_spec(family_id, &mut msg)?);
            Ok(())
        })?;

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datapath_equality_is_by_ifindex_and_name() {
        let a = Datapath {
            ifindex: 3,
            name: "ovs-test".into(),
        };
        let b = Datapath {
            ifindex: 3,
            name: "ovs-test".into(),
        };
        let c = Datapath {
            ifindex: 4,
            name: "ovs-test".into(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
