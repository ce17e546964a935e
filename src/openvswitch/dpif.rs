//! Datapath lifecycle (§4.8 of the design doc): opening the netlink
//! socket, resolving the generic netlink family ids OVS registers, and
//! creating/looking up/enumerating/deleting datapaths. Grounded in
//! `original_source/ovs/main.go`'s `createDatapath`/`deleteDatapath`/
//! `listDatapaths` dispatch and `openvswitch/flow.go`'s
//! `dp.dpif`/`dpif.familyIds[FLOW]` usage.

use std::collections::HashMap;
use std::ffi::CString;

use nix::sys::socket::SockProtocol;

use crate::error::{Error, Result};
use crate::netlink::bindings::{
    genlmsghdr, OVS_DATAPATH_FAMILY, OVS_DATAPATH_VERSION, OVS_DP_ATTR_NAME,
    OVS_DP_ATTR_UPCALL_PID, OVS_DP_CMD_DEL, OVS_DP_CMD_GET, OVS_DP_CMD_NEW, OVS_FLOW_FAMILY,
    OVS_PACKET_FAMILY, OVS_VPORT_FAMILY,
};
use crate::netlink::genl::lookup_family_id;
use crate::netlink::{request, request_multi, Message, MsgBuilder, NetlinkSocket, NlSerializer};

use super::flow::Datapath;

/// The genl families this crate needs, each looked up once and cached
/// (§8 "Datapath family-id lookup is idempotent").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Datapath,
    Vport,
    Flow,
    Packet,
}

impl Family {
    fn name(self) -> &'static str {
        match self {
            Family::Datapath => OVS_DATAPATH_FAMILY,
            Family::Vport => OVS_VPORT_FAMILY,
            Family::Flow => OVS_FLOW_FAMILY,
            Family::Packet => OVS_PACKET_FAMILY,
        }
    }
}

/// "Datapath interface": the per-process handle owning the netlink
/// socket and the family-id table for every OVS genl family
/// multiplexed through `ovs_datapath` (§3 "Family-id table").
pub struct Dpif {
    sock: NetlinkSocket,
    family_ids: HashMap<Family, u16>,
}

impl Dpif {
    /// Opens a generic netlink socket and resolves the `ovs_datapath`
    /// family id. Other families are resolved lazily, on first use, so
    /// a process that only ever touches datapaths never looks up
    /// `ovs_flow`.
    pub fn new() -> Result<Self> {
        let sock = NetlinkSocket::open(SockProtocol::NetlinkGeneric)?;
        let mut dpif = Dpif {
            sock,
            family_ids: HashMap::new(),
        };
        dpif.family_id(Family::Datapath)?;
        Ok(dpif)
    }

    pub(crate) fn sock(&self) -> &NetlinkSocket {
        &self.sock
    }

    /// Resolves and caches the genl family id for `family` (§8).
    pub(crate) fn family_id(&mut self, family: Family) -> Result<u16> {
        if let Some(&id) = self.family_ids.get(&family) {
            return Ok(id);
        }

        let id = lookup_family_id(&self.sock, family.name())?;
        self.family_ids.insert(family, id);
        Ok(id)
    }

    fn datapath_request(&mut self, cmd: u8, dp_ifindex: i32, dump: bool) -> Result<MsgBuilder> {
        let family_id = self.family_id(Family::Datapath)?;
        let mut req = MsgBuilder::new(family_id)
            .echo()
            .generic(cmd, OVS_DATAPATH_VERSION)
            .ovs_header(dp_ifindex);
        if dump {
            req = req.dump();
        }
        Ok(req)
    }

    fn parse_datapath(&self, family_id: u16, msg: &mut Message) -> Result<Datapath> {
        msg.expect_header(family_id)?;
        let _: genlmsghdr = msg.expect_generic(OVS_DP_CMD_NEW)?;
        let ovs_hdr = msg.expect_ovs_header()?;
        let attrs = msg.take_attrs()?;
        let name = attrs.required_cstring(OVS_DP_ATTR_NAME)?;

        Ok(Datapath {
            ifindex: ovs_hdr.dp_ifindex,
            name: name.to_string_lossy().into_owned(),
        })
    }

    fn name_cstring(name: &str) -> Result<CString> {
        CString::new(name).map_err(|_| Error::InvalidDatapathName(name.to_string()))
    }

    /// Creates a new datapath named `name`, registering this socket's
    /// pid as the upcall target (§4.8).
    pub fn create_datapath(&mut self, name: &str) -> Result<Datapath> {
        let pid = self.sock.pid();
        let cname = Self::name_cstring(name)?;

        let family_id = self.family_id(Family::Datapath)?;
        let req = self
            .datapath_request(OVS_DP_CMD_NEW, 0, false)?
            .attr_cstr(OVS_DP_ATTR_NAME, &cname)
            .attr(OVS_DP_ATTR_UPCALL_PID, pid);

        let mut msg = request(&self.sock, req)?;
        self.parse_datapath(family_id, &mut msg)
    }

    /// Looks up a datapath by name via `OVS_DP_CMD_GET`, returning
    /// `None` if no such datapath exists.
    pub fn lookup_datapath(&mut self, name: &str) -> Result<Option<Datapath>> {
        let cname = Self::name_cstring(name)?;
        let family_id = self.family_id(Family::Datapath)?;
        let req = self
            .datapath_request(OVS_DP_CMD_GET, 0, false)?
            .attr_cstr(OVS_DP_ATTR_NAME, &cname);

        match request(&self.sock, req) {
            Ok(mut msg) => Ok(Some(self.parse_datapath(family_id, &mut msg)?)),
            Err(Error::Netlink(errno)) if errno == nix::errno::Errno::ENODEV => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Enumerates every datapath known to the kernel, keyed by name
    /// (§4.8 `EnumerateDatapaths`).
    pub fn enumerate_datapaths(&mut self) -> Result<HashMap<String, Datapath>> {
        let family_id = self.family_id(Family::Datapath)?;
        let req = self.datapath_request(OVS_DP_CMD_GET, 0, true)?;

        let mut res = HashMap::new();
        request_multi(&self.sock, req, |mut msg| {
            let dp = self.parse_datapath(family_id, &mut msg)?;
            res.insert(dp.name.clone(), dp);
            Ok(())
        })?;

        Ok(res)
    }

    /// Deletes the datapath identified by `dp` (§4.8 `Datapath::delete`).
    pub fn delete_datapath(&mut self, dp: &Datapath) -> Result<()> {
        let req = self.datapath_request(OVS_DP_CMD_DEL, dp.ifindex, false)?;
        request(&self.sock, req)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_enum_names_match_bindings() {
        assert_eq!(Family::Datapath.name(), OVS_DATAPATH_FAMILY);
        assert_eq!(Family::Vport.name(), OVS_VPORT_FAMILY);
        assert_eq!(Family::Flow.name(), OVS_FLOW_FAMILY);
        assert_eq!(Family::Packet.name(), OVS_PACKET_FAMILY);
    }
}
