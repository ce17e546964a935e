//! Generic-netlink family-id lookup. Out of THE CORE per spec.md §1
//! ("generic netlink family-id lookup" is named an external
//! collaborator), but every OVS command needs it, so it lives here as
//! a thin, reusable helper built entirely out of the request engine.

use std::ffi::CString;

use super::bindings::{
    genlmsghdr, CTRL_ATTR_FAMILY_ID, CTRL_ATTR_FAMILY_NAME, CTRL_CMD_GETFAMILY, CTRL_CMD_NEWFAMILY,
    GENL_ID_CTRL,
};
use super::builder::{MsgBuilder, NlSerializer};
use super::request::request;
use super::socket::NetlinkSocket;
use crate::error::{Error, Result};

/// Looks up the numeric family id assigned to the named generic
/// netlink family (e.g. `"ovs_datapath"`), by querying
/// `GENL_ID_CTRL`/`CTRL_CMD_GETFAMILY`.
pub fn lookup_family_id(sock: &NetlinkSocket, family_name: &str) -> Result<u16> {
    let name = CString::new(family_name).map_err(|_| Error::UnknownFamily(family_name.into()))?;

    let req = MsgBuilder::new(GENL_ID_CTRL)
        .echo()
        .generic(CTRL_CMD_GETFAMILY, 1)
        .attr_cstr(CTRL_ATTR_FAMILY_NAME, &name);

    let mut msg = request(sock, req)?;
    msg.expect_header(GENL_ID_CTRL)?;
    // The controller replies with CTRL_CMD_NEWFAMILY regardless of which
    // command was requested, not an echo of CTRL_CMD_GETFAMILY.
    let _: genlmsghdr = msg.expect_generic(CTRL_CMD_NEWFAMILY)?;
    let attrs = msg.take_attrs()?;

    attrs
        .required_u16(CTRL_ATTR_FAMILY_ID)
        .map_err(|_| Error::UnknownFamily(family_name.into()))
}
