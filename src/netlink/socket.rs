//! Netlink socket (§4.2). Owns a netlink datagram endpoint, tracks the
//! kernel-assigned port id, and exposes blocking send/recv primitives.
//! All I/O here is synchronous: one socket serves at most one
//! concurrent transaction (§5).

use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{
    bind, getsockname, recvfrom, socket, AddressFamily, NetlinkAddr, SockFlag, SockProtocol,
    SockType,
};

use super::builder::MsgBuilder;
use super::parser::DatagramCursor;
use crate::error::{Error, Result};

/// One page, matching the kernel's usual netlink datagram size (§8
/// boundary behavior: a reply exactly filling the page must parse
/// fully).
const RECV_BUF_SIZE: usize = 4096;

pub struct NetlinkSocket {
    fd: Option<OwnedFd>,
    pid: u32,
}

impl NetlinkSocket {
    /// Opens a raw netlink socket for `protocol` and binds it to a
    /// kernel-assigned address, recording the assigned port id.
    pub fn open(protocol: SockProtocol) -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::empty(),
            protocol,
        )
        .map_err(Error::from)?;

        bind(fd.as_raw_fd(), &NetlinkAddr::new(0, 0)).map_err(Error::from)?;

        let local: NetlinkAddr = getsockname(fd.as_raw_fd()).map_err(Error::from)?;
        let pid = local.pid();

        Ok(NetlinkSocket {
            fd: Some(fd),
            pid,
        })
    }

    fn fd(&self) -> Result<&OwnedFd> {
        self.fd.as_ref().ok_or(Error::Closed)
    }

    /// The local port id assigned by the kernel at bind time.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Finalizes `builder` and sends it as one datagram to the kernel
    /// (destination port 0), returning the assigned sequence number.
    pub fn send(&self, builder: MsgBuilder) -> Result<u32> {
        builder.sendto(self.fd()?)
    }

    /// Receives one datagram into a page-sized buffer, rejecting it if
    /// the source port doesn't match `expected_peer`, and returns a
    /// cursor over the received bytes.
    pub fn recv(&self, expected_peer: u32) -> Result<Datagram> {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let (read, from) = recvfrom::<NetlinkAddr>(self.fd()?.as_raw_fd(), &mut buf).map_err(Error::from)?;
        buf.truncate(read);

        let from_pid = from.map(|a| a.pid()).unwrap_or(0);
        if from_pid != expected_peer {
            return Err(Error::PeerMismatch {
                got: from_pid,
                expected: expected_peer,
            });
        }

        Ok(Datagram { bytes: buf })
    }

    /// Drops the underlying file descriptor, closing it synchronously
    /// instead of waiting for this socket to be dropped. Any later
    /// `send`/`recv` fails with [`Error::Closed`] instead of an opaque
    /// EBADF from the kernel.
    pub fn close(&mut self) {
        self.fd.take();
    }
}

/// One received datagram, owning its bytes so a [`DatagramCursor`]
/// (and the [`Message`](super::parser::Message)s it yields) can
/// outlive the `recv` call that produced it.
pub struct Datagram {
    bytes: Vec<u8>,
}

impl Datagram {
    pub fn cursor(&self) -> DatagramCursor<'_> {
        DatagramCursor::new(&self.bytes)
    }
}
