//! Netlink message parser (§4.4). A cursor over received bytes that
//! yields successive netlink messages, validates headers, and
//! extracts attributes either as a mapping by type or as an ordered
//! list.

use std::collections::HashMap;
use std::ffi::CString;
use std::mem;

use nix::errno::Errno;

use super::bindings::{
    genlmsghdr, nl_align_length, nl_size_of_aligned, nlattr, nlmsghdr, ovs_header, NLMSG_DONE,
    NLMSG_ERROR, NLMSG_ALIGNTO,
};
use crate::error::{Error, Result};

fn read_at<T: Copy>(data: &[u8], pos: usize) -> Result<T> {
    if pos + mem::size_of::<T>() > data.len() {
        return Err(Error::Truncated);
    }

    // `data` backing a Message is always freshly copied out of a
    // 4-byte-aligned recv buffer at a 4-byte-aligned offset, so this
    // cast never sees a misaligned prefix/suffix.
    let ptr = data[pos..].as_ptr() as *const T;
    Ok(unsafe { ptr.read_unaligned() })
}

/// Outcome of matching a received message's header against the
/// expected reply (§4.4 `CheckHeader`).
#[derive(Debug, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// `NLMSG_ERROR` with errno 0: an ack, treat as a successful reply
    /// with no payload of its own.
    Ack,
    /// A normal reply matching the expected sequence number.
    Message,
    /// Sequence number didn't match what we sent; discardable.
    Skip,
}

/// One netlink message, bounded to its own `nlmsg_len` extent
/// (including trailing padding that belongs to a surrounding nest, but
/// not the datagram's own trailing pad). Owns its bytes so it can
/// outlive the datagram buffer it was carved from.
#[derive(Debug, Clone)]
pub struct Message {
    bytes: Vec<u8>,
    pos: usize,
}

impl Message {
    fn from_bytes(bytes: Vec<u8>) -> Self {
        Message { bytes, pos: 0 }
    }

    /// Peeks the 16-byte header without advancing the cursor.
    pub fn header(&self) -> Result<nlmsghdr> {
        read_at(&self.bytes, 0)
    }

    /// Verifies the reply's pid and sequence number, and demultiplexes
    /// `NLMSG_ERROR` (§4.4 `CheckHeader`, §4.5).
    pub fn check_header(&self, sock_pid: u32, expected_seq: u32) -> Result<HeaderOutcome> {
        let h = self.header()?;
        if h.nlmsg_pid != sock_pid {
            return Err(Error::PidMismatch {
                got: h.nlmsg_pid,
                expected: sock_pid,
            });
        }

        if h.nlmsg_seq != expected_seq {
            // Not necessarily an error: a previous RequestMulti that
            // bailed out early can leave stray replies in flight.
            log::warn!(
                "netlink reply sequence number mismatch (got {}, expected {})",
                h.nlmsg_seq,
                expected_seq
            );
            return Ok(HeaderOutcome::Skip);
        }

        if h.nlmsg_type == NLMSG_ERROR {
            let errno: i32 = read_at(&self.bytes, nl_size_of_aligned::<nlmsghdr>())?;
            if errno != 0 {
                return Err(Error::Netlink(Errno::from_i32(-errno)));
            }

            return Ok(HeaderOutcome::Ack);
        }

        Ok(HeaderOutcome::Message)
    }

    /// Advances past the 16-byte header, failing if its type doesn't
    /// match (§4.4 `ExpectHeader`).
    pub fn expect_header(&mut self, expected_type: u16) -> Result<nlmsghdr> {
        let h: nlmsghdr = read_at(&self.bytes, self.pos)?;
        if h.nlmsg_type != expected_type {
            return Err(Error::TypeMismatch {
                got: h.nlmsg_type,
                expected: expected_type,
            });
        }

        self.pos += nl_size_of_aligned::<nlmsghdr>();
        Ok(h)
    }

    /// Advances past the generic-netlink sub-header, failing if its
    /// command doesn't match.
    pub fn expect_generic(&mut self, expected_cmd: u8) -> Result<genlmsghdr> {
        let gh: genlmsghdr = read_at(&self.bytes, self.pos)?;
        if gh.cmd != expected_cmd {
            return Err(Error::TypeMismatch {
                got: gh.cmd as u16,
                expected: expected_cmd as u16,
            });
        }

        self.pos += nl_size_of_aligned::<genlmsghdr>();
        Ok(gh)
    }

    /// Advances past the OVS family sub-header.
    pub fn expect_ovs_header(&mut self) -> Result<ovs_header> {
        let oh: ovs_header = read_at(&self.bytes, self.pos)?;
        self.pos += nl_size_of_aligned::<ovs_header>();
        Ok(oh)
    }

    /// Parses the remainder of the message as a sequence of
    /// attributes into a mapping by type (§4.4 `TakeAttrs`).
    pub fn take_attrs(&mut self) -> Result<Attrs> {
        let attrs = parse_attrs_map(&self.bytes[self.pos..])?;
        self.pos = self.bytes.len();
        Ok(attrs)
    }
}

/// `ParseAttrs` (§4.4): the internal primitive walking a byte range as
/// a sequence of 4-byte-aligned TLVs, invoking `consumer` for each.
fn parse_attrs(data: &[u8], mut consumer: impl FnMut(u16, &[u8])) -> Result<()> {
    let mut pos = 0usize;
    while pos < data.len() {
        let apos = nl_align_length(pos);
        if apos >= data.len() {
            break;
        }

        let nla: nlattr = read_at(data, apos)?;
        let end = apos + nla.nla_len as usize;
        if end > data.len() {
            return Err(Error::Truncated);
        }

        let val_start = apos + nl_size_of_aligned::<nlattr>();
        consumer(nla.payload_type(), &data[val_start..end]);
        pos = end;
    }

    Ok(())
}

fn parse_attrs_map(data: &[u8]) -> Result<Attrs> {
    let mut map = HashMap::new();
    // Duplicate attribute types are not expected to occur in this
    // protocol subset (§9 open question (b)); when built via a
    // mapping, last-wins.
    parse_attrs(data, |typ, val| {
        map.insert(typ, val.to_vec());
    })?;
    Ok(Attrs(map))
}

/// Parses a standalone nested-attribute region (the value of a
/// `NLA_F_NESTED` attribute) the same way as a message's top-level
/// attribute list.
pub fn parse_nested_attrs(data: &[u8]) -> Result<Attrs> {
    parse_attrs_map(data)
}

/// An attribute, preserving on-wire order, as returned by
/// [`Attrs::ordered`].
#[derive(Debug, Clone)]
pub struct OrderedAttr {
    pub attr_type: u16,
    pub value: Vec<u8>,
}

/// Attributes extracted from one nested region, keyed by type
/// (§4.4). Values are raw, unparsed attribute payload bytes; nested
/// regions are parsed on demand via [`Attrs::nested`].
#[derive(Debug, Clone, Default)]
pub struct Attrs(HashMap<u16, Vec<u8>>);

impl Attrs {
    pub fn get(&self, typ: u16) -> Option<&[u8]> {
        self.0.get(&typ).map(|v| v.as_slice())
    }

    pub fn contains(&self, typ: u16) -> bool {
        self.0.contains_key(&typ)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.0.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    pub fn required(&self, typ: u16) -> Result<&[u8]> {
        self.get(typ).ok_or(Error::MissingAttribute { id: typ })
    }

    pub fn optional(&self, typ: u16) -> Option<&[u8]> {
        self.get(typ)
    }

    fn fixed(val: &[u8], typ: u16, expected: usize) -> Result<&[u8]> {
        if val.len() != expected {
            return Err(Error::BadAttributeLength {
                id: typ,
                got: val.len(),
                expected,
            });
        }
        Ok(val)
    }

    pub fn required_u8(&self, typ: u16) -> Result<u8> {
        Ok(Self::fixed(self.required(typ)?, typ, 1)?[0])
    }

    pub fn optional_u8(&self, typ: u16) -> Result<Option<u8>> {
        match self.optional(typ) {
            None => Ok(None),
            Some(v) => Ok(Some(Self::fixed(v, typ, 1)?[0])),
        }
    }

    pub fn required_u16(&self, typ: u16) -> Result<u16> {
        let v = Self::fixed(self.required(typ)?, typ, 2)?;
        Ok(u16::from_ne_bytes([v[0], v[1]]))
    }

    pub fn optional_u16(&self, typ: u16) -> Result<Option<u16>> {
        match self.optional(typ) {
            None => Ok(None),
            Some(v) => {
                let v = Self::fixed(v, typ, 2)?;
                Ok(Some(u16::from_ne_bytes([v[0], v[1]])))
            }
        }
    }

    pub fn required_u32(&self, typ: u16) -> Result<u32> {
        let v = Self::fixed(self.required(typ)?, typ, 4)?;
        Ok(u32::from_ne_bytes([v[0], v[1], v[2], v[3]]))
    }

    pub fn optional_u32(&self, typ: u16) -> Result<Option<u32>> {
        match self.optional(typ) {
            None => Ok(None),
            Some(v) => {
                let v = Self::fixed(v, typ, 4)?;
                Ok(Some(u32::from_ne_bytes([v[0], v[1], v[2], v[3]])))
            }
        }
    }

    pub fn required_bytes(&self, typ: u16, len: usize) -> Result<&[u8]> {
        Self::fixed(self.required(typ)?, typ, len)
    }

    pub fn required_cstring(&self, typ: u16) -> Result<CString> {
        let val = self.required(typ)?;
        if val.last() != Some(&0) {
            return Err(Error::BadString { id: typ });
        }

        CString::from_vec_with_nul(val.to_vec()).map_err(|_| Error::BadString { id: typ })
    }

    /// Parses a nested-attribute region. `optional` controls whether a
    /// missing attribute is an error or yields `None`.
    pub fn nested(&self, typ: u16, optional: bool) -> Result<Option<Attrs>> {
        if optional {
            match self.optional(typ) {
                None => Ok(None),
                Some(bytes) => Ok(Some(parse_nested_attrs(bytes)?)),
            }
        } else {
            self.required_nested(typ).map(Some)
        }
    }

    /// Parses a required nested-attribute region, failing with
    /// [`Error::MissingAttribute`] rather than panicking if absent.
    pub fn required_nested(&self, typ: u16) -> Result<Attrs> {
        parse_nested_attrs(self.required(typ)?)
    }

    /// Parses a nested region preserving on-wire order, for the rare
    /// attribute types where order is semantically meaningful.
    pub fn ordered(&self, typ: u16) -> Result<Vec<OrderedAttr>> {
        let val = self.required(typ)?;
        let mut res = Vec::new();
        parse_attrs(val, |attr_type, value| {
            res.push(OrderedAttr {
                attr_type,
                value: value.to_vec(),
            })
        })?;
        Ok(res)
    }
}

/// Splits one received datagram into its successive netlink messages
/// (§4.4 `NextMessage`). A reply datagram may carry more than one
/// message (e.g. a batch of dump replies followed by `NLMSG_DONE`).
pub struct DatagramCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DatagramCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        DatagramCursor { data, pos: 0 }
    }

    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let avail = self.data.len().saturating_sub(self.pos);
        if avail == 0 {
            return Ok(None);
        }

        if avail < nl_size_of_aligned::<nlmsghdr>() {
            return Err(Error::Truncated);
        }

        let header: nlmsghdr = read_at(self.data, self.pos)?;
        if header.nlmsg_len as usize > avail {
            return Err(Error::Truncated);
        }

        let end = self.pos + header.nlmsg_len as usize;
        let bytes = self.data[self.pos..end].to_vec();
        // Round the outer cursor up to the next NLMSG_ALIGNTO boundary.
        self.pos = (end + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1);

        Ok(Some(Message::from_bytes(bytes)))
    }
}

/// True when a message's header type is the dump terminator.
pub fn is_done(header: &nlmsghdr) -> bool {
    header.nlmsg_type == NLMSG_DONE
}
