//! Netlink message builder (§4.3). Accumulates a message with a
//! 16-byte header, an optional generic-netlink sub-header, and a tree
//! of TLV attributes, back-patching lengths as nests close.

use std::ffi::CString;
use std::mem;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use nix::sys::socket::{sendto, MsgFlags, NetlinkAddr};

use super::bindings::{genlmsghdr, nl_align_length, nl_size_of_aligned, nlattr, nlmsghdr, NLA_F_NESTED};
use crate::error::{Error, Result};

/// Process-wide monotonically increasing sequence counter (§3, §9).
/// Never reused within a process lifetime; first assigned value is 1.
static NEXT_SEQ: AtomicU32 = AtomicU32::new(0);

fn next_seq() -> u32 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed) + 1
}

/// Marker trait for types that may be copied byte-for-byte into a
/// netlink buffer. Implementors must be `#[repr(C)]` (or a bare
/// integer, handled separately below) with no padding that would leak
/// uninitialized bytes onto the wire.
///
/// # Safety
/// Only implement for `#[repr(C)]` plain-old-data types.
pub unsafe trait ReprC {}
unsafe impl ReprC for nlattr {}
unsafe impl ReprC for genlmsghdr {}
unsafe impl ReprC for nlmsghdr {}
unsafe impl ReprC for super::bindings::ovs_header {}
unsafe impl ReprC for super::bindings::ovs_key_ethernet {}

/// A value that can be appended as an attribute payload.
pub trait ToAttr: Sized {
    fn serialize_at(self, out: &mut [u8], pos: usize) -> usize;
}

impl<T> ToAttr for T
where
    T: Sized + ReprC,
{
    fn serialize_at(self, out: &mut [u8], pos: usize) -> usize {
        let tlen = mem::size_of::<Self>();
        let buf =
            unsafe { std::slice::from_raw_parts((&self as *const T) as *const u8, tlen) };
        out[pos..pos + tlen].copy_from_slice(buf);
        nl_align_length(tlen)
    }
}

macro_rules! impl_to_attr_int {
    ($($t:ty),*) => {$(
        impl ToAttr for $t {
            fn serialize_at(self, out: &mut [u8], pos: usize) -> usize {
                let bytes = self.to_ne_bytes();
                out[pos..pos + bytes.len()].copy_from_slice(&bytes);
                nl_align_length(bytes.len())
            }
        }
    )*};
}

impl_to_attr_int!(u8, u16, u32, i32);

/// Operations shared by [`MsgBuilder`] and a nested [`NestBuilder`].
/// Every nested region is a scoped handle opened with
/// [`NlSerializer::attr_list_start`] and closed with
/// [`NestBuilder::attr_list_end`]; the parent's length is back-patched
/// only once the body is complete, and the region's own trailing
/// 4-byte padding is folded into that length (kernel requirement).
pub trait NlSerializer: Sized {
    /// Appends a fixed-size typed attribute.
    fn attr<T: ToAttr>(self, attr_type: u16, payload: T) -> Self;

    /// Appends a raw byte-slice attribute.
    fn attr_bytes(self, attr_type: u16, payload: &[u8]) -> Self;

    /// Appends an attribute with no payload (e.g. ACTIONS-empty, a
    /// flag attribute).
    fn attr_empty(self, attr_type: u16) -> Self {
        self.attr_bytes(attr_type, &[])
    }

    /// Appends a NUL-terminated string attribute.
    fn attr_cstr(self, attr_type: u16, value: &CString) -> Self {
        let bytes = value.as_bytes_with_nul();
        self.attr_bytes(attr_type, bytes)
    }

    #[doc(hidden)]
    fn pos(&self) -> usize;
    #[doc(hidden)]
    fn seek(&mut self, len: usize) {
        self.seek_to(self.pos() + len);
    }
    #[doc(hidden)]
    fn seek_to(&mut self, pos: usize);
    #[doc(hidden)]
    fn buffer(&mut self) -> &mut [u8];
    /// Grows the underlying storage so that at least `len` bytes are
    /// addressable, zero-filling the newly exposed region. A no-op if
    /// the buffer is already that long.
    #[doc(hidden)]
    fn ensure_len(&mut self, len: usize);

    /// Opens a nested-attribute region (§4.3 `PutNestedAttrs`).
    fn attr_list_start(mut self, attr_type: u16) -> NestBuilder<Self> {
        let start_pos = self.pos();
        self.ensure_len(start_pos + nl_size_of_aligned::<nlattr>());
        self.seek(nl_size_of_aligned::<nlattr>());
        NestBuilder {
            upper: self,
            start_pos,
            start_attr: nlattr {
                nla_len: 0, // patched in attr_list_end once the payload size is known
                nla_type: attr_type | NLA_F_NESTED,
            },
        }
    }

    #[doc(hidden)]
    fn write_obj_at<T: Sized + ReprC>(&mut self, payload: T, pos: usize) -> usize {
        self.ensure_len(pos + nl_size_of_aligned::<T>());
        let buf = unsafe {
            std::slice::from_raw_parts((&payload as *const T) as *const u8, mem::size_of::<T>())
        };
        self.buffer()[pos..pos + mem::size_of::<T>()].copy_from_slice(buf);
        pos + nl_size_of_aligned::<T>()
    }

    #[doc(hidden)]
    fn write_obj<T: Sized + ReprC>(&mut self, payload: T) {
        let new_pos = self.write_obj_at(payload, self.pos());
        self.seek_to(new_pos);
    }
}

/// A currently-open nested attribute region.
pub struct NestBuilder<U: NlSerializer> {
    upper: U,
    start_pos: usize,
    start_attr: nlattr,
}

impl<U: NlSerializer> NlSerializer for NestBuilder<U> {
    fn attr<T: ToAttr>(mut self, attr_type: u16, payload: T) -> Self {
        self.upper = self.upper.attr(attr_type, payload);
        self
    }

    fn attr_bytes(mut self, attr_type: u16, payload: &[u8]) -> Self {
        self.upper = self.upper.attr_bytes(attr_type, payload);
        self
    }

    fn pos(&self) -> usize {
        self.upper.pos()
    }

    fn seek_to(&mut self, pos: usize) {
        self.upper.seek_to(pos);
    }

    fn buffer(&mut self) -> &mut [u8] {
        self.upper.buffer()
    }

    fn ensure_len(&mut self, len: usize) {
        self.upper.ensure_len(len);
    }
}

impl<U: NlSerializer> NestBuilder<U> {
    /// Closes the nest, back-patching its length (including the
    /// trailing alignment padding counted inside the parent's Len)
    /// and returning the enclosing builder.
    pub fn attr_list_end(mut self) -> U {
        // Fold trailing alignment padding into the nest's own length,
        // per the kernel nlattr parser's expectations.
        let aligned_end = nl_align_length(self.pos() - self.start_pos) + self.start_pos;
        self.ensure_len(aligned_end);
        self.seek_to(aligned_end);
        self.start_attr.nla_len = (self.pos() - self.start_pos) as u16;
        let _ = self.write_obj_at(self.start_attr, self.start_pos);
        self.upper
    }
}

/// Netlink message builder (§4.3). All messages are built with the
/// `NLM_F_REQUEST` flag set; callers add `NLM_F_ECHO`/`NLM_F_DUMP` as
/// needed via [`MsgBuilder::echo`]/[`MsgBuilder::dump`].
///
/// `inner` grows geometrically as attributes are appended (mirroring
/// `odp.NlMsgBuilder`'s `expand`/`Grow`/`AlignGrow`): no request this
/// crate builds is bounded in size ahead of time, so no attribute
/// append can fail.
pub struct MsgBuilder {
    inner: Vec<u8>,
    header: nlmsghdr,
    pos: usize,
}

impl NlSerializer for MsgBuilder {
    fn attr<T: ToAttr>(mut self, attr_type: u16, payload: T) -> Self {
        let tlen = mem::size_of::<T>();
        let attr = nlattr {
            nla_len: nl_size_of_aligned::<nlattr>() as u16 + tlen as u16,
            nla_type: attr_type,
        };
        self.write_obj(attr);
        self.ensure_len(self.pos + nl_align_length(tlen));
        self.pos += payload.serialize_at(&mut self.inner, self.pos);
        self
    }

    fn attr_bytes(mut self, attr_type: u16, payload: &[u8]) -> Self {
        let attr = nlattr {
            nla_len: nl_size_of_aligned::<nlattr>() as u16 + payload.len() as u16,
            nla_type: attr_type,
        };
        self.write_obj(attr);
        self.ensure_len(self.pos + nl_align_length(payload.len()));
        self.inner[self.pos..self.pos + payload.len()].copy_from_slice(payload);
        self.pos += nl_align_length(payload.len());
        self
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek_to(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn buffer(&mut self) -> &mut [u8] {
        &mut self.inner
    }

    fn ensure_len(&mut self, len: usize) {
        if len <= self.inner.len() {
            return;
        }
        if len > self.inner.capacity() {
            let mut cap = (self.inner.capacity() + 1) * 3 / 2;
            while len > cap {
                cap = (cap + 1) * 3 / 2;
            }
            self.inner.reserve(cap - self.inner.len());
        }
        self.inner.resize(len, 0);
    }
}

impl MsgBuilder {
    /// Initializes a builder with the 16-byte header reserved and
    /// `NLM_F_REQUEST` set (§4.3 `New`).
    pub fn new(typ: u16) -> Self {
        use super::bindings::NLM_F_REQUEST;
        let hdr_len = nl_size_of_aligned::<nlmsghdr>();
        MsgBuilder {
            inner: vec![0u8; hdr_len],
            header: nlmsghdr::new(typ, NLM_F_REQUEST),
            pos: hdr_len,
        }
    }

    /// Appends the generic-netlink sub-header.
    pub fn generic(mut self, cmd: u8, version: u8) -> Self {
        let gen_header = genlmsghdr {
            cmd,
            version,
            reserved: 0,
        };
        self.write_obj(gen_header);
        self
    }

    /// Appends the OVS family sub-header that follows the
    /// genlmsghdr in every datapath/flow/vport/packet command.
    pub fn ovs_header(mut self, dp_ifindex: i32) -> Self {
        self.write_obj(super::bindings::ovs_header { dp_ifindex });
        self
    }

    /// Sets `NLM_F_ECHO`, forcing a reply from commands that would
    /// otherwise reply silently (§6).
    pub fn echo(mut self) -> Self {
        self.header.nlmsg_flags |= super::bindings::NLM_F_ECHO;
        self
    }

    /// Sets `NLM_F_DUMP`, requesting a multi-reply enumeration.
    pub fn dump(mut self) -> Self {
        self.header.nlmsg_flags |= super::bindings::NLM_F_DUMP;
        self
    }

    /// Finalizes the message: writes Len, assigns a fresh sequence
    /// number, and returns the finished bytes alongside that sequence
    /// number (§4.3 `Finish`).
    pub fn finish(mut self) -> (Vec<u8>, u32) {
        let seq = next_seq();
        self.header.nlmsg_seq = seq;
        self.header.nlmsg_len = self.pos as u32;
        let _ = self.write_obj_at(self.header, 0);
        // A closed nest's trailing alignment padding may have advanced
        // `pos` past the last byte actually written; back-fill it so
        // the returned buffer is exactly `pos` bytes long.
        self.ensure_len(self.pos);
        self.inner.truncate(self.pos);
        (self.inner, seq)
    }

    /// Finalizes and sends the message as one datagram to the kernel
    /// (destination port 0), returning the assigned sequence number.
    pub fn sendto<T: AsRawFd>(self, fd: &T) -> Result<u32> {
        let (bytes, seq) = self.finish();
        sendto(
            fd.as_raw_fd(),
            &bytes,
            &NetlinkAddr::new(0, 0),
            MsgFlags::empty(),
        )
        .map_err(Error::from)?;
        Ok(seq)
    }
}
