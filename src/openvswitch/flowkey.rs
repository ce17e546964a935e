//! Flow-key codec (§4.6): the polymorphic, masked, optionally nested
//! flow-key data model and its bidirectional encode/decode against the
//! kernel's on-wire attribute tree.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::netlink::bindings::{
    ovs_key_ethernet, ETH_ALEN, OVS_FLOW_ATTR_ACTIONS, OVS_FLOW_ATTR_KEY, OVS_FLOW_ATTR_MASK,
    OVS_KEY_ATTR_ETHERNET, OVS_KEY_ATTR_ETHERTYPE, OVS_KEY_ATTR_IN_PORT, OVS_KEY_ATTR_PRIORITY,
    OVS_KEY_ATTR_SKB_MARK, OVS_KEY_ATTR_TUNNEL, OVS_TUNNEL_KEY_ATTR_TTL, SIZEOF_OVS_KEY_ETHERNET,
};
use crate::netlink::{Attrs, MsgBuilder, NlSerializer};

/// Opaque key+mask pair. Most flow keys can be handled this way;
/// avoiding a separate struct per attribute type avoids repetition.
/// Holds key and mask concatenated (`key_mask[..size]` is the key,
/// `key_mask[size..]` the mask), each `size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFlowKey {
    type_id: u16,
    size: usize,
    key_mask: Vec<u8>,
}

impl BlobFlowKey {
    /// Builds an exact-match key from raw bytes (used by the typed
    /// per-attribute constructors below; no raw pointer into the blob
    /// ever escapes to callers).
    fn exact(type_id: u16, key: &[u8]) -> Self {
        let size = key.len();
        let mut key_mask = Vec::with_capacity(size * 2);
        key_mask.extend_from_slice(key);
        key_mask.extend(std::iter::repeat(0xffu8).take(size));
        BlobFlowKey {
            type_id,
            size,
            key_mask,
        }
    }

    fn key(&self) -> &[u8] {
        &self.key_mask[..self.size]
    }

    fn mask(&self) -> &[u8] {
        &self.key_mask[self.size..]
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn encode_key<B: NlSerializer>(&self, builder: B) -> B {
        builder.attr_bytes(self.type_id, self.key())
    }

    pub fn encode_mask<B: NlSerializer>(&self, builder: B) -> B {
        builder.attr_bytes(self.type_id, self.mask())
    }

    pub fn ignored(&self) -> bool {
        self.mask().iter().all(|&b| b == 0)
    }

    pub fn equals(&self, other: &BlobFlowKey) -> bool {
        if self.size != other.size {
            return false;
        }

        let (ak, am) = (self.key(), self.mask());
        let (bk, bm) = (other.key(), other.mask());
        for i in 0..self.size {
            if am[i] != bm[i] || ((ak[i] ^ bk[i]) & am[i]) != 0 {
                return false;
            }
        }

        true
    }
}

fn exact_mask(size: usize) -> Vec<u8> {
    vec![0xff; size]
}

fn ignore_mask(size: usize) -> Vec<u8> {
    vec![0x00; size]
}

fn parse_blob_flow_key(
    type_id: u16,
    key: Option<&[u8]>,
    mask: Option<&[u8]>,
    size: usize,
) -> Result<BlobFlowKey> {
    let mask_bytes: Vec<u8> = match mask {
        Some(m) => {
            if m.len() != size {
                return Err(Error::BadAttributeLength {
                    id: type_id,
                    got: m.len(),
                    expected: size,
                });
            }
            m.to_vec()
        }
        // "OVS_FLOW_ATTR_MASK: ... Omitting attribute is treated as
        // wildcarding all corresponding fields."
        None => ignore_mask(size),
    };

    let key_bytes: Vec<u8> = match key {
        Some(k) => {
            if k.len() != size {
                return Err(Error::BadAttributeLength {
                    id: type_id,
                    got: k.len(),
                    expected: size,
                });
            }
            k.to_vec()
        }
        None => {
            // The kernel does produce masks without a corresponding
            // key; in that case the mask must show the key is
            // ignored.
            if mask_bytes.iter().any(|&b| b != 0) {
                return Err(Error::MaskWithoutKey { id: type_id });
            }
            ignore_mask(size)
        }
    };

    let mut key_mask = key_bytes;
    key_mask.extend(mask_bytes);
    Ok(BlobFlowKey {
        type_id,
        size,
        key_mask,
    })
}

/// `OVS_KEY_ATTR_IN_PORT`: incoming port number.
///
/// Problematic: the kernel always does an exact match for IN_PORT
/// (treats the mask as `0xffffffff` whenever the key is set at all),
/// and when reporting the mask back it always sets the upper bits
/// regardless of whether IN_PORT was actually matched (port numbers
/// are 16 bits in the kernel, but the attribute is 32-bit). So any
/// reported mask other than all-`0xff` is taken to mean "ignored".
fn parse_in_port_flow_key(
    type_id: u16,
    key: Option<&[u8]>,
    mask: Option<&[u8]>,
) -> Result<BlobFlowKey> {
    let rewritten;
    let mask = match mask {
        Some(m) if m.len() == 4 && m.iter().all(|&b| b == 0xff) => Some(m),
        Some(m) => {
            rewritten = vec![0u8; m.len()];
            Some(rewritten.as_slice())
        }
        None => None,
    };

    parse_blob_flow_key(type_id, key, mask, 4)
}

/// Nested, recursive flow key (`OVS_KEY_ATTR_TUNNEL`): a set of
/// sub-attributes sharing the same [`FlowKeys`] machinery as the
/// top-level key, parameterized over a non-recursive sub-attribute
/// table (currently just TTL) to avoid infinite recursion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelFlowKey {
    pub subkeys: FlowKeys,
}

impl TunnelFlowKey {
    pub fn type_id(&self) -> u16 {
        OVS_KEY_ATTR_TUNNEL
    }

    pub fn ignored(&self) -> bool {
        self.subkeys.ignored()
    }

    pub fn equals(&self, other: &TunnelFlowKey) -> bool {
        self.subkeys.equals(&other.subkeys)
    }
}

/// A flow key, tagged by variant (§3). `InPort` shares `BlobFlowKey`'s
/// shape but carries the kernel quirk at parse time (§4.6), so it is
/// kept as its own variant for clarity at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowKey {
    Blob(BlobFlowKey),
    InPort(BlobFlowKey),
    Tunnel(TunnelFlowKey),
}

impl FlowKey {
    pub fn type_id(&self) -> u16 {
        match self {
            FlowKey::Blob(b) | FlowKey::InPort(b) => b.type_id(),
            FlowKey::Tunnel(t) => t.type_id(),
        }
    }

    pub fn ignored(&self) -> bool {
        match self {
            FlowKey::Blob(b) | FlowKey::InPort(b) => b.ignored(),
            FlowKey::Tunnel(t) => t.ignored(),
        }
    }

    fn encode_key<B: NlSerializer>(&self, builder: B) -> B {
        match self {
            FlowKey::Blob(b) | FlowKey::InPort(b) => b.encode_key(builder),
            FlowKey::Tunnel(t) => t.subkeys.to_key_attrs(builder, OVS_KEY_ATTR_TUNNEL),
        }
    }

    fn encode_mask<B: NlSerializer>(&self, builder: B) -> B {
        match self {
            FlowKey::Blob(b) | FlowKey::InPort(b) => b.encode_mask(builder),
            FlowKey::Tunnel(t) => t.subkeys.to_mask_attrs(builder, OVS_KEY_ATTR_TUNNEL),
        }
    }

    pub fn equals(&self, other: &FlowKey) -> bool {
        match (self, other) {
            (FlowKey::Blob(a), FlowKey::Blob(b)) => a.equals(b),
            (FlowKey::InPort(a), FlowKey::InPort(b)) => a.equals(b),
            (FlowKey::Tunnel(a), FlowKey::Tunnel(b)) => a.equals(b),
            _ => false,
        }
    }
}

/// `OVS_KEY_ATTR_ETHERNET`: typed constructor serializing fields
/// directly into the blob, replacing the teacher source's raw pointer
/// into the key bytes (§9 design notes).
pub fn new_ethernet_flow_key(src: [u8; ETH_ALEN], dst: [u8; ETH_ALEN]) -> FlowKey {
    let key = ovs_key_ethernet {
        eth_src: src,
        eth_dst: dst,
    };
    let bytes = unsafe {
        std::slice::from_raw_parts(
            (&key as *const ovs_key_ethernet) as *const u8,
            SIZEOF_OVS_KEY_ETHERNET,
        )
    };
    FlowKey::Blob(BlobFlowKey::exact(OVS_KEY_ATTR_ETHERNET, bytes))
}

/// `OVS_KEY_ATTR_PRIORITY`: packet QoS priority.
pub fn new_priority_flow_key(priority: u32) -> FlowKey {
    FlowKey::Blob(BlobFlowKey::exact(
        OVS_KEY_ATTR_PRIORITY,
        &priority.to_ne_bytes(),
    ))
}

/// `OVS_KEY_ATTR_ETHERTYPE`: Ethernet frame type, network byte order.
pub fn new_ethertype_flow_key(ethertype: u16) -> FlowKey {
    FlowKey::Blob(BlobFlowKey::exact(
        OVS_KEY_ATTR_ETHERTYPE,
        &ethertype.to_be_bytes(),
    ))
}

/// `OVS_KEY_ATTR_SKB_MARK`: packet mark.
pub fn new_skb_mark_flow_key(mark: u32) -> FlowKey {
    FlowKey::Blob(BlobFlowKey::exact(OVS_KEY_ATTR_SKB_MARK, &mark.to_ne_bytes()))
}

/// `OVS_KEY_ATTR_IN_PORT`: incoming port number.
pub fn new_in_port_flow_key(port: u32) -> FlowKey {
    FlowKey::InPort(BlobFlowKey::exact(OVS_KEY_ATTR_IN_PORT, &port.to_ne_bytes()))
}

/// Describes how to parse a flow key of a particular type from a
/// netlink message (§4.6). `key` may be absent, which generally means
/// the mask indicates the flow key is ignored.
pub struct FlowKeyParser {
    parse: Box<dyn Fn(u16, Option<&[u8]>, Option<&[u8]>) -> Result<FlowKey> + Send + Sync>,
    exact_mask: Option<Vec<u8>>,
    ignore_mask: Option<Vec<u8>>,
}

pub type FlowKeyParsers = HashMap<u16, FlowKeyParser>;

fn blob_parser(size: usize) -> FlowKeyParser {
    FlowKeyParser {
        parse: Box::new(move |typ, key, mask| {
            Ok(FlowKey::Blob(parse_blob_flow_key(typ, key, mask, size)?))
        }),
        exact_mask: Some(exact_mask(size)),
        ignore_mask: Some(ignore_mask(size)),
    }
}

fn tunnel_parser() -> FlowKeyParser {
    FlowKeyParser {
        parse: Box::new(|_typ, key, mask| {
            let keys = match key {
                Some(k) => crate::netlink::parser::parse_nested_attrs(k)?,
                None => Attrs::default(),
            };
            let masks = match mask {
                Some(m) => crate::netlink::parser::parse_nested_attrs(m)?,
                None => Attrs::default(),
            };

            let subkeys = parse_flow_keys(&keys, Some(&masks), &tunnel_subkey_parsers())?;
            Ok(FlowKey::Tunnel(TunnelFlowKey { subkeys }))
        }),
        exact_mask: None,
        ignore_mask: Some(Vec::new()),
    }
}

/// Registered top-level flow key types (§4.6). Adding a new type is a
/// single table entry.
pub fn flow_key_parsers() -> FlowKeyParsers {
    let mut m: FlowKeyParsers = HashMap::new();
    m.insert(OVS_KEY_ATTR_PRIORITY, blob_parser(4));
    m.insert(
        OVS_KEY_ATTR_IN_PORT,
        FlowKeyParser {
            parse: Box::new(|typ, key, mask| Ok(FlowKey::InPort(parse_in_port_flow_key(typ, key, mask)?))),
            exact_mask: Some(vec![0xff, 0xff, 0xff, 0xff]),
            ignore_mask: Some(vec![0, 0, 0, 0]),
        },
    );
    m.insert(OVS_KEY_ATTR_ETHERNET, blob_parser(SIZEOF_OVS_KEY_ETHERNET));
    m.insert(OVS_KEY_ATTR_ETHERTYPE, blob_parser(2));
    m.insert(OVS_KEY_ATTR_SKB_MARK, blob_parser(4));
    m.insert(OVS_KEY_ATTR_TUNNEL, tunnel_parser());
    m
}

/// Sub-attribute table used inside a tunnel key. Constrained to
/// non-recursive variants to avoid infinite recursion (§9).
fn tunnel_subkey_parsers() -> FlowKeyParsers {
    let mut m: FlowKeyParsers = HashMap::new();
    m.insert(OVS_TUNNEL_KEY_ATTR_TTL, blob_parser(1));
    m
}

/// Parses a KEY attribute mapping (required) and an optional MASK
/// mapping into a [`FlowKeys`] (§4.6 "Parsing").
pub fn parse_flow_keys(
    keys: &Attrs,
    masks: Option<&Attrs>,
    parsers: &FlowKeyParsers,
) -> Result<FlowKeys> {
    let mut res = HashMap::new();

    for (typ, key) in keys.iter() {
        let parser = parsers
            .get(&typ)
            .ok_or(Error::UnknownFlowKey { type_id: typ })?;

        let mask: Option<&[u8]> = match masks {
            // "OVS_FLOW_ATTR_MASK: ... If not present, all flow key
            // bits are exact match bits."
            None => parser.exact_mask.as_deref(),
            // "Omitting attribute is treated as wildcarding all
            // corresponding fields."
            Some(masks) => masks.optional(typ).or(parser.ignore_mask.as_deref()),
        };

        res.insert(typ, (parser.parse)(typ, Some(key), mask)?);
    }

    if let Some(masks) = masks {
        for (typ, mask) in masks.iter() {
            if keys.contains(typ) {
                continue;
            }

            let parser = parsers
                .get(&typ)
                .ok_or(Error::UnknownFlowKey { type_id: typ })?;
            res.insert(typ, (parser.parse)(typ, None, Some(mask))?);
        }
    }

    Ok(FlowKeys(res))
}

/// A mapping from attribute-type id to [`FlowKey`]; each type appears
/// at most once (§3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowKeys(HashMap<u16, FlowKey>);

impl FlowKeys {
    pub fn new() -> Self {
        FlowKeys(HashMap::new())
    }

    pub fn insert(&mut self, key: FlowKey) {
        self.0.insert(key.type_id(), key);
    }

    pub fn get(&self, type_id: u16) -> Option<&FlowKey> {
        self.0.get(&type_id)
    }

    pub fn ignored(&self) -> bool {
        self.0.values().all(|k| k.ignored())
    }

    /// Equality per §3: for every type present in either side, the
    /// value bits masked by the intersection of masks agree and the
    /// masks agree; a missing entry on one side matches an "ignored"
    /// entry on the other.
    pub fn equals(&self, other: &FlowKeys) -> bool {
        for (id, ak) in &self.0 {
            match other.0.get(id) {
                Some(bk) => {
                    if !ak.equals(bk) {
                        return false;
                    }
                }
                None => {
                    if !ak.ignored() {
                        return false;
                    }
                }
            }
        }

        for (id, bk) in &other.0 {
            if !self.0.contains_key(id) && !bk.ignored() {
                return false;
            }
        }

        true
    }

    fn to_key_attrs<B: NlSerializer>(&self, builder: B, typ: u16) -> B {
        let mut nest = builder.attr_list_start(typ);
        for k in self.0.values() {
            if !k.ignored() {
                nest = k.encode_key(nest);
            }
        }
        nest.attr_list_end()
    }

    fn to_mask_attrs<B: NlSerializer>(&self, builder: B, typ: u16) -> B {
        let mut nest = builder.attr_list_start(typ);
        for k in self.0.values() {
            if !k.ignored() {
                nest = k.encode_mask(nest);
            }
        }
        nest.attr_list_end()
    }
}

/// One installable rule: a match key, an (implicit) mask, and actions.
/// Actions are modeled as an empty nested attribute, since the kernel
/// requires the attribute to exist; real action encoding is not in
/// scope (§9 open question (c)).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowSpec {
    pub keys: FlowKeys,
}

impl FlowSpec {
    pub fn new() -> Self {
        FlowSpec {
            keys: FlowKeys::new(),
        }
    }

    pub fn add_key(&mut self, key: FlowKey) {
        self.keys.insert(key);
    }

    pub fn equals(&self, other: &FlowSpec) -> bool {
        self.keys.equals(&other.keys)
    }

    /// Emits the KEY, MASK and ACTIONS attributes under a FLOW command
    /// payload (§4.6 "Encoding a FlowSpec"). ACTIONS is left empty:
    /// action encoding is out of scope (§9 open question (c)), but the
    /// kernel requires the attribute to be present.
    pub fn encode(&self, builder: MsgBuilder) -> MsgBuilder {
        let builder = self.keys.to_key_attrs(builder, OVS_FLOW_ATTR_KEY);
        let builder = self.keys.to_mask_attrs(builder, OVS_FLOW_ATTR_MASK);
        builder
            .attr_list_start(OVS_FLOW_ATTR_ACTIONS)
            .attr_list_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_equals_respects_mask() {
        let a = new_priority_flow_key(0x1234);
        let b = new_priority_flow_key(0x1234);
        assert!(a.equals(&b));

        let c = new_priority_flow_key(0x9999);
        assert!(!a.equals(&c));
    }

    #[test]
    fn in_port_quirk_rewrites_partial_mask_to_ignored() {
        let parsers = flow_key_parsers();
        let parser = parsers.get(&OVS_KEY_ATTR_IN_PORT).unwrap();
        let key = 7u32.to_ne_bytes();
        let partial_mask = [0xff, 0xff, 0x00, 0x00];
        let parsed = (parser.parse)(OVS_KEY_ATTR_IN_PORT, Some(&key), Some(&partial_mask)).unwrap();
        assert!(parsed.ignored());
    }

    #[test]
    fn mask_without_key_must_be_zero() {
        let err = parse_blob_flow_key(OVS_KEY_ATTR_PRIORITY, None, Some(&[1, 0, 0, 0]), 4)
            .unwrap_err();
        assert!(matches!(err, Error::MaskWithoutKey { id } if id == OVS_KEY_ATTR_PRIORITY));

        let ok = parse_blob_flow_key(OVS_KEY_ATTR_PRIORITY, None, Some(&[0, 0, 0, 0]), 4).unwrap();
        assert!(ok.ignored());
    }

    #[test]
    fn flow_keys_equals_treats_absent_as_ignored() {
        let mut a = FlowKeys::new();
        a.insert(new_priority_flow_key(5));
        let b = FlowKeys::new();

        // `a` has a real (exact-match) priority key that `b` lacks;
        // not equal, since `a`'s key is not ignored.
        assert!(!a.equals(&b));
        assert!(b.equals(&FlowKeys::new()));
    }

    #[test]
    fn flow_spec_equals_is_reflexive_and_symmetric() {
        let mut spec = FlowSpec::new();
        spec.add_key(new_in_port_flow_key(1));
        spec.add_key(new_ethertype_flow_key(0x0800));

        let mut other = FlowSpec::new();
        other.add_key(new_ethertype_flow_key(0x0800));
        other.add_key(new_in_port_flow_key(1));

        assert!(spec.equals(&spec));
        assert!(spec.equals(&other));
        assert!(other.equals(&spec));
    }
}
