//! Generic netlink transport: wire framing, the socket, the message
//! builder/parser, and the request engine (§4.1–§4.5).

pub mod bindings;
pub mod builder;
pub mod genl;
pub mod parser;
pub mod request;
pub mod socket;

pub use bindings::{nl_align_length, nl_size_of_aligned};
pub use builder::{MsgBuilder, NestBuilder, NlSerializer};
pub use parser::{Attrs, DatagramCursor, HeaderOutcome, Message, OrderedAttr};
pub use request::{request, request_multi};
pub use socket::NetlinkSocket;
