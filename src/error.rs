use thiserror::Error;

/// Every failure this crate can surface. Netlink transport failures,
/// attribute schema violations and flow-key codec failures all land
/// here rather than being swallowed or downcast at the call site.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::errno::Errno),

    #[error("netlink message truncated")]
    Truncated,

    #[error("netlink reply pid mismatch (got {got}, expected {expected})")]
    PidMismatch { got: u32, expected: u32 },

    #[error("wrong netlink peer pid (got {got}, expected {expected})")]
    PeerMismatch { got: u32, expected: u32 },

    #[error("netlink message has wrong type (got {got}, expected {expected})")]
    TypeMismatch { got: u16, expected: u16 },

    #[error("missing netlink attribute {id}")]
    MissingAttribute { id: u16 },

    #[error("attribute {id} has wrong length (got {got} bytes, expected {expected})")]
    BadAttributeLength { id: u16, got: usize, expected: usize },

    #[error("string attribute {id} is not nul-terminated")]
    BadString { id: u16 },

    #[error("unknown flow key type {type_id}")]
    UnknownFlowKey { type_id: u16 },

    #[error("flow key type {id} has non-zero mask without a value")]
    MaskWithoutKey { id: u16 },

    #[error("netlink error response: {0}")]
    Netlink(nix::errno::Errno),

    #[error("no such flow")]
    NoSuchFlow,

    #[error("netlink response message missing")]
    MissingReply,

    #[error("unexpected extra netlink message in datagram")]
    UnexpectedExtraMessage,

    #[error("unknown generic netlink family {0:?}")]
    UnknownFamily(String),

    #[error("netlink socket is closed")]
    Closed,

    #[error("wrong datapath ifindex in response (got {got}, expected {expected})")]
    WrongDatapath { got: i32, expected: i32 },

    #[error("datapath name {0:?} contains a NUL byte")]
    InvalidDatapathName(String),
}

pub type Result<T> = std::result::Result<T, Error>;
