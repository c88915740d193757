//! Shoal file distribution protocol.
//! Host-driven: no I/O; the host owns sockets and timers and passes bytes and instants in.

pub mod discovery;
pub mod fragment;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transfer;

pub use discovery::{
    encode_peer_list, parse_peer_list, DiscoveryEncodeError, DiscoveryMessage,
    DiscoveryParseError, PeerAddr, REGISTRY_PORT,
};
pub use fragment::{FragmentSet, DEFAULT_FRAGMENT_SIZE};
pub use registry::{PeerRecord, PeerTable, DEFAULT_PEER_TIMEOUT, DEFAULT_SWEEP_INTERVAL};
pub use session::{FetchOutcome, FetchSession, SessionError, Slot};
pub use transfer::{TransferReply, TransferRequest, FRAGMENT_COUNT_CODE};
