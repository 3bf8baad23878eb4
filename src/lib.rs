//! Core of an IPv4 DHCP client: the per-interface protocol state machine
//! that acquires, maintains, renews, releases, and declines leases per
//! RFC 2131/2132, and the lease journal that makes that state durable
//! across restarts.
//!
//! Out of scope, treated as collaborators this crate only describes the
//! interface to: command-line parsing and daemonization beyond the handful
//! of flags the state machine itself reads, the configuration-file parser,
//! interface discovery (raw-socket/BPF setup), DNS update, the management
//! channel, and the DHCPv6 / DHCPv4-over-DHCPv6 path.

#[macro_use]
mod macros;

pub mod clock;
pub mod client;
pub mod dispatcher;
pub mod duid;
pub mod error;
pub mod interface;
pub mod journal;
pub mod lease;
pub mod options;
pub mod packet;
pub mod runtime;
pub mod script;
pub mod socket;
pub mod timer;

pub use client::{Client, ClientConfig, ClientState};
pub use error::CoreError;
pub use interface::{Interface, InterfaceFlags};
pub use packet::{DhcpMessageType, OptionCode, Packet};
pub use runtime::Runtime;
