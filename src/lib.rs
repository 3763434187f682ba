//! routerctl - WiFi Test Router Control Library
//!
//! Async library for managing the lifecycle of wireless test infrastructure
//! on a remote Linux router:
//! - Access point daemons (hostapd): start, health-check, teardown
//! - Client-station associations (IBSS, managed, externally managed)
//! - Per-interface local DHCP servers (dnsmasq) with numbered subnets
//! - Wireless interface allocation
//!
//! All router interaction happens over a pluggable synchronous command
//! channel; SSH and local-shell transports are included.

pub mod error;
pub mod validation;
pub mod remote;
pub mod netblock;
pub mod interface;
pub mod hostapd;
pub mod station;
pub mod dhcp;
pub mod router;

// Re-export commonly used types
pub use error::{RouterError, RouterResult};
pub use remote::{
    CmdResult, LocalExecutor, RemoteExecutor, SshExecutor, DEFAULT_COMMAND_TIMEOUT,
};
pub use netblock::Netblock;
pub use interface::{InterfaceAllocator, StaticInterfaceAllocator, WlanDev, WlanMode};
pub use hostapd::{
    channel_for_frequency, frequency_for_channel, ApConfig, ApInstance, HostapdManager, HwMode,
    Security, STARTUP_FAILURE_PATTERN, STARTUP_SUCCESS_PATTERN,
};
pub use station::{StationInstance, StationKind, StationManager};
pub use dhcp::{gateway_address, peer_address, LocalServer, LocalServerPool, MAX_LOCAL_SERVERS};
pub use router::{FrameOptions, RouterSession, KNOWN_TEST_PREFIX};
