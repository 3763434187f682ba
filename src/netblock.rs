//! IPv4 netblock arithmetic
//!
//! A netblock pairs an assigned address with its prefix length and can name
//! the other addresses that matter for a local server: the subnet, the
//! broadcast address, and arbitrary hosts inside the block.

use crate::error::{RouterError, RouterResult};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Netblock {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Netblock {
    /// Build a netblock from an assigned address and prefix length
    pub fn from_addr(addr: &str, prefix_len: u8) -> RouterResult<Self> {
        if prefix_len > 32 {
            return Err(RouterError::InvalidParameter(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| {
            RouterError::InvalidParameter(format!("invalid IPv4 address: {}", addr))
        })?;
        Ok(Self { addr, prefix_len })
    }

    fn netmask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len)
        }
    }

    fn network(&self) -> u32 {
        u32::from(self.addr) & self.netmask()
    }

    /// The assigned address, e.g. "192.168.0.254"
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// The assigned address in CIDR notation, e.g. "192.168.0.254/24"
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.addr, self.prefix_len)
    }

    /// The subnet in CIDR notation, e.g. "192.168.0.0/24"
    pub fn subnet(&self) -> String {
        format!("{}/{}", Ipv4Addr::from(self.network()), self.prefix_len)
    }

    /// Broadcast address of the block
    pub fn broadcast(&self) -> String {
        Ipv4Addr::from(self.network() | !self.netmask()).to_string()
    }

    /// Address of host |host| inside the block
    pub fn addr_in_block(&self, host: u8) -> String {
        Ipv4Addr::from(self.network() | u32::from(host)).to_string()
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }
}
