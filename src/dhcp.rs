//! Local DHCP servers via dnsmasq
//!
//! Each configured network gets a numbered /24 out of 192.168.0.0/16, a
//! static gateway address on the interface, and a dnsmasq instance bound to
//! that interface only.

use crate::error::{RouterError, RouterResult};
use crate::netblock::Netblock;
use crate::remote::{kill_process_instance, RemoteExecutor, DEFAULT_COMMAND_TIMEOUT};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One reserved octet per instance, so 256 blocks total
pub const MAX_LOCAL_SERVERS: usize = 256;

const SUBNET_PREFIX_OCTETS: (u8, u8) = (192, 168);
const DHCP_LOW: u8 = 1;
const DHCP_HIGH: u8 = 128;
const CMD_DNSMASQ: &str = "dnsmasq";

fn dhcpd_conf_file(interface: &str) -> String {
    format!("/tmp/dhcpd.{}.conf", interface)
}

fn dhcpd_lease_file(interface: &str) -> String {
    format!("/tmp/dhcpd.{}.leases", interface)
}

/// Gateway address for the local server at |index|, e.g. 192.168.0.254
pub fn gateway_address(index: usize) -> String {
    format!(
        "{}.{}.{}.254",
        SUBNET_PREFIX_OCTETS.0, SUBNET_PREFIX_OCTETS.1, index
    )
}

/// Address reserved for a locally associated peer, e.g. 192.168.0.253
pub fn peer_address(index: usize) -> String {
    format!(
        "{}.{}.{}.253",
        SUBNET_PREFIX_OCTETS.0, SUBNET_PREFIX_OCTETS.1, index
    )
}

/// A DHCP server plus static addressing for one interface's subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalServer {
    pub index: usize,
    pub netblock: Netblock,
    pub dhcp_low: String,
    pub dhcp_high: String,
    pub interface: String,
}

impl LocalServer {
    /// Arguments for `ip addr add`/`ip addr del` on this server's interface
    pub fn ip_params(&self) -> String {
        format!(
            "{} broadcast {} dev {}",
            self.netblock.cidr(),
            self.netblock.broadcast(),
            self.interface
        )
    }
}

pub(crate) fn render_dhcp_conf(server: &LocalServer) -> String {
    [
        "port=0".to_string(), // disables the DNS responder
        "bind-interfaces".to_string(),
        "log-dhcp".to_string(),
        format!("dhcp-range={},{}", server.dhcp_low, server.dhcp_high),
        format!("interface={}", server.interface),
        format!("dhcp-leasefile={}", dhcpd_lease_file(&server.interface)),
    ]
    .join("\n")
}

/// Allocates and releases numbered subnets and their DHCP servers
///
/// Indices are positional: the subnet for a new allocation is derived from
/// the current active count, and releasing a server re-indexes the ones
/// behind it.  Callers must key off current list position, never a remembered
/// index.
pub struct LocalServerPool {
    executor: Arc<dyn RemoteExecutor>,
    servers: Vec<LocalServer>,
}

impl LocalServerPool {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            servers: Vec::new(),
        }
    }

    pub fn servers(&self) -> &[LocalServer] {
        &self.servers
    }

    /// Bring up addressing and a DHCP server on |interface|
    pub async fn allocate(&mut self, interface: &str) -> RouterResult<LocalServer> {
        validation::validate_interface_name(interface)?;

        if self.servers.len() >= MAX_LOCAL_SERVERS {
            return Err(RouterError::ResourceExhausted(
                "exhausted available local servers".to_string(),
            ));
        }

        let index = self.servers.len();
        info!("starting local server {} on {}", index, interface);

        let netblock = Netblock::from_addr(&gateway_address(index), 24)?;
        let server = LocalServer {
            index,
            dhcp_low: netblock.addr_in_block(DHCP_LOW),
            dhcp_high: netblock.addr_in_block(DHCP_HIGH),
            interface: interface.to_string(),
            netblock,
        };
        self.servers.push(server.clone());

        let e = self.executor.as_ref();
        e.run(
            &format!("ip addr flush {}", interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!("ip addr add {}", server.ip_params()),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!("ip link set {} up", interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        self.start_dhcp_server(interface).await?;

        Ok(server)
    }

    /// Write the dnsmasq config for |interface| and launch the daemon
    pub async fn start_dhcp_server(&self, interface: &str) -> RouterResult<()> {
        let server = self
            .servers
            .iter()
            .find(|s| s.interface == interface)
            .ok_or_else(|| {
                RouterError::NotConfigured(format!(
                    "no local server to match interface: {}",
                    interface
                ))
            })?;

        let conf_file = dhcpd_conf_file(interface);
        let conf = render_dhcp_conf(server);
        let e = self.executor.as_ref();
        e.run(
            &format!("cat <<EOF >{}\n{}\nEOF\n", conf_file, conf),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!("{} --conf-file={}", CMD_DNSMASQ, conf_file),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        Ok(())
    }

    /// Tear down every server bound to |interface|
    pub async fn release_for_interface(&mut self, interface: &str) {
        let mut removed = Vec::new();
        self.servers.retain(|s| {
            if s.interface == interface {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        for server in &removed {
            self.teardown_server(server).await;
        }
    }

    /// Tear down every active server
    pub async fn release_all(&mut self) {
        let servers = std::mem::take(&mut self.servers);
        for server in &servers {
            self.teardown_server(server).await;
        }
    }

    /// Kill every dnsmasq on the router, tracked or not
    pub async fn stop_all(&self) {
        kill_process_instance(self.executor.as_ref(), "dnsmasq", None, Duration::ZERO).await;
    }

    // The interface or process may already be gone by the time we get here;
    // nothing on this path is allowed to abort the rest of the teardown.
    async fn teardown_server(&self, server: &LocalServer) {
        kill_process_instance(
            self.executor.as_ref(),
            "dnsmasq",
            Some(&server.interface),
            Duration::ZERO,
        )
        .await;

        if let Err(e) = self
            .executor
            .run(
                &format!("ip addr del {}", server.ip_params()),
                DEFAULT_COMMAND_TIMEOUT,
                true,
            )
            .await
        {
            warn!(
                "failed to remove address from {}: {}",
                server.interface, e
            );
        }
    }
}
