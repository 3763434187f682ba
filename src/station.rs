//! Client-station associations
//!
//! Joins IBSS networks directly through iw and runs a full wpa_supplicant
//! for managed associations, so the connected peer supports the same
//! advanced features a real client would.

use crate::error::{RouterError, RouterResult};
use crate::hostapd::{frequency_for_channel, ApInstance, HOSTAPD_DRIVER};
use crate::interface::{InterfaceAllocator, WlanMode};
use crate::remote::{kill_process_instance, RemoteExecutor, DEFAULT_COMMAND_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

const CMD_WPA_SUPPLICANT: &str = "/usr/sbin/wpa_supplicant";
const LINK_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn station_path(interface: &str, ext: &str) -> String {
    format!("/tmp/wpa-supplicant-test-{}.{}", interface, ext)
}

/// How a station instance is associated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationKind {
    Ibss,
    Managed,
    /// Associated by something outside this session; we only disconnect it
    External,
}

/// One client-mode wireless association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationInstance {
    pub ssid: String,
    pub interface: String,
    pub kind: StationKind,
}

/// Joins and leaves client-station associations
pub struct StationManager {
    executor: Arc<dyn RemoteExecutor>,
}

impl StationManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Bring up an interface and join an IBSS network on it
    pub async fn join_ibss(
        &self,
        ssid: &str,
        frequency: u32,
        allocator: &mut dyn InterfaceAllocator,
    ) -> RouterResult<StationInstance> {
        let interface = allocator.get_interface(frequency, WlanMode::Ibss)?;
        match self.join_ibss_on(&interface, ssid, frequency).await {
            Ok(()) => Ok(StationInstance {
                ssid: ssid.to_string(),
                interface,
                kind: StationKind::Ibss,
            }),
            Err(e) => {
                allocator.release(&interface);
                Err(e)
            }
        }
    }

    async fn join_ibss_on(&self, interface: &str, ssid: &str, frequency: u32) -> RouterResult<()> {
        let e = self.executor.as_ref();
        e.run(
            &format!("ip link set {} up", interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!("iw dev {} ibss join {} {}", interface, ssid, frequency),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        Ok(())
    }

    /// Connect a wpa_supplicant-backed client to a running AP instance
    ///
    /// The station lands on the same broadcast segment as the AP, so kernel
    /// reverse-path filtering and ARP replies have to be relaxed on both
    /// interfaces or the two would answer for each other's addresses.
    pub async fn connect_managed(
        &self,
        target: &ApInstance,
        peer_address: &str,
        allocator: &mut dyn InterfaceAllocator,
    ) -> RouterResult<StationInstance> {
        let channel: u16 = target
            .param("channel")
            .ok_or_else(|| {
                RouterError::ParseError("AP instance has no channel parameter".to_string())
            })?
            .parse()
            .map_err(|_| RouterError::ParseError("invalid channel parameter".to_string()))?;
        let frequency = frequency_for_channel(channel).ok_or_else(|| {
            RouterError::InvalidParameter(format!("invalid channel: {}", channel))
        })?;

        let interface = allocator.get_interface(frequency, WlanMode::Managed)?;
        match self.connect_managed_on(&interface, target, peer_address).await {
            Ok(()) => Ok(StationInstance {
                ssid: target.ssid.clone(),
                interface,
                kind: StationKind::Managed,
            }),
            Err(e) => {
                allocator.release(&interface);
                Err(e)
            }
        }
    }

    async fn connect_managed_on(
        &self,
        interface: &str,
        target: &ApInstance,
        peer_address: &str,
    ) -> RouterResult<()> {
        let conf_file = station_path(interface, "conf");
        let log_file = station_path(interface, "log");
        let pid_file = station_path(interface, "pid");

        let supplicant_config = format!(
            "network={{\n  ssid=\"{}\"\n  key_mgmt=NONE\n}}\n",
            target.ssid
        );

        let e = self.executor.as_ref();
        e.run(
            &format!("cat <<EOF >{}\n{}\nEOF\n", conf_file, supplicant_config),
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
        e.run(
            &format!(
                "{} -dd -t -i{} -P{} -c{} -D{} &> {} &",
                CMD_WPA_SUPPLICANT, interface, pid_file, conf_file, HOSTAPD_DRIVER, log_file
            ),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;

        self.wait_for_link(interface).await?;

        e.run(
            &format!("ip addr add {}/24 dev {}", peer_address, interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;

        e.run(
            &format!("echo 2 > /proc/sys/net/ipv4/conf/{}/rp_filter", interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!("echo 1 > /proc/sys/net/ipv4/conf/{}/arp_ignore", interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        e.run(
            &format!(
                "echo 1 > /proc/sys/net/ipv4/conf/{}/arp_ignore",
                target.interface
            ),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;

        Ok(())
    }

    // No upper bound on the wait; interrupting a join that never completes
    // is the caller's call.
    async fn wait_for_link(&self, interface: &str) -> RouterResult<()> {
        info!("waiting for {} to associate", interface);
        loop {
            let result = self
                .executor
                .run(
                    &format!("iw dev {} link", interface),
                    DEFAULT_COMMAND_TIMEOUT,
                    true,
                )
                .await?;
            if result.stdout.contains("Connected to") {
                return Ok(());
            }
            sleep(LINK_POLL_INTERVAL).await;
        }
    }

    /// Tear down an association and bring its link down
    pub async fn leave(&self, instance: &StationInstance) -> RouterResult<()> {
        let e = self.executor.as_ref();
        match instance.kind {
            StationKind::Ibss => {
                e.run(
                    &format!("iw dev {} ibss leave", instance.interface),
                    DEFAULT_COMMAND_TIMEOUT,
                    false,
                )
                .await?;
            }
            StationKind::Managed => {
                kill_process_instance(
                    e,
                    "wpa_supplicant",
                    Some(&instance.interface),
                    Duration::ZERO,
                )
                .await;
            }
            StationKind::External => {
                e.run(
                    &format!("iw dev {} disconnect", instance.interface),
                    DEFAULT_COMMAND_TIMEOUT,
                    false,
                )
                .await?;
            }
        }

        e.run(
            &format!("ip link set {} down", instance.interface),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;
        Ok(())
    }
}
