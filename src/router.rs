//! Router session lifecycle control
//!
//! A [`RouterSession`] owns every AP instance, station instance, and local
//! server on one router and sequences their lifecycles: configure brings up
//! hostapd plus a local DHCP server, deconfig unwinds them in the order that
//! keeps the host clean (addresses before daemons, daemons before
//! interfaces).  Operations are strictly sequential; the session must not be
//! shared across concurrent callers.

use crate::dhcp::{self, LocalServer, LocalServerPool};
use crate::error::{RouterError, RouterResult};
use crate::hostapd::{
    frequency_for_channel, ApConfig, ApInstance, HostapdManager, CMD_HOSTAPD_CLI,
};
use crate::interface::{InterfaceAllocator, WlanMode};
use crate::remote::{RemoteExecutor, DEFAULT_COMMAND_TIMEOUT};
use crate::station::{StationInstance, StationManager};
use crate::validation;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Test names commonly begin with this uninteresting prefix; strip it so the
/// SSID keeps more unique bytes.
pub const KNOWN_TEST_PREFIX: &str = "network_WiFi";

const SUFFIX_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SSID_MAX_LEN: usize = 32;

const CMD_SEND_MGMT_FRAME: &str = "/usr/bin/send_management_frame";
const MGMT_FRAME_SENDER_LOG_FILE: &str = "/tmp/send_management_frame-test.log";

/// Optional knobs for the management-frame sender
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameOptions {
    pub ssid_prefix: Option<String>,
    pub num_bss: Option<u32>,
    pub frame_count: Option<u32>,
    pub delay_ms: Option<u32>,
}

pub(crate) fn derive_ssid_prefix(test_name: &str) -> String {
    let stripped = test_name.strip_prefix(KNOWN_TEST_PREFIX).unwrap_or(test_name);
    let mut prefix = stripped.trim_start_matches('_').to_string();
    prefix.push('_');
    prefix
}

pub(crate) fn build_ssid_from(prefix: &str, suffix: &str) -> String {
    let mut rng = rand::thread_rng();
    let salt: String = (0..5)
        .map(|_| SUFFIX_LETTERS[rng.gen_range(0..SUFFIX_LETTERS.len())] as char)
        .collect();
    let full = format!("{}{}{}", prefix, salt, suffix);
    // Keep the rightmost bytes; the prefix is the least interesting part.
    let chars: Vec<char> = full.chars().collect();
    if chars.len() > SSID_MAX_LEN {
        chars[chars.len() - SSID_MAX_LEN..].iter().collect()
    } else {
        full
    }
}

/// Lifecycle controller for one router session
pub struct RouterSession {
    executor: Arc<dyn RemoteExecutor>,
    allocator: Box<dyn InterfaceAllocator>,
    hostapd: HostapdManager,
    station: StationManager,
    local_servers: LocalServerPool,
    hostapd_instances: Vec<ApInstance>,
    station_instances: Vec<StationInstance>,
    ssid_prefix: String,
}

impl RouterSession {
    /// Build a session against a freshly claimed router
    ///
    /// Kills any test daemons a previous session may have leaked and pins
    /// the regulatory domain before anything is configured.
    pub async fn new(
        executor: Arc<dyn RemoteExecutor>,
        allocator: Box<dyn InterfaceAllocator>,
        test_name: &str,
    ) -> RouterResult<Self> {
        let session = Self {
            hostapd: HostapdManager::new(executor.clone()),
            station: StationManager::new(executor.clone()),
            local_servers: LocalServerPool::new(executor.clone()),
            hostapd_instances: Vec::new(),
            station_instances: Vec::new(),
            ssid_prefix: derive_ssid_prefix(test_name),
            executor,
            allocator,
        };

        session.hostapd.kill_all().await;
        session.local_servers.stop_all().await;
        session
            .executor
            .run("iw reg set US", DEFAULT_COMMAND_TIMEOUT, false)
            .await?;

        Ok(session)
    }

    /// Derive an SSID from the session prefix, a random salt, and |suffix|
    pub fn build_ssid(&self, suffix: &str) -> String {
        build_ssid_from(&self.ssid_prefix, suffix)
    }

    pub fn ap_instances(&self) -> &[ApInstance] {
        &self.hostapd_instances
    }

    pub fn station_instances(&self) -> &[StationInstance] {
        &self.station_instances
    }

    pub fn local_servers(&self) -> &[LocalServer] {
        self.local_servers.servers()
    }

    /// True iff this router has local servers configured
    pub fn has_local_server(&self) -> bool {
        !self.local_servers.servers().is_empty()
    }

    /// Configure an AP and its local server
    ///
    /// Unless |multi_interface| was explicitly requested, any already active
    /// network is fully deconfigured first: the default policy is one active
    /// network per session.
    pub async fn configure(&mut self, config: &ApConfig, multi_interface: bool) -> RouterResult<()> {
        if !multi_interface
            && (!self.hostapd_instances.is_empty() || !self.station_instances.is_empty())
        {
            self.deconfig().await?;
        }

        let ssid = match &config.ssid {
            Some(ssid) => ssid.clone(),
            None => self.build_ssid(&config.ssid_suffix),
        };
        let instance = self
            .hostapd
            .start(config, &ssid, self.allocator.as_mut())
            .await?;
        let interface = instance.interface.clone();
        // Track the instance as soon as the daemon is up; a failure below
        // still leaves it reachable for deconfig.
        self.hostapd_instances.push(instance);

        self.executor
            .run(
                &format!("iw dev {} set txpower auto", interface),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        self.local_servers.allocate(&interface).await?;
        info!("AP configured");
        Ok(())
    }

    /// Configure a station-based network in IBSS mode
    ///
    /// A local server always comes up on the station interface so the
    /// network has usable addressing.
    pub async fn join_ibss(&mut self, config: &ApConfig) -> RouterResult<()> {
        if !self.station_instances.is_empty() || !self.hostapd_instances.is_empty() {
            self.deconfig().await?;
        }

        let ssid = match &config.ssid {
            Some(ssid) => ssid.clone(),
            None => self.build_ssid(&config.ssid_suffix),
        };
        let frequency = config.frequency()?;
        let instance = self
            .station
            .join_ibss(&ssid, frequency, self.allocator.as_mut())
            .await?;
        self.local_servers.allocate(&instance.interface).await?;
        self.station_instances.push(instance);
        Ok(())
    }

    /// Connect a local client station to a running AP instance
    ///
    /// Gives the DUT a peer on the AP's own subnet to exercise connectivity
    /// against; the peer takes the deterministic .253 address for the
    /// instance's local server.
    pub async fn connect_managed(&mut self, instance: usize) -> RouterResult<()> {
        if self.hostapd_instances.is_empty() {
            return Err(RouterError::NotConfigured(
                "hostapd is not configured".to_string(),
            ));
        }
        if !self.station_instances.is_empty() {
            return Err(RouterError::AlreadyExists(
                "station is already configured".to_string(),
            ));
        }

        let target = self.hostapd_instances.get(instance).ok_or_else(|| {
            RouterError::NotConfigured(format!(
                "invalid instance number ({}) with {} instances configured",
                instance,
                self.hostapd_instances.len()
            ))
        })?;
        let peer = dhcp::peer_address(instance);
        let station = self
            .station
            .connect_managed(target, &peer, self.allocator.as_mut())
            .await?;
        self.station_instances.push(station);
        Ok(())
    }

    /// Deconfigure everything on this router
    pub async fn deconfig(&mut self) -> RouterResult<()> {
        self.deconfig_aps(None, false).await
    }

    /// Deconfigure APs and any station on this router
    ///
    /// |instance| None brings down every AP; Some(i) only that one.  With
    /// |silent| the AP interface is removed before the daemon dies, so no
    /// deauthentication frames reach associated clients.  Local servers come
    /// down first so stale routes never outlive the daemons behind them.
    pub async fn deconfig_aps(
        &mut self,
        instance: Option<usize>,
        silent: bool,
    ) -> RouterResult<()> {
        if self.hostapd_instances.is_empty() && self.station_instances.is_empty() {
            return Ok(());
        }

        if !self.hostapd_instances.is_empty() {
            let instances = match instance {
                Some(i) => {
                    if i >= self.hostapd_instances.len() {
                        return Err(RouterError::NotConfigured(format!(
                            "invalid instance number ({}) with {} instances configured",
                            i,
                            self.hostapd_instances.len()
                        )));
                    }
                    vec![self.hostapd_instances.remove(i)]
                }
                None => std::mem::take(&mut self.hostapd_instances),
            };

            for inst in &instances {
                self.local_servers.release_for_interface(&inst.interface).await;
            }
            for inst in instances {
                self.hostapd
                    .stop(inst, silent, true, self.allocator.as_mut())
                    .await?;
            }
        }

        self.leave().await?;

        Ok(())
    }

    /// Tear down the active station association, if any
    pub async fn leave(&mut self) -> RouterResult<()> {
        if let Some(station) = self.station_instances.pop() {
            self.station.leave(&station).await?;
            self.local_servers
                .release_for_interface(&station.interface)
                .await;
        }
        Ok(())
    }

    /// SSID of the network stemming from this router
    pub fn get_ssid(&self, instance: Option<usize>) -> RouterResult<String> {
        let index = match instance {
            Some(i) => i,
            None => {
                if self.hostapd_instances.len() > 1 {
                    return Err(RouterError::AmbiguousInstance(
                        "no instance of hostapd specified with multiple instances present"
                            .to_string(),
                    ));
                }
                0
            }
        };

        if !self.hostapd_instances.is_empty() {
            return Ok(self.ap_instance(index)?.ssid.clone());
        }
        if let Some(station) = self.station_instances.first() {
            return Ok(station.ssid.clone());
        }
        Err(RouterError::NotConfigured(
            "requested ssid of an unconfigured AP".to_string(),
        ))
    }

    /// WiFi IP when there is exactly one local server
    pub fn wifi_ip(&self) -> RouterResult<String> {
        match self.local_servers.servers().len() {
            0 => Err(RouterError::NotConfigured(
                "no IP address assigned".to_string(),
            )),
            1 => self.get_wifi_ip(0),
            _ => Err(RouterError::AmbiguousInstance(
                "could not pick a WiFi IP to return".to_string(),
            )),
        }
    }

    /// IP address on the WiFi subnet of local server |ap_num|
    pub fn get_wifi_ip(&self, ap_num: usize) -> RouterResult<String> {
        self.local_servers
            .servers()
            .get(ap_num)
            .map(|server| server.netblock.addr())
            .ok_or_else(|| RouterError::NotConfigured("no IP address assigned".to_string()))
    }

    /// Subnet of local server |ap_num|
    pub fn get_wifi_ip_subnet(&self, ap_num: usize) -> RouterResult<String> {
        self.local_servers
            .servers()
            .get(ap_num)
            .map(|server| server.netblock.subnet())
            .ok_or_else(|| RouterError::NotConfigured("no APs configured".to_string()))
    }

    /// Primary channel of AP instance |ap_num|
    pub fn get_wifi_channel(&self, ap_num: usize) -> RouterResult<u16> {
        let instance = self.ap_instance(ap_num)?;
        instance
            .param("channel")
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| {
                RouterError::ParseError("AP instance has no channel parameter".to_string())
            })
    }

    /// Interface of AP instance |ap_num|
    pub fn get_hostapd_interface(&self, ap_num: usize) -> RouterResult<String> {
        Ok(self.ap_instance(ap_num)?.interface.clone())
    }

    /// MAC address of AP instance |ap_num|
    pub async fn get_hostapd_mac(&self, ap_num: usize) -> RouterResult<String> {
        let interface = self.get_hostapd_interface(ap_num)?;
        let result = self
            .executor
            .run(
                &format!("cat /sys/class/net/{}/address", interface),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        Ok(result.stdout.trim().to_string())
    }

    /// Phy name backing AP instance |ap_num|
    pub async fn get_hostapd_phy(&self, ap_num: usize) -> RouterResult<String> {
        let interface = self.get_hostapd_interface(ap_num)?;
        let result = self
            .executor
            .run(
                &format!("iw dev {} info", interface),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        for line in result.stdout.lines() {
            if let Some(idx) = line.trim().strip_prefix("wiphy ") {
                let n: u32 = idx.trim().parse().map_err(|_| {
                    RouterError::ParseError(format!("invalid wiphy index: {:?}", idx))
                })?;
                return Ok(format!("phy{}", n));
            }
        }
        Err(RouterError::ParseError(format!(
            "no wiphy in iw output for {}",
            interface
        )))
    }

    /// MAC address of the peer station interface
    pub async fn local_peer_mac_address(&self) -> RouterResult<String> {
        let station = self.station_instances.first().ok_or_else(|| {
            RouterError::NotConfigured("no station instance present".to_string())
        })?;
        let result = self
            .executor
            .run(
                &format!("cat /sys/class/net/{}/address", station.interface),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        Ok(result.stdout.trim().to_string())
    }

    /// Deauthenticate a client from the most recent AP instance
    pub async fn deauth_client(&self, client_mac: &str) -> RouterResult<()> {
        validation::validate_mac_address(client_mac)?;
        let instance = self.hostapd_instances.last().ok_or_else(|| {
            RouterError::NotConfigured("no AP instance to deauthenticate from".to_string())
        })?;
        self.executor
            .run(
                &format!(
                    "{} -p{} deauthenticate {}",
                    CMD_HOSTAPD_CLI, instance.ctrl_interface, client_mac
                ),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        Ok(())
    }

    /// Verify that PMKSA caching was used on AP instance |instance|
    pub async fn confirm_pmksa_cache_use(&self, instance: usize) -> RouterResult<()> {
        let log_file = self.ap_instance(instance)?.log_file.clone();
        let result = self
            .executor
            .run(
                &format!("grep -q \"PMK from PMKSA cache\" {}", log_file),
                DEFAULT_COMMAND_TIMEOUT,
                true,
            )
            .await?;
        if !result.success() {
            return Err(RouterError::ServiceError(
                "PMKSA cache was not used in roaming".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether AP instance |instance| logged a deauthentication from |client_mac|
    pub async fn detect_client_deauth(
        &self,
        client_mac: &str,
        instance: usize,
    ) -> RouterResult<bool> {
        validation::validate_mac_address(client_mac)?;
        let ap = self.ap_instance(instance)?;
        let deauth_msg = format!("{}: deauthentication: STA={}", ap.interface, client_mac);
        let result = self
            .executor
            .run(
                &format!("grep -qi '{}' {}", deauth_msg, ap.log_file),
                DEFAULT_COMMAND_TIMEOUT,
                true,
            )
            .await?;
        Ok(result.success())
    }

    /// Whether AP instance |instance| logged a 20/40MHz coexistence report
    /// action frame from |client_mac|
    pub async fn detect_client_coexistence_report(
        &self,
        client_mac: &str,
        instance: usize,
    ) -> RouterResult<bool> {
        validation::validate_mac_address(client_mac)?;
        let ap = self.ap_instance(instance)?;
        let coex_msg = format!(
            "nl80211: MLME event frame - hexdump(len=.*): \
             .. .. .. .. .. .. .. .. .. .. {} \
             .. .. .. .. .. .. .. .. 04 00.*48 01 ..",
            client_mac.split(':').collect::<Vec<_>>().join(" ")
        );
        let result = self
            .executor
            .run(
                &format!("grep -qi '{}' {}", coex_msg, ap.log_file),
                DEFAULT_COMMAND_TIMEOUT,
                true,
            )
            .await?;
        Ok(result.success())
    }

    /// Bring up a monitor-mode interface tuned to |channel|
    ///
    /// The interface is handed to the caller, who owns releasing it once the
    /// injection work is done.
    pub async fn setup_management_frame_interface(
        &mut self,
        channel: u16,
    ) -> RouterResult<String> {
        let frequency = frequency_for_channel(channel).ok_or_else(|| {
            RouterError::InvalidParameter(format!("invalid channel: {}", channel))
        })?;
        let interface = self
            .allocator
            .get_interface(frequency, WlanMode::Monitor)?;
        self.executor
            .run(
                &format!("iw dev {} set freq {}", interface, frequency),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        self.executor
            .run(
                &format!("ip link set {} up", interface),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await?;
        Ok(interface)
    }

    /// Spawn a detached management-frame sender on |interface|
    ///
    /// Fire-and-forget: the sender's pid is returned but never reaped here;
    /// cleanup belongs to the caller.
    pub async fn send_management_frame(
        &self,
        interface: &str,
        frame_type: &str,
        channel: u16,
        options: &FrameOptions,
    ) -> RouterResult<u32> {
        let mut command = format!(
            "{} -i {} -t {} -c {}",
            CMD_SEND_MGMT_FRAME, interface, frame_type, channel
        );
        if let Some(prefix) = &options.ssid_prefix {
            command.push_str(&format!(" -s {}", prefix));
        }
        if let Some(num_bss) = options.num_bss {
            command.push_str(&format!(" -b {}", num_bss));
        }
        if let Some(count) = options.frame_count {
            command.push_str(&format!(" -n {}", count));
        }
        if let Some(delay) = options.delay_ms {
            command.push_str(&format!(" -d {}", delay));
        }
        command.push_str(&format!(
            " > {} 2>&1 & echo $!",
            MGMT_FRAME_SENDER_LOG_FILE
        ));

        let result = self
            .executor
            .run(&command, DEFAULT_COMMAND_TIMEOUT, false)
            .await?;
        result.stdout.trim().parse().map_err(|_| {
            RouterError::ParseError(format!(
                "invalid frame sender pid: {:?}",
                result.stdout.trim()
            ))
        })
    }

    /// Release global resources held by this session
    pub async fn close(&mut self) -> RouterResult<()> {
        self.deconfig().await
    }

    fn ap_instance(&self, ap_num: usize) -> RouterResult<&ApInstance> {
        self.hostapd_instances.get(ap_num).ok_or_else(|| {
            RouterError::NotConfigured(format!(
                "invalid instance number ({}) with {} instances configured",
                ap_num,
                self.hostapd_instances.len()
            ))
        })
    }
}
