//! hostapd management for the test access point
//!
//! Configuration generation and lifecycle control for hostapd instances on
//! the router.  Startup is confirmed by polling the daemon log for known
//! marker lines rather than trusting the pid file alone.

use crate::error::{RouterError, RouterResult};
use crate::interface::{InterfaceAllocator, WlanMode};
use crate::remote::{kill_process_instance, RemoteExecutor, DEFAULT_COMMAND_TIMEOUT};
use crate::validation;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

pub(crate) const CMD_HOSTAPD: &str = "/usr/sbin/hostapd";
pub(crate) const CMD_HOSTAPD_CLI: &str = "/usr/sbin/hostapd_cli";
pub(crate) const HOSTAPD_DRIVER: &str = "nl80211";

/// Line hostapd logs once the AP interface is fully up
pub const STARTUP_SUCCESS_PATTERN: &str = "Completing interface initialization";
/// Line hostapd logs when the configuration could not be applied
pub const STARTUP_FAILURE_PATTERN: &str = "Interface initialization failed";

const STARTUP_POLLING_INTERVAL: Duration = Duration::from_millis(500);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_WAIT: Duration = Duration::from_secs(30);

/// Where collected daemon logs land on the router
const LOG_COLLECT_DIR: &str = "/tmp/router-debug";

fn hostapd_path(interface: &str, ext: &str) -> String {
    format!("/tmp/hostapd-test-{}.{}", interface, ext)
}

/// Hardware mode advertised to hostapd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwMode {
    A,
    B,
    G,
}

impl HwMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwMode::A => "a",
            HwMode::B => "b",
            HwMode::G => "g",
        }
    }
}

/// Security configuration for the AP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    Open,
    WpaPsk { passphrase: String },
    Wpa2Psk { passphrase: String },
}

/// Capability-negotiated AP configuration
///
/// Turned into the ordered key=value parameter list that hostapd consumes;
/// interface, control socket, and SSID are injected at start time because
/// they are only known then.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApConfig {
    pub channel: u16,
    pub mode: HwMode,
    pub security: Security,
    /// Fixed SSID; generated from the session prefix when unset
    pub ssid: Option<String>,
    /// Suffix appended to generated SSIDs
    pub ssid_suffix: String,
    pub hidden: bool,
    pub ieee80211n: bool,
    pub beacon_interval: Option<u16>,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            channel: 6,
            mode: HwMode::G,
            security: Security::Open,
            ssid: None,
            ssid_suffix: String::new(),
            hidden: false,
            ieee80211n: false,
            beacon_interval: None,
        }
    }
}

impl ApConfig {
    /// Center frequency for the configured channel
    pub fn frequency(&self) -> RouterResult<u32> {
        frequency_for_channel(self.channel).ok_or_else(|| {
            RouterError::InvalidParameter(format!("invalid channel: {}", self.channel))
        })
    }

    /// Generate the ordered hostapd parameter list
    pub fn generate_params(
        &self,
        interface: &str,
        ctrl_interface: &str,
        ssid: &str,
    ) -> RouterResult<Vec<(String, String)>> {
        validation::validate_ssid(ssid)?;

        let mut params: Vec<(String, String)> = vec![
            ("interface".to_string(), interface.to_string()),
            ("driver".to_string(), HOSTAPD_DRIVER.to_string()),
            ("ctrl_interface".to_string(), ctrl_interface.to_string()),
            ("ssid".to_string(), ssid.to_string()),
            ("hw_mode".to_string(), self.mode.as_str().to_string()),
            ("channel".to_string(), self.channel.to_string()),
        ];

        if self.hidden {
            params.push(("ignore_broadcast_ssid".to_string(), "1".to_string()));
        }

        if self.ieee80211n {
            params.push(("ieee80211n".to_string(), "1".to_string()));
            params.push(("wmm_enabled".to_string(), "1".to_string()));
        }

        if let Some(interval) = self.beacon_interval {
            params.push(("beacon_int".to_string(), interval.to_string()));
        }

        match &self.security {
            Security::Open => {}
            Security::WpaPsk { passphrase } => {
                validation::validate_passphrase(passphrase)?;
                params.push(("wpa".to_string(), "1".to_string()));
                params.push(("wpa_passphrase".to_string(), passphrase.clone()));
                params.push(("wpa_key_mgmt".to_string(), "WPA-PSK".to_string()));
                params.push(("wpa_pairwise".to_string(), "TKIP CCMP".to_string()));
            }
            Security::Wpa2Psk { passphrase } => {
                validation::validate_passphrase(passphrase)?;
                params.push(("wpa".to_string(), "2".to_string()));
                params.push(("wpa_passphrase".to_string(), passphrase.clone()));
                params.push(("wpa_key_mgmt".to_string(), "WPA-PSK".to_string()));
                params.push(("rsn_pairwise".to_string(), "CCMP".to_string()));
            }
        }

        Ok(params)
    }
}

/// Center frequency in MHz for a 2.4/5 GHz channel number
pub fn frequency_for_channel(channel: u16) -> Option<u32> {
    match channel {
        1..=13 => Some(2412 + 5 * (u32::from(channel) - 1)),
        14 => Some(2484),
        34..=165 => Some(5000 + 5 * u32::from(channel)),
        _ => None,
    }
}

/// Channel number for a 2.4/5 GHz center frequency in MHz
pub fn channel_for_frequency(frequency: u32) -> Option<u16> {
    match frequency {
        2484 => Some(14),
        2412..=2472 if (frequency - 2412) % 5 == 0 => Some(((frequency - 2412) / 5 + 1) as u16),
        5170..=5825 if frequency % 5 == 0 => Some(((frequency - 5000) / 5) as u16),
        _ => None,
    }
}

/// One running hostapd instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApInstance {
    pub ssid: String,
    pub interface: String,
    pub conf_file: String,
    pub log_file: String,
    pub pid_file: String,
    pub ctrl_interface: String,
    pub pid: u32,
    pub params: Vec<(String, String)>,
}

impl ApInstance {
    /// Look up a generated parameter by key
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Starts, health-checks, and stops hostapd instances
pub struct HostapdManager {
    executor: Arc<dyn RemoteExecutor>,
    teardown_count: u64,
}

impl HostapdManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            teardown_count: 0,
        }
    }

    /// AP instances ever torn down in this session
    pub fn teardown_count(&self) -> u64 {
        self.teardown_count
    }

    /// Start a hostapd instance described by |config|
    ///
    /// Allocates an interface, writes the generated config to the router,
    /// launches the daemon, and polls its log until it either confirms
    /// startup or fails in a classifiable way.  The interface is returned to
    /// the allocator on any failure.
    pub async fn start(
        &self,
        config: &ApConfig,
        ssid: &str,
        allocator: &mut dyn InterfaceAllocator,
    ) -> RouterResult<ApInstance> {
        let frequency = config.frequency()?;
        let interface = allocator.get_interface(frequency, WlanMode::Managed)?;
        match self.start_on_interface(config, ssid, &interface).await {
            Ok(instance) => Ok(instance),
            Err(e) => {
                allocator.release(&interface);
                Err(e)
            }
        }
    }

    async fn start_on_interface(
        &self,
        config: &ApConfig,
        ssid: &str,
        interface: &str,
    ) -> RouterResult<ApInstance> {
        let conf_file = hostapd_path(interface, "conf");
        let log_file = hostapd_path(interface, "log");
        let pid_file = hostapd_path(interface, "pid");
        let ctrl_interface = hostapd_path(interface, "ctrl");

        let params = config.generate_params(interface, &ctrl_interface, ssid)?;
        info!("starting hostapd on {} with parameters: {:?}", interface, params);

        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("\n");
        let e = self.executor.as_ref();
        e.run(
            &format!("cat <<EOF >{}\n{}\nEOF\n", conf_file, body),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;

        e.run(&format!("rm {}", log_file), DEFAULT_COMMAND_TIMEOUT, true)
            .await?;
        e.run(&format!("rm {}", pid_file), DEFAULT_COMMAND_TIMEOUT, true)
            .await?;
        e.run("stop wpasupplicant", DEFAULT_COMMAND_TIMEOUT, true)
            .await?;
        e.run(
            &format!(
                "{} -dd -B -t -f {} -P {} {}",
                CMD_HOSTAPD, log_file, pid_file, conf_file
            ),
            DEFAULT_COMMAND_TIMEOUT,
            false,
        )
        .await?;

        let pid_out = e
            .run(&format!("cat {}", pid_file), DEFAULT_COMMAND_TIMEOUT, false)
            .await?;
        let pid: u32 = pid_out.stdout.trim().parse().map_err(|_| {
            RouterError::ParseError(format!("invalid hostapd pid: {:?}", pid_out.stdout.trim()))
        })?;

        info!("waiting for hostapd to confirm startup");
        let start = Instant::now();
        while start.elapsed() < STARTUP_TIMEOUT {
            let up = e
                .run(
                    &format!("grep \"{}\" {}", STARTUP_SUCCESS_PATTERN, log_file),
                    DEFAULT_COMMAND_TIMEOUT,
                    true,
                )
                .await?
                .success();
            if up {
                return Ok(ApInstance {
                    ssid: ssid.to_string(),
                    interface: interface.to_string(),
                    conf_file,
                    log_file,
                    pid_file,
                    ctrl_interface,
                    pid,
                    params,
                });
            }

            // An invalid router configuration shows up in the log well before
            // the timeout; catch it early.
            let bad_config = e
                .run(
                    &format!("grep \"{}\" {}", STARTUP_FAILURE_PATTERN, log_file),
                    DEFAULT_COMMAND_TIMEOUT,
                    true,
                )
                .await?
                .success();
            if bad_config {
                return Err(RouterError::BadConfiguration(
                    "hostapd failed to initialize AP interface".to_string(),
                ));
            }

            let alive = e
                .run(&format!("kill -0 {}", pid), DEFAULT_COMMAND_TIMEOUT, true)
                .await?
                .success();
            if !alive {
                return Err(RouterError::ProcessDied(
                    "hostapd process terminated".to_string(),
                ));
            }

            sleep(STARTUP_POLLING_INTERVAL).await;
        }

        Err(RouterError::StartupTimeout(
            "timed out while waiting for hostapd to start".to_string(),
        ))
    }

    /// Stop a hostapd instance and release its interface
    ///
    /// With |silent| set, the interface is removed from the host before the
    /// daemon is killed so no deauthentication frames reach associated
    /// clients.
    pub async fn stop(
        &mut self,
        instance: ApInstance,
        silent: bool,
        collect_logs: bool,
        allocator: &mut dyn InterfaceAllocator,
    ) -> RouterResult<()> {
        if silent {
            self.executor
                .run(
                    &format!("iw dev {} del", instance.interface),
                    DEFAULT_COMMAND_TIMEOUT,
                    false,
                )
                .await?;
        }

        kill_process_instance(
            self.executor.as_ref(),
            "hostapd",
            Some(&instance.conf_file),
            KILL_WAIT,
        )
        .await;

        if collect_logs {
            self.collect_log(&instance).await;
        }

        allocator.release(&instance.interface);
        self.teardown_count += 1;
        Ok(())
    }

    /// Kill every hostapd on the router, instance bookkeeping aside
    pub async fn kill_all(&self) {
        kill_process_instance(self.executor.as_ref(), "hostapd", None, KILL_WAIT).await;
    }

    async fn collect_log(&self, instance: &ApInstance) {
        let exists = match self
            .executor
            .run(
                &format!("test -f {}", instance.log_file),
                DEFAULT_COMMAND_TIMEOUT,
                true,
            )
            .await
        {
            Ok(result) => result.success(),
            Err(e) => {
                warn!("could not check for hostapd log file: {}", e);
                false
            }
        };

        if !exists {
            error!("did not collect hostapd log file because it was missing");
            return;
        }

        let dest = format!(
            "{}/hostapd_router_{}_{}.log",
            LOG_COLLECT_DIR, self.teardown_count, instance.interface
        );
        if let Err(e) = self
            .executor
            .run(
                &format!(
                    "mkdir -p {} && cp {} {}",
                    LOG_COLLECT_DIR, instance.log_file, dest
                ),
                DEFAULT_COMMAND_TIMEOUT,
                false,
            )
            .await
        {
            warn!("failed to collect hostapd log: {}", e);
        }
    }
}
