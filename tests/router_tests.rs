//! End-to-end lifecycle tests over a scripted executor

mod common;

use common::{fail, ok, FakeExecutor};
use librouterctl::{
    ApConfig, LocalServerPool, RouterError, RouterSession, StaticInterfaceAllocator, StationKind,
    WlanDev, MAX_LOCAL_SERVERS,
};
use std::sync::Arc;

async fn new_session(executor: Arc<FakeExecutor>, interfaces: &[&str]) -> RouterSession {
    let devices = interfaces.iter().map(|name| WlanDev::any(*name)).collect();
    let allocator = Box::new(StaticInterfaceAllocator::new(devices).unwrap());
    RouterSession::new(executor, allocator, "network_WiFi_CheckRouter")
        .await
        .unwrap()
}

fn ap_config(suffix: &str) -> ApConfig {
    ApConfig {
        channel: 1,
        ssid_suffix: suffix.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_configure_then_deconfig_round_trip() {
    let executor = Arc::new(FakeExecutor::new().ap_starts_clean());
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    session.configure(&ap_config("_ap"), false).await.unwrap();

    assert_eq!(session.ap_instances().len(), 1);
    assert_eq!(session.local_servers().len(), 1);
    let ssid = session.get_ssid(None).unwrap();
    assert!(ssid.ends_with("_ap"));
    assert!(ssid.len() <= 32);
    assert!(session.has_local_server());
    assert_eq!(session.wifi_ip().unwrap(), "192.168.0.254");
    assert_eq!(session.get_wifi_ip_subnet(0).unwrap(), "192.168.0.0/24");
    assert_eq!(session.get_hostapd_interface(0).unwrap(), "wlan0");
    assert_eq!(session.get_wifi_channel(0).unwrap(), 1);

    session.deconfig().await.unwrap();

    assert!(session.ap_instances().is_empty());
    assert!(session.station_instances().is_empty());
    assert!(session.local_servers().is_empty());
    assert!(!session.has_local_server());

    // The local server must come down before the daemon is killed.
    let dhcp_kill = executor.index_of("dnsmasq.*wlan0").unwrap();
    let hostapd_kill = executor
        .index_of("hostapd.*/tmp/hostapd-test-wlan0.conf")
        .unwrap();
    assert!(dhcp_kill < hostapd_kill);
}

#[tokio::test]
async fn test_configure_replaces_active_instance() {
    let executor = Arc::new(FakeExecutor::new().ap_starts_clean());
    let mut session = new_session(executor.clone(), &["wlan0", "wlan1"]).await;

    session.configure(&ap_config("_a"), false).await.unwrap();
    let first_ssid = session.get_ssid(None).unwrap();

    session.configure(&ap_config("_b"), false).await.unwrap();

    assert_eq!(session.ap_instances().len(), 1);
    assert_eq!(session.local_servers().len(), 1);
    let second_ssid = session.get_ssid(None).unwrap();
    assert!(second_ssid.ends_with("_b"));
    assert_ne!(first_ssid, second_ssid);
    // Exactly one scoped kill: the implicit deconfig of the first AP.
    assert_eq!(executor.count_matching("hostapd.*/tmp/hostapd-test"), 1);
}

#[tokio::test]
async fn test_multi_interface_keeps_both_instances() {
    let executor = Arc::new(FakeExecutor::new().ap_starts_clean());
    let mut session = new_session(executor.clone(), &["wlan0", "wlan1"]).await;

    session.configure(&ap_config("_a"), false).await.unwrap();
    session.configure(&ap_config("_b"), true).await.unwrap();

    assert_eq!(session.ap_instances().len(), 2);
    assert_eq!(session.local_servers().len(), 2);
    assert_eq!(
        session.local_servers()[1].netblock.subnet(),
        "192.168.1.0/24"
    );

    let err = session.get_ssid(None).unwrap_err();
    assert!(matches!(err, RouterError::AmbiguousInstance(_)));
    assert!(session.get_ssid(Some(1)).is_ok());
}

#[tokio::test]
async fn test_deconfig_single_instance_leaves_the_other() {
    let executor = Arc::new(FakeExecutor::new().ap_starts_clean());
    let mut session = new_session(executor.clone(), &["wlan0", "wlan1"]).await;

    session.configure(&ap_config("_a"), false).await.unwrap();
    session.configure(&ap_config("_b"), true).await.unwrap();

    session.deconfig_aps(Some(0), false).await.unwrap();

    assert_eq!(session.ap_instances().len(), 1);
    let survivor = session.get_ssid(None).unwrap();
    assert!(survivor.ends_with("_b"));

    // wlan0's server is gone; the survivor re-indexes to position 0 but
    // keeps its subnet.
    assert_eq!(session.local_servers().len(), 1);
    assert_eq!(session.local_servers()[0].interface, "wlan1");
    assert_eq!(
        session.local_servers()[0].netblock.subnet(),
        "192.168.1.0/24"
    );
    assert_eq!(executor.count_matching("hostapd.*/tmp/hostapd-test-wlan0.conf"), 1);
    assert_eq!(executor.count_matching("hostapd.*/tmp/hostapd-test-wlan1.conf"), 0);

    let err = session.deconfig_aps(Some(7), false).await.unwrap_err();
    assert!(matches!(err, RouterError::NotConfigured(_)));
}

#[tokio::test]
async fn test_silent_deconfig_removes_interface_before_kill() {
    let executor = Arc::new(FakeExecutor::new().ap_starts_clean());
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    session.configure(&ap_config("_ap"), false).await.unwrap();
    session.deconfig_aps(None, true).await.unwrap();

    let iface_removal = executor.index_of("iw dev wlan0 del").unwrap();
    let hostapd_kill = executor
        .index_of("hostapd.*/tmp/hostapd-test-wlan0.conf")
        .unwrap();
    assert!(iface_removal < hostapd_kill);
}

#[tokio::test]
async fn test_get_ssid_unconfigured() {
    let executor = Arc::new(FakeExecutor::new());
    let session = new_session(executor, &["wlan0"]).await;

    let err = session.get_ssid(None).unwrap_err();
    assert!(matches!(err, RouterError::NotConfigured(_)));
}

#[tokio::test]
async fn test_deconfig_with_nothing_configured_is_noop() {
    let executor = Arc::new(FakeExecutor::new());
    let mut session = new_session(executor, &["wlan0"]).await;

    session.deconfig().await.unwrap();
    assert!(session.ap_instances().is_empty());
    assert!(session.local_servers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_marker_fails_fast() {
    // The failure marker shows up on the third poll, long before the 20-poll
    // startup window runs out.
    let mut failure_polls = 0;
    let executor = Arc::new(
        FakeExecutor::new()
            .rule(".pid", |cmd| if cmd.starts_with("cat") { ok("4242") } else { ok("") })
            .respond("Completing interface initialization", fail())
            .rule("Interface initialization failed", move |_| {
                failure_polls += 1;
                if failure_polls >= 3 {
                    ok("")
                } else {
                    fail()
                }
            }),
    );
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    let err = session.configure(&ap_config("_bad"), false).await.unwrap_err();
    assert!(matches!(err, RouterError::BadConfiguration(_)));

    let polls = executor.count_matching("Completing interface initialization");
    assert_eq!(polls, 3);
    assert!(polls < 20);

    // Nothing stuck around after the failed start.
    assert!(session.ap_instances().is_empty());
    assert!(session.local_servers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_startup_timeout() {
    let executor = Arc::new(
        FakeExecutor::new()
            .rule(".pid", |cmd| if cmd.starts_with("cat") { ok("4242") } else { ok("") })
            .respond("Completing interface initialization", fail())
            .respond("Interface initialization failed", fail()),
    );
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    let err = session.configure(&ap_config("_slow"), false).await.unwrap_err();
    assert!(matches!(err, RouterError::StartupTimeout(_)));
    assert_eq!(
        executor.count_matching("Completing interface initialization"),
        20
    );
}

#[tokio::test(start_paused = true)]
async fn test_daemon_death_detected_mid_poll() {
    let executor = Arc::new(
        FakeExecutor::new()
            .rule(".pid", |cmd| if cmd.starts_with("cat") { ok("4242") } else { ok("") })
            .respond("Completing interface initialization", fail())
            .respond("Interface initialization failed", fail())
            .respond("kill -0", fail()),
    );
    let mut session = new_session(executor, &["wlan0"]).await;

    let err = session.configure(&ap_config("_dead"), false).await.unwrap_err();
    assert!(matches!(err, RouterError::ProcessDied(_)));
}

#[tokio::test]
async fn test_local_server_exhaustion() {
    let executor = Arc::new(FakeExecutor::new());
    let mut pool = LocalServerPool::new(executor);

    for i in 0..MAX_LOCAL_SERVERS {
        pool.allocate(&format!("v{}", i)).await.unwrap();
    }
    assert_eq!(pool.servers().len(), 256);

    let err = pool.allocate("overflow").await.unwrap_err();
    assert!(matches!(err, RouterError::ResourceExhausted(_)));
    assert_eq!(pool.servers().len(), 256);
}

#[tokio::test]
async fn test_ibss_round_trip() {
    let executor = Arc::new(FakeExecutor::new());
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    session.join_ibss(&ap_config("_adhoc")).await.unwrap();

    assert_eq!(session.station_instances().len(), 1);
    assert_eq!(session.station_instances()[0].kind, StationKind::Ibss);
    assert_eq!(session.local_servers().len(), 1);
    assert!(executor.index_of("ibss join").is_some());
    let ssid = session.get_ssid(None).unwrap();
    assert!(ssid.ends_with("_adhoc"));

    session.deconfig().await.unwrap();

    assert!(session.station_instances().is_empty());
    assert!(session.local_servers().is_empty());
    assert!(executor.index_of("iw dev wlan0 ibss leave").is_some());
    assert!(executor.index_of("ip link set wlan0 down").is_some());
}

#[tokio::test]
async fn test_connect_managed_configures_peer() {
    let executor = Arc::new(
        FakeExecutor::new()
            .ap_starts_clean()
            .respond("iw dev wlan1 link", ok("Connected to 04:f0:21:03:7d:bd (on wlan1)")),
    );
    let mut session = new_session(executor.clone(), &["wlan0", "wlan1"]).await;

    session.configure(&ap_config("_ap"), false).await.unwrap();
    session.connect_managed(0).await.unwrap();

    assert_eq!(session.station_instances().len(), 1);
    let station = &session.station_instances()[0];
    assert_eq!(station.kind, StationKind::Managed);
    assert_eq!(station.interface, "wlan1");
    assert_eq!(station.ssid, session.get_ssid(None).unwrap());

    assert!(executor.index_of("ip addr add 192.168.0.253/24 dev wlan1").is_some());
    assert!(executor
        .index_of("echo 2 > /proc/sys/net/ipv4/conf/wlan1/rp_filter")
        .is_some());
    assert!(executor
        .index_of("echo 1 > /proc/sys/net/ipv4/conf/wlan1/arp_ignore")
        .is_some());
    assert!(executor
        .index_of("echo 1 > /proc/sys/net/ipv4/conf/wlan0/arp_ignore")
        .is_some());

    session.deconfig().await.unwrap();
    assert!(executor.index_of("wpa_supplicant.*wlan1").is_some());
    assert!(session.station_instances().is_empty());
}

#[tokio::test]
async fn test_connect_managed_requires_hostapd() {
    let executor = Arc::new(FakeExecutor::new());
    let mut session = new_session(executor, &["wlan0"]).await;

    let err = session.connect_managed(0).await.unwrap_err();
    assert!(matches!(err, RouterError::NotConfigured(_)));
}

#[tokio::test]
async fn test_deauth_and_log_probes() {
    let executor = Arc::new(
        FakeExecutor::new()
            .ap_starts_clean()
            .respond("deauthentication: STA=", ok(""))
            .respond("PMK from PMKSA cache", fail()),
    );
    let mut session = new_session(executor.clone(), &["wlan0"]).await;
    session.configure(&ap_config("_ap"), false).await.unwrap();

    session.deauth_client("aa:bb:cc:dd:ee:ff").await.unwrap();
    assert!(executor
        .index_of("-p/tmp/hostapd-test-wlan0.ctrl deauthenticate aa:bb:cc:dd:ee:ff")
        .is_some());
    assert!(session.deauth_client("not-a-mac").await.is_err());

    let seen = session
        .detect_client_deauth("aa:bb:cc:dd:ee:ff", 0)
        .await
        .unwrap();
    assert!(seen);

    let err = session.confirm_pmksa_cache_use(0).await.unwrap_err();
    assert!(matches!(err, RouterError::ServiceError(_)));
}

#[tokio::test]
async fn test_send_management_frame() {
    let executor = Arc::new(
        FakeExecutor::new().respond("send_management_frame", ok("31337\n")),
    );
    let mut session = new_session(executor.clone(), &["wlan0"]).await;

    let interface = session.setup_management_frame_interface(1).await.unwrap();
    assert_eq!(interface, "wlan0");
    assert!(executor.index_of("iw dev wlan0 set freq 2412").is_some());

    let options = librouterctl::FrameOptions {
        frame_count: Some(10),
        delay_ms: Some(50),
        ..Default::default()
    };
    let pid = session
        .send_management_frame(&interface, "beacon", 1, &options)
        .await
        .unwrap();
    assert_eq!(pid, 31337);

    let sender = executor.commands();
    let cmd = sender
        .iter()
        .find(|c| c.contains("send_management_frame"))
        .unwrap();
    assert!(cmd.contains("-t beacon"));
    assert!(cmd.contains("-n 10"));
    assert!(cmd.contains("-d 50"));
    assert!(cmd.contains("& echo $!"));
}

#[tokio::test]
async fn test_hostapd_identity_accessors() {
    let executor = Arc::new(
        FakeExecutor::new()
            .ap_starts_clean()
            .respond("cat /sys/class/net/wlan0/address", ok("00:11:22:33:44:55\n"))
            .respond(
                "iw dev wlan0 info",
                ok("Interface wlan0\n\tifindex 3\n\twiphy 0\n"),
            ),
    );
    let mut session = new_session(executor, &["wlan0"]).await;
    session.configure(&ap_config("_ap"), false).await.unwrap();

    assert_eq!(
        session.get_hostapd_mac(0).await.unwrap(),
        "00:11:22:33:44:55"
    );
    assert_eq!(session.get_hostapd_phy(0).await.unwrap(), "phy0");

    let err = session.get_hostapd_interface(5).unwrap_err();
    assert!(matches!(err, RouterError::NotConfigured(_)));
}
