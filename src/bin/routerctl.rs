//! routerctl - bring up and tear down test access points on a WiFi router
//!
//! # Usage
//!
//! ```bash
//! # Bring up an open AP on channel 6 of a remote router, tear down on ctrl-c
//! routerctl --host testrouter --user root --iface wlan0 up --channel 6
//!
//! # WPA2 AP on a 5GHz channel, printing the SSID and gateway as JSON
//! routerctl --host testrouter up --channel 36 --psk chromeos --json
//!
//! # Kill stray test daemons left behind by a crashed run
//! routerctl --host testrouter clean
//! ```

use clap::{Parser, Subcommand};
use librouterctl::{
    ApConfig, HwMode, LocalExecutor, RemoteExecutor, RouterSession, Security,
    StaticInterfaceAllocator, WlanDev,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// WiFi test router control
#[derive(Parser, Debug)]
#[command(name = "routerctl")]
#[command(author = "routerctl contributors")]
#[command(version)]
#[command(about = "Access point and station lifecycle control for WiFi test routers", long_about = None)]
struct Args {
    /// Remote router to manage over SSH (runs locally when omitted)
    #[arg(long)]
    host: Option<String>,

    /// SSH user on the router
    #[arg(long)]
    user: Option<String>,

    /// SSH port on the router
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Wireless interface available for allocation (repeatable)
    #[arg(long = "iface", value_name = "NAME")]
    interfaces: Vec<String>,

    /// Test name used to derive SSIDs
    #[arg(long, default_value = "network_WiFi_Manual")]
    test_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure an AP plus a local DHCP server, tear down on ctrl-c
    Up {
        /// WiFi channel for the AP
        #[arg(long, default_value_t = 6)]
        channel: u16,

        /// WPA2 passphrase (open network when omitted)
        #[arg(long)]
        psk: Option<String>,

        /// Suffix appended to the generated SSID
        #[arg(long, default_value = "")]
        ssid_suffix: String,

        /// Print the configured SSID and gateway as JSON
        #[arg(long)]
        json: bool,
    },

    /// Kill stray test daemons left behind by a previous run
    Clean,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let executor: Arc<dyn RemoteExecutor> = match &args.host {
        Some(host) => {
            let mut ssh = librouterctl::SshExecutor::new(host.clone()).with_port(args.port);
            if let Some(user) = &args.user {
                ssh = ssh.with_user(user.clone());
            }
            Arc::new(ssh)
        }
        None => Arc::new(LocalExecutor::new()),
    };

    let interfaces = if args.interfaces.is_empty() {
        vec!["wlan0".to_string()]
    } else {
        args.interfaces.clone()
    };
    let devices = interfaces.into_iter().map(WlanDev::any).collect();
    let allocator = Box::new(StaticInterfaceAllocator::new(devices)?);

    let mut session = RouterSession::new(executor, allocator, &args.test_name).await?;

    match args.command {
        Command::Up {
            channel,
            psk,
            ssid_suffix,
            json,
        } => {
            let config = ApConfig {
                channel,
                mode: if channel > 14 { HwMode::A } else { HwMode::G },
                security: match psk {
                    Some(passphrase) => Security::Wpa2Psk { passphrase },
                    None => Security::Open,
                },
                ssid_suffix,
                ..Default::default()
            };

            session.configure(&config, false).await?;
            let ssid = session.get_ssid(None)?;
            let gateway = session.wifi_ip()?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "ssid": ssid, "gateway": gateway })
                );
            } else {
                info!("AP '{}' up, gateway {}", ssid, gateway);
            }

            info!("press ctrl-c to tear down");
            tokio::signal::ctrl_c().await?;
            session.close().await?;
            info!("router session closed");
        }
        Command::Clean => {
            // Session construction already killed stray daemons.
            session.close().await?;
            info!("router session cleaned");
        }
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
