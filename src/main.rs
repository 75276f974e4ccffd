//! Keyrelay CLI
//!
//! Runs the host listener, the gateway device, or an in-process simulation of
//! the sensor and gateway devices.

use clap::{Parser, Subcommand};
use keyrelay::config::{Config, GatewaySettings, HostSettings};
use keyrelay::sensor::ScriptedPress;
use keyrelay::VERSION;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "gateway")]
use keyrelay::gateway::{
    api::{self, ApiState},
    load_or_create_device_id,
    relay::{RelayClient, RelayConfig},
    runtime::{GatewayRuntime, SessionEnd},
    CredentialStore, DeviceActions, LogScreen, ReliabilityMode, Screen, Telemetry,
};
#[cfg(feature = "gateway")]
use std::net::SocketAddr;
#[cfg(any(feature = "gateway", feature = "host"))]
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "keyrelay")]
#[command(version = VERSION)]
#[command(about = "Key matrix press capture with reliable relay to a host", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host listener
    Host {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Shared secret required in X-Matrix-Secret
        #[arg(long)]
        secret: Option<String>,

        /// Seconds of silence before a device is reported offline
        #[arg(long)]
        offline_timeout: Option<u64>,
    },

    /// Run the gateway device
    Gateway {
        /// Read link frames from a TCP address (serial bridge) instead of stdin
        #[arg(long)]
        link_addr: Option<String>,

        /// Host listener address
        #[arg(long)]
        relay_host: Option<String>,

        /// Host listener port
        #[arg(long)]
        relay_port: Option<u16>,

        /// Shared secret sent in X-Matrix-Secret
        #[arg(long)]
        secret: Option<String>,

        /// Port of the device HTTP surface
        #[arg(long)]
        api_port: Option<u16>,
    },

    /// Drive an in-process sensor and gateway with scripted key holds
    Simulate {
        /// Key hold as KEY:MS, repeatable
        #[arg(long = "press", required = true)]
        presses: Vec<ScriptedPress>,

        /// Reliability mode (legacy or confirmed)
        #[arg(long, default_value = "confirmed")]
        mode: String,

        /// Idle time after each release, in milliseconds
        #[arg(long, default_value = "150")]
        gap_ms: u64,

        /// Host listener address
        #[arg(long)]
        relay_host: Option<String>,

        /// Host listener port
        #[arg(long)]
        relay_port: Option<u16>,

        /// Shared secret sent in X-Matrix-Secret
        #[arg(long)]
        secret: Option<String>,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the default config file
        #[arg(long)]
        save: bool,
    },

    /// Query a host listener's health endpoint
    Health {
        /// Health URL (defaults to the configured relay host)
        #[arg(long)]
        url: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Host {
            bind,
            port,
            secret,
            offline_timeout,
        } => {
            let mut settings = config.host.clone();
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            if secret.is_some() {
                settings.secret = secret;
            }
            if let Some(secs) = offline_timeout {
                settings.offline_timeout = Duration::from_secs(secs);
            }
            cmd_host(settings)
        }
        Commands::Gateway {
            link_addr,
            relay_host,
            relay_port,
            secret,
            api_port,
        } => {
            let mut settings = with_relay_overrides(config.gateway.clone(), relay_host, relay_port, secret);
            if let Some(port) = api_port {
                settings.api_port = port;
            }
            cmd_gateway(&config, settings, link_addr)
        }
        Commands::Simulate {
            presses,
            mode,
            gap_ms,
            relay_host,
            relay_port,
            secret,
        } => {
            let settings = with_relay_overrides(config.gateway.clone(), relay_host, relay_port, secret);
            cmd_simulate(settings, presses, &mode, Duration::from_millis(gap_ms))
        }
        Commands::Config { save } => cmd_config(&config, cli.config.as_deref(), save),
        Commands::Health { url } => cmd_health(&config, url),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Warning: {e}; using defaults");
        Config::default()
    })
}

fn with_relay_overrides(
    mut settings: GatewaySettings,
    relay_host: Option<String>,
    relay_port: Option<u16>,
    secret: Option<String>,
) -> GatewaySettings {
    if let Some(host) = relay_host {
        settings.relay_host = host;
    }
    if let Some(port) = relay_port {
        settings.relay_port = port;
    }
    if secret.is_some() {
        settings.secret = secret;
    }
    settings
}

#[cfg(any(feature = "gateway", feature = "host"))]
fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

#[cfg(any(feature = "gateway", feature = "host"))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(feature = "host")]
fn cmd_host(settings: HostSettings) -> anyhow::Result<()> {
    use keyrelay::host::listener::{self, ListenerConfig, ListenerState};
    use keyrelay::host::LogSink;

    println!("Keyrelay host listener v{VERSION}");
    println!();

    let config = ListenerConfig::from_settings(&settings);
    runtime()?.block_on(async move {
        let state = Arc::new(ListenerState::new(&config, Arc::new(LogSink)));
        let (addr, shutdown) = listener::run(config.clone(), state.clone()).await?;

        println!("  Listening on: http://{addr}");
        println!(
            "  Authentication: {}",
            if config.secret.is_some() {
                "shared secret"
            } else {
                "none"
            }
        );
        println!("  Offline timeout: {}s", config.offline_timeout.as_secs());
        println!();
        println!("Press Ctrl+C to stop");
        println!();

        shutdown_signal().await;
        let _ = shutdown.send(());

        println!();
        println!("{}", state.stats().summary());
        Ok(())
    })
}

#[cfg(not(feature = "host"))]
fn cmd_host(_settings: HostSettings) -> anyhow::Result<()> {
    anyhow::bail!("host feature not enabled at compile time")
}

#[cfg(feature = "gateway")]
fn cmd_gateway(config: &Config, settings: GatewaySettings, link_addr: Option<String>) -> anyhow::Result<()> {
    config.ensure_directories()?;
    let device_id = load_or_create_device_id(&config.data_path)?;
    let telemetry = Arc::new(Telemetry::new(device_id.clone()));
    let screen: Arc<dyn Screen> = Arc::new(LogScreen::new());
    let actions: Arc<dyn DeviceActions> = Arc::new(CredentialStore::new(&config.data_path));
    let relay = Arc::new(RelayClient::new(RelayConfig::from_settings(&settings)));

    println!("Keyrelay gateway v{VERSION}");
    println!();
    println!("  Device ID: {device_id}");
    println!("  Relay: {}", relay.config().event_url());
    println!("  Link: {}", link_addr.as_deref().unwrap_or("stdin"));

    runtime()?.block_on(async move {
        match relay.test_connection().await {
            Ok(true) => println!("  Host connection: OK"),
            Ok(false) => eprintln!("Warning: Host health check failed"),
            Err(e) => eprintln!("Warning: Could not connect to host: {e}"),
        }

        let api_state = Arc::new(ApiState {
            screen: screen.clone(),
            telemetry: telemetry.clone(),
        });
        let api_addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
        let (api_addr, api_shutdown) = api::serve(api_addr, api_state).await?;
        println!("  Device surface: http://{api_addr}");
        println!();

        let gateway = GatewayRuntime::new(settings, relay, telemetry, screen, actions);
        let end = match link_addr {
            Some(addr) => {
                let stream = tokio::net::TcpStream::connect(&addr).await?;
                gateway.run(stream, shutdown_signal()).await?
            }
            None => gateway.run(tokio::io::stdin(), shutdown_signal()).await?,
        };
        let _ = api_shutdown.send(());

        match end {
            SessionEnd::FactoryReset => {
                println!("Credentials cleared. Restart the gateway to provision again.")
            }
            SessionEnd::LinkClosed => println!("Link closed."),
            SessionEnd::Shutdown => println!("Gateway stopped."),
        }
        Ok(())
    })
}

#[cfg(not(feature = "gateway"))]
fn cmd_gateway(_config: &Config, _settings: GatewaySettings, _link_addr: Option<String>) -> anyhow::Result<()> {
    anyhow::bail!("gateway feature not enabled at compile time")
}

#[cfg(feature = "gateway")]
fn cmd_simulate(
    settings: GatewaySettings,
    presses: Vec<ScriptedPress>,
    mode: &str,
    gap: Duration,
) -> anyhow::Result<()> {
    use keyrelay::sensor::ScriptedSensor;

    let mode: ReliabilityMode = mode.parse().map_err(anyhow::Error::msg)?;
    let device_id = format!("sim-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let telemetry = Arc::new(Telemetry::new(device_id.clone()));
    let screen: Arc<dyn Screen> = Arc::new(LogScreen::new());
    let actions: Arc<dyn DeviceActions> =
        Arc::new(CredentialStore::new(&std::env::temp_dir().join("keyrelay-sim")));
    let relay = Arc::new(RelayClient::new(RelayConfig::from_settings(&settings)));

    println!("Keyrelay simulation v{VERSION}");
    println!();
    println!("  Device ID: {device_id}");
    println!("  Relay: {} ({mode})", relay.config().event_url());
    println!("  Presses: {}", presses.len());
    println!();

    let mode_key = match mode {
        ReliabilityMode::Legacy => settings.legacy_key,
        ReliabilityMode::Confirmed => settings.confirmed_key,
    };
    let boot_wait = settings.reset_window + Duration::from_millis(100);
    let debounce_ms = settings.debounce_ms;

    runtime()?.block_on(async move {
        let (mut link_tx, link_rx) = tokio::io::duplex(1024);

        let sensor = tokio::spawn(async move {
            let mut sensor = ScriptedSensor::new(debounce_ms);
            sensor.run_for(&mut link_tx, boot_wait).await?;

            let mut script = vec![ScriptedPress {
                key: mode_key,
                hold: Duration::from_millis(50),
            }];
            script.extend(presses);
            sensor.play(&mut link_tx, &script, gap).await
        });

        let gateway = GatewayRuntime::new(settings, relay, telemetry.clone(), screen, actions);
        let end = gateway.run(link_rx, shutdown_signal()).await?;
        sensor.await??;

        let snapshot = telemetry.snapshot();
        println!();
        println!("Simulation finished ({end:?})");
        println!("  Last sequence: {}", snapshot.last_seq);
        if let Some(ack) = snapshot.last_ack {
            println!("  Last acknowledged: {ack}");
        }
        println!(
            "  Last delivery: {}",
            match snapshot.last_post_ok {
                Some(true) => "ok",
                Some(false) => "failed",
                None => "none",
            }
        );
        Ok(())
    })
}

#[cfg(not(feature = "gateway"))]
fn cmd_simulate(
    _settings: GatewaySettings,
    _presses: Vec<ScriptedPress>,
    _mode: &str,
    _gap: Duration,
) -> anyhow::Result<()> {
    anyhow::bail!("gateway feature not enabled at compile time")
}

fn cmd_config(config: &Config, path: Option<&Path>, save: bool) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    match path {
        Some(path) => println!("Config file: {path:?}"),
        None => println!("Config file: {:?}", Config::config_path()),
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );

    if save {
        config.save()?;
        println!();
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(())
}

#[cfg(feature = "gateway")]
fn cmd_health(config: &Config, url: Option<String>) -> anyhow::Result<()> {
    let url = url.unwrap_or_else(|| RelayConfig::from_settings(&config.gateway).health_url());

    runtime()?.block_on(async move {
        let response = reqwest::get(&url).await?;
        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        println!("Host health: {url}");
        println!("  Status: {status}");
        println!("{}", serde_json::to_string_pretty(&body)?);
        if !status.is_success() {
            anyhow::bail!("host reported {status}");
        }
        Ok(())
    })
}

#[cfg(not(feature = "gateway"))]
fn cmd_health(_config: &Config, _url: Option<String>) -> anyhow::Result<()> {
    anyhow::bail!("gateway feature not enabled at compile time")
}
