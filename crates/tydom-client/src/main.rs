//! `tydom` command-line tool.
//!
//! Talks to a Tydom gateway on the local network: checks credentials, reads
//! device and area state, drives endpoints and prints state pushes.
//!
//! # Usage
//!
//! ```text
//! tydom [OPTIONS] <COMMAND>
//!
//! Commands:
//!   authorize    Report whether the gateway is open or secured
//!   ping         GET /ping
//!   info         GET /info
//!   devices      GET /devices/data
//!   areas        GET /areas/data
//!   get-device   GET /devices/{id}/endpoints/{id}/data
//!   set-device   PUT /devices/{id}/endpoints/{id}/data
//!   scenario     Run a scenario
//!   watch        Print state pushes until Ctrl+C
//!
//! Options:
//!   --config   <PATH>   TOML configuration file
//!   --host     <HOST>   Gateway host          [env: TYDOM_HOST]
//!   --port     <PORT>   Gateway TLS port      [env: TYDOM_PORT]
//!   --serial   <MAC>    Gateway serial        [env: TYDOM_SERIAL]
//!   --password <PASS>   Gateway password      [env: TYDOM_PASSWORD]
//! ```
//!
//! Command-line values override the configuration file.  The log level comes
//! from `RUST_LOG` when set, otherwise from `[client] log_level`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tydom_client::infrastructure::WebSocketConnector;
use tydom_client::{Body, ClientConfig, StartMode, StateEvent, TydomClient};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Command-line client for the Tydom home-automation gateway.
#[derive(Debug, Parser)]
#[command(name = "tydom", about = "Client for the Tydom home-automation gateway", version)]
struct Cli {
    /// TOML configuration file.  Missing values fall back to defaults.
    #[arg(long, env = "TYDOM_CONFIG")]
    config: Option<PathBuf>,

    /// Hostname or IP address of the gateway.
    #[arg(long, env = "TYDOM_HOST")]
    host: Option<String>,

    /// TLS port of the gateway's mediation endpoint.
    #[arg(long, env = "TYDOM_PORT")]
    port: Option<u16>,

    /// Gateway serial: the last six bytes of its MAC address, e.g. `001A25ABCDEF`.
    #[arg(long, env = "TYDOM_SERIAL")]
    serial: Option<String>,

    /// Gateway password.  Leave unset for gateways without authentication.
    #[arg(long, env = "TYDOM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether the gateway requires digest authentication.
    Authorize,
    /// Send GET /ping.
    Ping,
    /// Print gateway information.
    Info,
    /// Print the state of every device.
    Devices,
    /// Print the state of every area.
    Areas,
    /// Print one endpoint's data.
    GetDevice { device: u64, endpoint: u64 },
    /// Set one endpoint attribute.  `value` is parsed as JSON, else sent as a string.
    SetDevice {
        device: u64,
        endpoint: u64,
        name: String,
        value: String,
    },
    /// Run a scenario.
    Scenario { id: u64 },
    /// Print state pushes until Ctrl+C.
    Watch {
        /// Only print these event names (e.g. `devices_changed`).
        #[arg(long)]
        filter: Vec<String>,
    },
}

impl Cli {
    /// Loads the config file (if any) and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// result lacks a host or serial.
    fn into_client_config(self) -> anyhow::Result<(ClientConfig, Command)> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = self.host {
            config.gateway.host = host;
        }
        if let Some(port) = self.port {
            config.gateway.port = port;
        }
        if let Some(serial) = self.serial {
            config.gateway.serial = serial;
        }
        if self.password.is_some() {
            config.gateway.password = self.password;
        }
        config.validate().context("incomplete gateway configuration")?;
        Ok((config, self.command))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, command) = Cli::parse().into_client_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    let connector = WebSocketConnector::new(&config).context("building TLS connector")?;
    let client = TydomClient::with_connector(config, Arc::new(connector))?;

    let result = run(&client, command).await;
    client.stop().await;
    result
}

async fn run(client: &TydomClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Authorize => {
            let gateway = &client.config().gateway;
            let mode = client
                .authorize(&gateway.serial, gateway.password.as_deref())
                .await?;
            println!("{mode}");
            Ok(())
        }
        Command::Watch { filter } => watch(client, filter).await,
        request => {
            client.start(StartMode::Blocking).await?;
            let body = match request {
                Command::Ping => client.ping().await?,
                Command::Info => client.info().await?,
                Command::Devices => client.get_devices_data().await?,
                Command::Areas => client.get_areas_data().await?,
                Command::GetDevice { device, endpoint } => {
                    client.get_device_data(device, endpoint).await?
                }
                Command::SetDevice {
                    device,
                    endpoint,
                    name,
                    value,
                } => {
                    client
                        .put_device_data(device, endpoint, &name, parse_value(value))
                        .await?
                }
                Command::Scenario { id } => client.put_scenario(id).await?,
                Command::Authorize | Command::Watch { .. } => None,
            };
            print_body(body)
        }
    }
}

async fn watch(client: &TydomClient, filter: Vec<String>) -> anyhow::Result<()> {
    let filter = (!filter.is_empty()).then_some(filter);
    client
        .register_state_callback(
            |event: &StateEvent| {
                println!("{} {:?}", event.name, event.changed_ids);
                Ok(())
            },
            filter,
        )
        .await;
    client.start(StartMode::Blocking).await?;
    client.post_refresh_all().await?;

    info!("watching gateway pushes, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl+C")?;
    Ok(())
}

/// Interprets `raw` as JSON, falling back to a JSON string.
fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn print_body(body: Option<Body>) -> anyhow::Result<()> {
    match body {
        Some(Body::Json(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Some(Body::Text(text)) => println!("{text}"),
        Some(Body::Empty) => println!("(empty response)"),
        None => anyhow::bail!("no response from gateway within the request budget"),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
