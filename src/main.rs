mod adapter;
mod connection;
mod error;
mod transport;

#[cfg(test)]
mod testing;

use adapter::{AdapterGate, BluezHost, StaticHost};
use clap::Parser;
use connection::{
    BackoffPolicy, BoundedAttempts, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ExponentialBackoff, SendOutcome, TransportMode,
};
use device_link_shared::{commands::DeviceCommand, link, PeerAddress};
use error::LinkError;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use transport::{RfcommConnector, TcpConnector, TransportConnector};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "device-link", about = "Persistent command link to a two-output peripheral")]
struct Args {
    /// Hardware address of the peripheral
    #[arg(long, default_value = link::DEFAULT_PEER_ADDRESS)]
    address: String,

    /// RFCOMM channel of the peripheral's serial port service
    #[arg(long, default_value_t = link::DEFAULT_RFCOMM_CHANNEL)]
    channel: u8,

    /// Talk to the peripheral simulator over TCP instead of Bluetooth
    #[arg(long, num_args = 0..=1, default_missing_value = link::SIMULATION_ADDRESS)]
    simulate: Option<String>,

    /// Liveness probe period
    #[arg(long, default_value_t = link::RECONNECT_INTERVAL_MS)]
    reconnect_interval_ms: u64,

    /// Upper bound for a single open
    #[arg(long, default_value_t = link::CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    /// Upper bound for a single write or liveness probe
    #[arg(long, default_value_t = link::WRITE_TIMEOUT_MS)]
    write_timeout_ms: u64,

    /// Back off exponentially between failed reopens, up to this delay
    #[arg(long)]
    max_backoff_ms: Option<u64>,

    /// Stop reconnecting after this many failed reopens
    #[arg(long, conflicts_with = "max_backoff_ms")]
    max_reconnect_attempts: Option<u32>,
}

impl Args {
    fn config(&self) -> ConnectionConfig {
        let base = match &self.simulate {
            Some(address) => ConnectionConfig::simulation(address.clone()),
            None => ConnectionConfig {
                peer: PeerAddress::new(self.address.clone()),
                transport: TransportMode::Rfcomm {
                    channel: self.channel,
                },
                ..Default::default()
            },
        };
        ConnectionConfig {
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            ..base
        }
    }

    /// Reopen policy chosen on the command line; None keeps the fixed interval
    fn policy(&self) -> Option<Box<dyn BackoffPolicy>> {
        let period = Duration::from_millis(self.reconnect_interval_ms);
        match (self.max_backoff_ms, self.max_reconnect_attempts) {
            (Some(max), _) => Some(Box::new(ExponentialBackoff {
                initial: period,
                max: Duration::from_millis(max).max(period),
            })),
            (None, Some(max_attempts)) => Some(Box::new(BoundedAttempts {
                period,
                max_attempts,
            })),
            (None, None) => None,
        }
    }
}

/// A line typed on the operator console
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Connect,
    Close,
    State,
    Quit,
    Help,
    Send(String),
    Empty,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_ascii_lowercase().as_str() {
            "" => ConsoleCommand::Empty,
            "connect" => ConsoleCommand::Connect,
            "close" => ConsoleCommand::Close,
            "state" => ConsoleCommand::State,
            "quit" | "exit" => ConsoleCommand::Quit,
            "help" | "?" => ConsoleCommand::Help,
            other => match DeviceCommand::from_alias(other) {
                Some(command) => ConsoleCommand::Send(command.hex().to_string()),
                None => ConsoleCommand::Send(line.to_string()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.config();
    let policy = args.policy();

    info!("Device link starting");
    info!("  Peer: {}", config.peer);
    info!("  Transport: {:?}", config.transport);
    info!("  Probe interval: {:?}", config.reconnect_interval);

    let mut conn = match config.transport {
        TransportMode::Rfcomm { channel } => {
            if !config.peer.is_hardware_address() {
                warn!("{} does not look like a Bluetooth address", config.peer);
            }
            let connector = Arc::new(RfcommConnector::new(channel));
            info!("  RFCOMM channel: {}", connector.channel());
            let gate = AdapterGate::from_host(Arc::new(BluezHost::new()));
            build_manager(config, gate, connector, policy)
        }
        TransportMode::TcpSimulation => {
            let gate = AdapterGate::from_host(Arc::new(StaticHost::ready()));
            build_manager(config, gate, Arc::new(TcpConnector), policy)
        }
    };

    conn.connect().await?;

    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    print_help();

    // Main event loop
    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(event) => log_event(&event),
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },

            line = line_rx.recv() => {
                let Some(line) = line else {
                    info!("Console input closed");
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    ConsoleCommand::Connect => conn.connect().await?,
                    ConsoleCommand::Close => conn.close().await?,
                    ConsoleCommand::State => info!("{}: {}", conn.peer(), conn.state()),
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::Help => print_help(),
                    ConsoleCommand::Empty => {}
                    ConsoleCommand::Send(hex) => match conn.send(&hex).await {
                        Ok(SendOutcome::Written) => {}
                        Ok(SendOutcome::Dropped { state }) => {
                            warn!("Not connected ({}), {} dropped", state, hex);
                        }
                        Ok(SendOutcome::WriteFailed) => warn!("Write of {} failed", hex),
                        Err(e) => warn!("{}", e),
                    },
                }
            }
        }
    }

    conn.close().await?;
    while let Some(event) = conn.try_recv() {
        log_event(&event);
    }
    Ok(())
}

fn build_manager<C: TransportConnector>(
    config: ConnectionConfig,
    gate: AdapterGate,
    connector: Arc<C>,
    policy: Option<Box<dyn BackoffPolicy>>,
) -> ConnectionManager {
    match policy {
        Some(policy) => ConnectionManager::with_policy(config, gate, connector, policy),
        None => ConnectionManager::new(config, gate, connector),
    }
}

fn print_help() {
    let aliases: Vec<String> = device_link_shared::commands::ALL
        .iter()
        .map(|c| format!("{}={}", c.alias(), c.hex()))
        .collect();
    info!(
        "Commands: connect | close | state | quit | {} | <hex>",
        aliases.join(" | ")
    );
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::StateChanged { .. } => {}
        ConnectionEvent::Connected { peer } => info!("Connected to {}", peer),
        ConnectionEvent::ConnectionFailed { reason } => error!("Connection failed: {}", reason),
        ConnectionEvent::AuthorizationDenied => error!("{}", LinkError::AuthorizationDenied),
        ConnectionEvent::RadioDeclined => error!("{}", LinkError::RadioDisabledDeclined),
        ConnectionEvent::LinkLost => warn!("Link lost"),
        ConnectionEvent::Reconnecting { attempt } => info!("Reconnecting (attempt {})", attempt),
        ConnectionEvent::ReconnectAbandoned { attempts } => {
            error!("Gave up reconnecting after {} attempts", attempts)
        }
        ConnectionEvent::WriteFailed { reason } => warn!("Write failed: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_parse() {
        assert_eq!(ConsoleCommand::parse("connect"), ConsoleCommand::Connect);
        assert_eq!(ConsoleCommand::parse(" CLOSE "), ConsoleCommand::Close);
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Empty);
        assert_eq!(
            ConsoleCommand::parse("2on"),
            ConsoleCommand::Send("03".to_string())
        );
        assert_eq!(
            ConsoleCommand::parse("0a0B"),
            ConsoleCommand::Send("0a0B".to_string())
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["device-link"]);
        let config = args.config();
        assert_eq!(config.peer, PeerAddress::default());
        assert_eq!(
            config.transport,
            TransportMode::Rfcomm {
                channel: link::DEFAULT_RFCOMM_CHANNEL
            }
        );
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_args_simulate() {
        let args = Args::parse_from(["device-link", "--simulate"]);
        let config = args.config();
        assert_eq!(config.transport, TransportMode::TcpSimulation);
        assert_eq!(config.peer.as_str(), link::SIMULATION_ADDRESS);

        let args = Args::parse_from(["device-link", "--simulate", "10.0.0.2:9100"]);
        assert_eq!(args.config().peer.as_str(), "10.0.0.2:9100");
    }

    #[test]
    fn test_args_policy() {
        let args = Args::parse_from(["device-link"]);
        assert!(args.policy().is_none());
        assert_eq!(args.config().write_timeout, Duration::from_secs(2));

        let args = Args::parse_from(["device-link", "--max-backoff-ms", "60000"]);
        let mut policy = args.policy().expect("backoff policy");
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(10), Some(Duration::from_secs(60)));

        let args = Args::parse_from(["device-link", "--max-reconnect-attempts", "3"]);
        let mut policy = args.policy().expect("bounded policy");
        assert_eq!(policy.next_delay(3), None);
    }
}
