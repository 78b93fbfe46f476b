use bluer::rfcomm::{Listener, SocketAddr};
use bluer::Address;
use clap::Parser;
use device_link_shared::{codec, commands::DeviceCommand, link};
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "peripheral-sim", about = "Two-output peripheral simulator")]
struct Args {
    /// TCP address to listen on
    #[arg(long, default_value = link::SIMULATION_ADDRESS)]
    listen: String,

    /// Listen on this RFCOMM channel instead of TCP
    #[arg(long)]
    rfcomm_channel: Option<u8>,
}

/// Output levels of the simulated device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Outputs {
    output1: bool,
    output2: bool,
}

impl Outputs {
    /// Apply every recognised command byte; returns the bytes that were not commands
    fn apply(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut unknown = Vec::new();
        for &byte in payload {
            match DeviceCommand::from_byte(byte) {
                Some(command) => match command.target() {
                    (1, level) => self.output1 = level,
                    (_, level) => self.output2 = level,
                },
                None => unknown.push(byte),
            }
        }
        unknown
    }
}

impl fmt::Display for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = |on: bool| if on { "on" } else { "off" };
        write!(f, "output1={} output2={}", level(self.output1), level(self.output2))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let outputs = Arc::new(Mutex::new(Outputs::default()));

    match args.rfcomm_channel {
        Some(channel) => serve_rfcomm(channel, outputs).await,
        None => serve_tcp(&args.listen, outputs).await,
    }
}

async fn serve_tcp(address: &str, outputs: Arc<Mutex<Outputs>>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!("[SIM] Listening on tcp://{}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("[SIM] Connection from {}", addr);
        let outputs = outputs.clone();
        tokio::spawn(async move {
            serve_stream(socket, &addr.to_string(), outputs).await;
        });
    }
}

async fn serve_rfcomm(channel: u8, outputs: Arc<Mutex<Outputs>>) -> anyhow::Result<()> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let listener = Listener::bind(SocketAddr::new(Address::any(), channel)).await?;
    info!(
        "[SIM] Listening on {} RFCOMM channel {}",
        adapter.address().await?,
        channel
    );

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("[SIM] Connection from {}", addr.addr);
        let outputs = outputs.clone();
        tokio::spawn(async move {
            serve_stream(stream, &addr.addr.to_string(), outputs).await;
        });
    }
}

/// Read payloads from one client until it disconnects
async fn serve_stream<S>(mut stream: S, peer: &str, outputs: Arc<Mutex<Outputs>>)
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 1024];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                info!("[SIM] {} disconnected", peer);
                break;
            }
            Ok(n) => {
                let payload = &buf[..n];
                let mut outputs = outputs.lock().await;
                let unknown = outputs.apply(payload);
                info!("[SIM] {} sent {} -> {}", peer, codec::to_hex(payload), outputs);
                if !unknown.is_empty() {
                    warn!("[SIM] Ignored unknown bytes {}", codec::to_hex(&unknown));
                }
            }
            Err(e) => {
                error!("[SIM] Read error from {}: {}", peer, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_apply_commands() {
        let mut outputs = Outputs::default();
        assert!(outputs.apply(&[0x01, 0x03]).is_empty());
        assert_eq!(
            outputs,
            Outputs {
                output1: true,
                output2: true
            }
        );

        assert!(outputs.apply(&[0x04]).is_empty());
        assert!(outputs.output1);
        assert!(!outputs.output2);
    }

    #[test]
    fn test_unknown_bytes_are_reported() {
        let mut outputs = Outputs::default();
        assert_eq!(outputs.apply(&[0x00, 0x01, 0xFF]), vec![0x00, 0xFF]);
        assert!(outputs.output1);
        assert_eq!(outputs.to_string(), "output1=on output2=off");
    }

    #[tokio::test]
    async fn test_serve_stream_tracks_outputs() {
        let outputs = Arc::new(Mutex::new(Outputs::default()));
        let (mut client, server) = tokio::io::duplex(64);

        let handle = tokio::spawn(serve_stream_owned(server, outputs.clone()));
        client.write_all(&[0x03]).await.unwrap();
        client.write_all(&[0x01, 0x02]).await.unwrap();
        drop(client);
        handle.await.unwrap();

        assert_eq!(
            *outputs.lock().await,
            Outputs {
                output1: false,
                output2: true
            }
        );
    }

    async fn serve_stream_owned(stream: tokio::io::DuplexStream, outputs: Arc<Mutex<Outputs>>) {
        serve_stream(stream, "test", outputs).await;
    }
}
