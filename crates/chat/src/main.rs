use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use keying::{KeyPair, OsBitSource, PublicKey};
use protocol::{handshake, EncryptedChannel, HandshakeConfig, Role};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Listen for a peer and wait for its announcement.
    Server,
    /// Connect to a peer and announce our key.
    Client,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Byte-wise RSA-encrypted chat over TCP", long_about = None)]
struct Args {
    /// Operating role
    #[arg(long)]
    mode: Mode,

    /// Host to connect to (client) or bind (server)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number
    #[arg(long, default_value = "8301")]
    port: u16,

    /// Handshake reply timeout in milliseconds
    #[arg(long, default_value = "1000")]
    handshake_timeout_ms: u64,

    /// Give up the handshake after this many attempts (default: retry forever)
    #[arg(long)]
    max_handshake_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
    let args = Args::parse();

    info!("Welcome to RSA Chat!");
    match args.mode {
        Mode::Server => info!("Server"),
        Mode::Client => info!("Client"),
    }

    let mut bits = OsBitSource::new();
    let keys = KeyPair::generate(&mut bits).context("local key generation failed")?;

    let addr = format!("{}:{}", args.host, args.port);
    let mut stream = match args.mode {
        Mode::Server => accept_one(&addr).await?,
        Mode::Client => connect_with_retry(&addr).await?,
    };
    // Frames are single bytes and 4-byte units; don't let Nagle hold them.
    stream.set_nodelay(true)?;

    let cfg = HandshakeConfig {
        reply_timeout: Duration::from_millis(args.handshake_timeout_ms),
        max_attempts: args.max_handshake_attempts,
    };
    let role = match args.mode {
        Mode::Server => Role::Server,
        Mode::Client => Role::Client,
    };
    let outcome = handshake::run(&mut stream, role, keys.public(), &cfg)
        .await
        .context("handshake failed")?;
    display_keys(&keys, &outcome.peer);

    let (mut rx, mut tx) = stream.into_split();
    let channel = EncryptedChannel::new(keys, outcome.peer);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    channel
        .run(&mut rx, &mut tx, &mut stdin, &mut stdout)
        .await
        .context("conversation ended with a transport error")?;

    info!("session closed");
    Ok(())
}

async fn accept_one(addr: &str) -> Result<TcpStream> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening for a peer");
    let (stream, peer_addr) = listener.accept().await.context("accept failed")?;
    info!(%peer_addr, "peer connected");
    Ok(stream)
}

/// The client keeps announcing itself until a server shows up; the TCP
/// analogue is retrying the connect.
async fn connect_with_retry(addr: &str) -> Result<TcpStream> {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(%addr, "connected to peer");
                return Ok(stream);
            }
            Err(err) => {
                warn!(%err, %addr, "connect failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

fn display_keys(keys: &KeyPair, peer: &PublicKey) {
    info!(modulus = keys.n, public = keys.e, private = keys.d, "my keys");
    info!(
        public = peer.exponent,
        modulus = peer.modulus,
        "peer public key"
    );
    info!("Ready to talk");
}
