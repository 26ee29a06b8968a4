//! Thin demo binary that exercises the mental-poker core end to end over
//! a real TCP socket. It is not a card game — it has no rules, no turn
//! order, no scoring — it shuffles a fixed deck with a peer, draws every
//! card, and prints what it saw. See spec.md §6.3.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mental_poker::card::CardFace;
use mental_poker::deck::Deck;

const LOG_TARGET: &str = "bin::mental_poker_cli";
const DEFAULT_PORT: u16 = 7733;

/// The deck dealt by the demo. Real games supply their own faces; this
/// binary's job is to prove the handshake and reveal path work, not to
/// specify a card game.
const DEMO_FACES: &[&str] = &["ACE", "KING", "QUEEN", "JACK"];

#[derive(Debug, Parser)]
#[command(name = "mental_poker_cli")]
#[command(about = "Run a two-peer mental poker handshake and reveal over TCP", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for a peer and deal the demo deck once they connect.
    Host {
        /// Address to bind, e.g. ":7733" or "127.0.0.1:7733".
        #[arg(default_value_t = default_bind())]
        bind: String,
    },
    /// Connect to a host and wait for its deal.
    Join {
        /// Address to dial, e.g. "127.0.0.1:7733".
        addr: String,
    },
}

fn default_bind() -> String {
    format!(":{DEFAULT_PORT}")
}

/// Accepts a Go-style `:7733` shorthand as well as a full `host:port`.
fn parse_addr(raw: &str) -> Result<SocketAddr> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("127.0.0.1:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .with_context(|| format!("invalid address {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Host { bind } => run_host(&bind).await,
        Command::Join { addr } => run_join(&addr).await,
    };

    if let Err(err) = &result {
        tracing::error!(target: LOG_TARGET, error = %err, "mental_poker_cli failed");
    }
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

async fn run_host(bind: &str) -> Result<()> {
    let addr = parse_addr(bind)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(target: LOG_TARGET, %addr, "listening for a peer");

    let (socket, peer) = listener
        .accept()
        .await
        .context("failed to accept incoming connection")?;
    info!(target: LOG_TARGET, %peer, "peer connected");

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let deck = Deck::new(Box::new(socket), shutdown_rx);

    let faces: Vec<CardFace> = DEMO_FACES.iter().map(|s| CardFace::from(*s)).collect();
    deck.start(faces).await.context("handshake failed")?;
    info!(target: LOG_TARGET, "handshake complete, deck is ready");

    reveal_and_print(&deck).await?;
    deck.quit().await.ok();
    Ok(())
}

async fn run_join(addr: &str) -> Result<()> {
    let addr = parse_addr(addr)?;
    let socket = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to dial {addr}"))?;
    info!(target: LOG_TARGET, %addr, "connected to host");

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let deck = Deck::new(Box::new(socket), shutdown_rx);

    // The joining peer is passive: its request-serializer task reacts to
    // the incoming START_DECK automatically. Wait for it to reach READY
    // by polling size() until it stops returning 0, then proceed.
    wait_until_ready(&deck).await?;
    info!(target: LOG_TARGET, "handshake complete, deck is ready");

    reveal_and_print(&deck).await?;
    deck.quit().await.ok();
    Ok(())
}

async fn wait_until_ready(deck: &Deck) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if deck.size().await.unwrap_or(0) > 0 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out waiting for the host's deal");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn reveal_and_print(deck: &Deck) -> Result<()> {
    let size = deck.size().await?;
    for i in 0..size {
        let face = deck.draw(i).await.with_context(|| format!("draw({i}) failed"))?;
        println!("card {i}: {}", String::from_utf8_lossy(face.as_bytes()));
    }
    Ok(())
}
