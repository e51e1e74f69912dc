//! rps - peer-to-peer rock-paper-scissors node
//!
//! ## Usage
//!
//! ```bash
//! # create key files under ./resources
//! rps keygen --key boot
//! rps keygen --key alice
//!
//! # start the well-known bootstrap node, note the printed id@addr
//! rps bootstrap --port 30000 --key boot
//!
//! # start a player against it
//! rps play --port 30001 --key alice --bootstrap <ID>@127.0.0.1:30000
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::{rngs::StdRng, SeedableRng};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use rps_p2p::{
    move_buffer, BootstrapAddr, BootstrapNode, Identity, PlayerNode, Session, Timing, KEY_DIR,
};

/// how long a finished player waits for the opponent to read the last move
const LINGER: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rps")]
#[command(about = "Peer-to-peer rock-paper-scissors over iroh")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the well-known bootstrap node (never plays)
    Bootstrap {
        /// UDP port to listen on
        #[arg(short, long)]
        port: u16,

        /// Key file name (without extension)
        #[arg(short, long)]
        key: String,

        /// Directory holding key files
        #[arg(long, default_value = KEY_DIR)]
        key_dir: PathBuf,

        /// JSON file with timing overrides
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Join the network and play one match
    Play {
        /// UDP port to listen on
        #[arg(short, long)]
        port: u16,

        /// Key file name (without extension)
        #[arg(short, long)]
        key: String,

        /// Bootstrap node as <peer id>@<ip:port>
        #[arg(short, long)]
        bootstrap: BootstrapAddr,

        /// Address other players should dial (default 127.0.0.1:<port>)
        #[arg(long)]
        advertise: Option<SocketAddr>,

        /// Directory holding key files
        #[arg(long, default_value = KEY_DIR)]
        key_dir: PathBuf,

        /// JSON file with timing overrides
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate a new key pair
    Keygen {
        /// Key file name (without extension)
        #[arg(short, long)]
        key: String,

        /// Directory to write key files to
        #[arg(long, default_value = KEY_DIR)]
        key_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing, RUST_LOG wins over -v
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("rps={level},rps_p2p={level},iroh=warn").into()),
        )
        .init();

    match cli.command {
        Commands::Bootstrap {
            port,
            key,
            key_dir,
            config,
        } => run_bootstrap(port, &key, &key_dir, config.as_deref()).await,
        Commands::Play {
            port,
            key,
            bootstrap,
            advertise,
            key_dir,
            config,
        } => run_player(port, &key, bootstrap, advertise, &key_dir, config.as_deref()).await,
        Commands::Keygen { key, key_dir } => run_keygen(&key, &key_dir),
    }
}

fn load_timing(path: Option<&Path>) -> Result<Timing> {
    match path {
        Some(path) => Timing::load(path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(Timing::default()),
    }
}

fn load_identity(key_dir: &Path, key: &str) -> Result<Identity> {
    Identity::load(key_dir, key).with_context(|| format!("loading key {:?} from {}", key, key_dir.display()))
}

async fn run_bootstrap(port: u16, key: &str, key_dir: &Path, config: Option<&Path>) -> Result<()> {
    // bootstrap only needs the config to reject a bad file early
    load_timing(config)?;
    let identity = load_identity(key_dir, key)?;

    let node = BootstrapNode::bind(&identity, port)
        .await
        .context("binding bootstrap endpoint")?;
    let addr = BootstrapAddr {
        id: node.id(),
        addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
    };
    info!("bootstrap address: {}", addr);

    tokio::select! {
        result = node.run() => result.context("bootstrap node stopped")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    node.close().await;
    Ok(())
}

async fn run_player(
    port: u16,
    key: &str,
    bootstrap: BootstrapAddr,
    advertise: Option<SocketAddr>,
    key_dir: &Path,
    config: Option<&Path>,
) -> Result<()> {
    let timing = load_timing(config)?;
    let identity = load_identity(key_dir, key)?;
    let advertise = advertise.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::LOCALHOST, port)));

    let node = PlayerNode::bind(&identity, port, bootstrap, vec![advertise], timing.lookup_timeout)
        .await
        .context("binding player endpoint")?;

    let (sink, inbox) = move_buffer();
    let acceptor = node.serve_moves(sink);
    let session = Session::new(&node, inbox, bootstrap.id, timing, StdRng::from_entropy());

    let outcome = tokio::select! {
        result = session.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    node.shutdown(LINGER).await;
    acceptor.abort();

    match outcome {
        Some(Ok(report)) => {
            info!(
                "match against {} over after {} rounds: you {}",
                report.opponent,
                report.rounds.len(),
                report.verdict
            );
            Ok(())
        }
        Some(Err(e)) => Err(e).context("match aborted"),
        None => {
            warn!("interrupted before the match finished");
            bail!("interrupted")
        }
    }
}

fn run_keygen(key: &str, key_dir: &Path) -> Result<()> {
    let identity = Identity::generate();
    identity
        .save(key_dir, key)
        .with_context(|| format!("writing key {:?} to {}", key, key_dir.display()))?;
    println!("{}", identity.peer_id().to_hex());
    Ok(())
}
