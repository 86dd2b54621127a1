//! STTP demo transport binary.
//!
//! Thin process wrapper around the tunnel engine: key generation plus a
//! blocking TCP sender and receiver. The engine only sees a byte source, a
//! byte sink, and a diagnostic log sink; everything socket-shaped lives
//! here.
//!
//! # Usage
//!
//! ```bash
//! # Generate a key pair shared by both endpoints
//! sttp keygen --msg-capacity 16 --dir ./keys
//!
//! # One side serves a message...
//! sttp serve --bind 127.0.0.1:4097 --keys ./keys --message "over the pad"
//!
//! # ...the other connects and receives it
//! sttp connect --addr 127.0.0.1:4097 --keys ./keys
//! ```

use std::{
    error::Error,
    fs::File,
    io::{self, Write},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use sttp_core::{KeyMaterial, Tunnel};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// STTP tunnel demo
#[derive(Parser, Debug)]
#[command(name = "sttp")]
#[command(about = "Sequential two-times pad tunnel over TCP")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh key pair for both lanes
    Keygen {
        /// Plaintext bytes per chest
        #[arg(long)]
        msg_capacity: Option<usize>,

        /// On-wire chest size in bytes (overrides --msg-capacity)
        #[arg(long)]
        chest_size: Option<usize>,

        /// Key length in bytes (overrides both size options)
        #[arg(long)]
        length: Option<usize>,

        /// Directory for local.key and remote.key
        #[arg(long, default_value = ".sttp/keys")]
        dir: PathBuf,
    },

    /// Accept connections and send a message through each
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:4097")]
        bind: String,

        /// Key directory holding local.key and remote.key
        #[arg(long, default_value = ".sttp/keys")]
        keys: PathBuf,

        /// Message to send to each peer
        #[arg(long, default_value = "sequential two-times pad says hello")]
        message: String,

        /// Engine diagnostic log file
        #[arg(long, default_value = "sttp-serve.log")]
        log_file: PathBuf,
    },

    /// Connect, receive one message, and print it
    Connect {
        /// Address to dial
        #[arg(long, default_value = "127.0.0.1:4097")]
        addr: String,

        /// Key directory holding local.key and remote.key
        #[arg(long, default_value = ".sttp/keys")]
        keys: PathBuf,

        /// Engine diagnostic log file
        #[arg(long, default_value = "sttp-connect.log")]
        log_file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Keygen { msg_capacity, chest_size, length, dir } => {
            keygen(msg_capacity, chest_size, length, &dir)
        },
        Command::Serve { bind, keys, message, log_file } => {
            serve(&bind, &keys, message.as_bytes(), &log_file)
        },
        Command::Connect { addr, keys, log_file } => connect(&addr, &keys, &log_file),
    }
}

fn keygen(
    msg_capacity: Option<usize>,
    chest_size: Option<usize>,
    length: Option<usize>,
    dir: &Path,
) -> Result<(), Box<dyn Error>> {
    for name in ["local.key", "remote.key"] {
        let mut builder = KeyMaterial::builder();
        if let Some(n) = msg_capacity {
            builder = builder.msg_capacity(n)?;
        }
        if let Some(n) = chest_size {
            builder = builder.chest_size(n)?;
        }
        if let Some(l) = length {
            builder = builder.length(l)?;
        }

        let key = builder.backing_file(dir.join(name))?.build();
        key.save()?;

        tracing::info!(
            path = %dir.join(name).display(),
            len = key.len(),
            msg_capacity = key.msg_capacity(),
            chest_size = key.chest_size(),
            "key written"
        );
    }

    tracing::info!("copy both key files to the peer before the first session");
    Ok(())
}

fn serve(
    bind: &str,
    keys: &Path,
    message: &[u8],
    log_file: &Path,
) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(bind)?;
    tracing::info!(%bind, "listening");

    // Sessions run one at a time: every connection continues the same key
    // files, so the ratchet must advance sequentially.
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(%error, "accept failed");
                continue;
            },
        };

        if let Err(error) = serve_one(stream, keys, message, log_file) {
            tracing::warn!(%error, "session failed");
        }
    }

    Ok(())
}

fn serve_one(
    stream: TcpStream,
    keys: &Path,
    message: &[u8],
    log_file: &Path,
) -> Result<(), Box<dyn Error>> {
    let peer = stream.peer_addr()?;
    tracing::info!(%peer, "session opened");

    let mut tunnel = Tunnel::builder(stream.try_clone()?, stream, open_log(log_file)?)
        .local_key(KeyMaterial::load(keys.join("local.key"))?)
        .remote_key(KeyMaterial::load(keys.join("remote.key"))?)
        .build()?;

    tunnel.send(message)?;
    if !tunnel.close() {
        tracing::warn!(%peer, "close reported a failure; key files may be stale");
    }

    tracing::info!(%peer, bytes = message.len(), "session closed");
    Ok(())
}

fn connect(addr: &str, keys: &Path, log_file: &Path) -> Result<(), Box<dyn Error>> {
    let stream = TcpStream::connect(addr)?;
    tracing::info!(%addr, "connected");

    let mut tunnel = Tunnel::builder(stream.try_clone()?, stream, open_log(log_file)?)
        .local_key(KeyMaterial::load(keys.join("local.key"))?)
        .remote_key(KeyMaterial::load(keys.join("remote.key"))?)
        .build()?;

    let message = tunnel.receive()?;
    if !tunnel.close() {
        tracing::warn!("close reported a failure; key files may be stale");
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(&message)?;
    stdout.write_all(b"\n")?;
    stdout.flush()?;

    Ok(())
}

fn open_log(path: &Path) -> io::Result<File> {
    File::options().create(true).append(true).open(path)
}
