//! Entry point for `files-over-udp`.
//!
//! Parses CLI arguments and dispatches into **server**, **upload** or
//! **download** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::Rng;

use files_over_udp::simulator::{Simulator, SimulatorConfig};
use files_over_udp::storage::DirStore;
use files_over_udp::{
    Client, ClientConfig, RetryPolicy, Server, ServerConfig, Socket, Transport, MAX_SEQ,
};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Tuning {
    /// Receive window per attempt, in milliseconds (default: 1000 client, 2000 server).
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Transmissions per frame before giving up.
    #[arg(long, global = true, default_value_t = 5)]
    max_attempts: u32,

    /// Initial sequence number for client transfers.
    #[arg(
        long,
        global = true,
        default_value_t = 0,
        conflicts_with = "random_seq",
        value_parser = clap::value_parser!(u64).range(..=MAX_SEQ)
    )]
    initial_seq: u64,

    /// Pick a random initial sequence number.
    #[arg(long, global = true)]
    random_seq: bool,

    /// Drop this fraction of outbound frames (fault simulation).
    #[arg(long, global = true, default_value_t = 0.0)]
    loss_rate: f64,

    /// Seed for the fault simulator.
    #[arg(long, global = true, default_value_t = 0)]
    seed: u64,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve uploads and downloads from a directory.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Directory holding served and uploaded files.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// Send a local file to the server.
    Upload {
        #[arg(short, long)]
        server: SocketAddr,
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
    /// Fetch a file from the server into `<dir>/client_<name>`.
    Download {
        #[arg(short, long)]
        server: SocketAddr,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
    },
}

impl Tuning {
    fn policy(&self, default: RetryPolicy) -> RetryPolicy {
        let timeout = self
            .timeout_ms
            .map_or(default.timeout, Duration::from_millis);
        RetryPolicy::new(self.max_attempts, timeout)
    }

    fn client_config(&self) -> ClientConfig {
        let initial_seq = if self.random_seq {
            rand::thread_rng().gen_range(0..u64::from(u32::MAX))
        } else {
            self.initial_seq
        };
        ClientConfig::default()
            .with_retry(self.policy(RetryPolicy::INITIATOR))
            .with_initial_seq(initial_seq)
    }

    fn simulator(&self) -> Option<SimulatorConfig> {
        (self.loss_rate > 0.0).then(|| {
            SimulatorConfig::default()
                .with_loss_rate(self.loss_rate)
                .with_seed(self.seed)
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let tuning = &cli.tuning;

    match cli.mode {
        Mode::Server { bind, dir } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            let config = ServerConfig::default().with_retry(tuning.policy(RetryPolicy::RESPONDER));
            let store = DirStore::new(dir);
            log::info!("Serving {} on {}", store.root().display(), socket.local_addr);
            match tuning.simulator() {
                Some(sim) => serve(Simulator::new(socket, sim), store, config).await,
                None => serve(socket, store, config).await,
            }
        }
        Mode::Upload { server, file, bind } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            let config = tuning.client_config();
            let bytes = match tuning.simulator() {
                Some(sim) => {
                    Client::new(Simulator::new(socket, sim), server, config)
                        .upload_file(&file)
                        .await
                }
                None => Client::new(socket, server, config).upload_file(&file).await,
            }
            .with_context(|| format!("uploading {}", file.display()))?;
            println!("Uploaded {} ({bytes} bytes)", file.display());
            Ok(())
        }
        Mode::Download {
            server,
            name,
            dir,
            bind,
        } => {
            let socket = Socket::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            let config = tuning.client_config();
            let (path, bytes) = match tuning.simulator() {
                Some(sim) => {
                    Client::new(Simulator::new(socket, sim), server, config)
                        .download_file(&name, &dir)
                        .await
                }
                None => Client::new(socket, server, config).download_file(&name, &dir).await,
            }
            .with_context(|| format!("downloading {name}"))?;
            println!("Downloaded {name} to {} ({bytes} bytes)", path.display());
            Ok(())
        }
    }
}

async fn serve<T: Transport>(transport: T, store: DirStore, config: ServerConfig) -> Result<()> {
    Server::new(transport, store, config)
        .run()
        .await
        .context("server stopped")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_with_seq(seq: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from([
            "files-over-udp",
            "--initial-seq",
            seq,
            "upload",
            "--server",
            "127.0.0.1:9000",
            "--file",
            "a.txt",
        ])
    }

    #[test]
    fn initial_seq_is_limited_to_the_wire_range() {
        let cli = upload_with_seq(&MAX_SEQ.to_string()).unwrap();
        assert_eq!(cli.tuning.client_config().initial_seq, MAX_SEQ);

        assert!(upload_with_seq("9223372036854775808").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
