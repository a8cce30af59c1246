//! Server configuration: CLI surface and validation.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

use crate::error::ConfigError;

/// Default maximum advertised space, in bytes (50 MiB).
pub const DEFAULT_MAX_SPACE: u64 = 52_428_800;
/// Default handshake timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;

/// A node in the group file-sharing network: advertises the contents
/// of a shared folder over UDP multicast and serves/accepts file
/// transfers over ephemeral TCP connections.
#[derive(Parser, Debug)]
#[command(name = "sharenode", version, about)]
struct Cli {
    /// IPv4 multicast group address for the command channel.
    #[arg(short = 'g', long = "mcast-addr")]
    mcast_addr: String,

    /// UDP port the command channel is bound to.
    #[arg(short = 'p', long = "cmd-port")]
    cmd_port: u16,

    /// Maximum advertised space, in bytes.
    #[arg(short = 'b', long = "max-space", default_value_t = DEFAULT_MAX_SPACE)]
    max_space: u64,

    /// Directory whose top-level files this node serves.
    #[arg(short = 'f', long = "shrd-fldr")]
    shared_folder: PathBuf,

    /// Handshake timeout, in seconds (1..=300).
    #[arg(short = 't', long = "timeout", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

/// Immutable, validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mcast_addr: Ipv4Addr,
    pub cmd_port: u16,
    pub max_space: u64,
    pub shared_folder: PathBuf,
    pub timeout_secs: u64,
}

impl ServerConfig {
    /// Parse `argv` and validate every field, producing the specific
    /// [`ConfigError`] for whichever check failed first.
    pub fn from_args() -> Result<ServerConfig, ConfigError> {
        let cli = Cli::parse();
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Result<ServerConfig, ConfigError> {
        let mcast_addr = cli
            .mcast_addr
            .parse::<Ipv4Addr>()
            .map_err(|_| ConfigError::InvalidMulticastAddr(cli.mcast_addr.clone()))?;

        if cli.cmd_port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&cli.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(cli.timeout_secs));
        }

        if !cli.shared_folder.is_dir() {
            return Err(ConfigError::BadSharedFolder(cli.shared_folder));
        }

        Ok(ServerConfig {
            mcast_addr,
            cmd_port: cli.cmd_port,
            max_space: cli.max_space,
            shared_folder: cli.shared_folder,
            timeout_secs: cli.timeout_secs,
        })
    }
}
