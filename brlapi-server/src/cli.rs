//! Host-process CLI (spec.md §6): `auth=` and `host=` are the two
//! parameters the core itself is driven by; the remaining flags are
//! this host binary's own concern (which driver process to dial, how
//! to log), not part of the core's contract.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "brlapi-server", about = "BrlAPI server core")]
pub struct Cli {
    /// `+`-separated list of auth methods to offer, e.g. `none+keyfile:/etc/brlapi.key`.
    #[arg(long, default_value = "none")]
    pub auth: String,

    /// `+`-separated list of listen endpoints, e.g. `127.0.0.1:4101+/var/run/BrlAPI`.
    #[arg(long, default_value = "127.0.0.1:4101")]
    pub host: String,

    /// Unix-domain socket the true driver process is listening on.
    #[arg(long, default_value = "/var/run/brlapi-driver.sock")]
    pub driver_socket: PathBuf,

    #[arg(long, default_value_t = 40)]
    pub display_size: usize,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}
