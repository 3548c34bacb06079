use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod keygen;
pub mod loopback;
pub mod reassemble;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a destination reference (nprofile).
    Decode(DecodeArgs),
    /// Store or generate the local private key.
    Keygen(KeygenArgs),
    /// Reassemble event contents read line by line.
    Reassemble(ReassembleArgs),
    /// Run one RPC round trip through an in-process relay.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Keygen(args) => keygen::run(args, format),
        Command::Reassemble(args) => reassemble::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Bech32 nprofile string.
    pub reference: String,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Key file to write. Without it the key is only printed.
    #[arg(long, value_name = "PATH", env = "RELAYLINK_KEY_FILE")]
    pub key_file: Option<PathBuf>,
    /// Store this hex private key instead of generating one.
    #[arg(long, value_name = "HEX", conflicts_with = "force_generate")]
    pub nsec: Option<String>,
    /// Overwrite an existing key with a freshly generated one.
    #[arg(long)]
    pub force_generate: bool,
    /// Print the private key even when writing to a file.
    #[arg(long)]
    pub show: bool,
}

#[derive(Args, Debug)]
pub struct ReassembleArgs {
    /// File with one event content per line. Reads stdin when omitted.
    pub input: Option<PathBuf>,
    /// Largest shard count a fragment may announce.
    #[arg(long, default_value_t = relaylink_shard::DEFAULT_MAX_TOTAL_SHARDS)]
    pub max_total_shards: usize,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// RPC name to call.
    #[arg(long, default_value = "Echo")]
    pub rpc: String,
    /// JSON request body.
    #[arg(long, value_name = "JSON")]
    pub body: Option<String>,
    /// Split the reply into shards of at most this many characters.
    #[arg(long, value_name = "CHARS")]
    pub shard_size: Option<usize>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
