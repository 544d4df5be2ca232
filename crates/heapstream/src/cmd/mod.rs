use clap::{Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod recv;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send items as a heap stream.
    Send(SendArgs),
    /// Receive a heap stream and print the items it carried.
    Recv(RecvArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Recv(args) => recv::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// One packet per datagram.
    #[default]
    Udp,
    /// Packets back to back on a single connection.
    Tcp,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Receiver address (host:port).
    pub addr: String,
    /// Item to send, as ID:TYPE[:SHAPE]=VALUES (e.g. 0x1001:i32:2x2=1,2,3,4).
    /// Byte items accept text with a `str:` prefix.
    #[arg(long = "item", value_name = "SPEC", required = true)]
    pub items: Vec<String>,
    /// Item names, in the order of --item. Unnamed items are called item_<id>.
    #[arg(long = "name", value_name = "NAME")]
    pub names: Vec<String>,
    /// Transport to send over.
    #[arg(long, value_enum, default_value_t = TransportKind::Udp)]
    pub transport: TransportKind,
    /// Send rate in bytes per second (0 = unlimited).
    #[arg(long, default_value_t = 0.0)]
    pub rate: f64,
    /// Bytes sent back to back before pacing.
    #[arg(long, default_value_t = 65536)]
    pub burst_size: usize,
    /// Maximum packet size in bytes.
    #[arg(long, default_value_t = 1472)]
    pub max_packet_size: usize,
    /// Number of heaps to send; every heap carries all item values.
    #[arg(long, default_value_t = 1)]
    pub repeat: u64,
    /// Repeat all descriptors every N heaps.
    #[arg(long, value_name = "N")]
    pub descriptor_every: Option<u64>,
}

#[derive(Args, Debug)]
pub struct RecvArgs {
    /// Address to bind (host:port).
    pub bind: String,
    /// Transport to receive on.
    #[arg(long, value_enum, default_value_t = TransportKind::Udp)]
    pub transport: TransportKind,
    /// Incomplete heaps tracked at once.
    #[arg(long, default_value_t = 4)]
    pub max_heaps: usize,
    /// Stop after N heaps instead of waiting for the end of the stream.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
