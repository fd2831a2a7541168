use std::path::PathBuf;

use clap::{Args, Subcommand};
use wirechan_transport::{SocketKind, WAIT_FOREVER_MS};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod echo;
pub mod limits;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve peers, replying to each string with its length.
    Echo(EchoArgs),
    /// Send one string and print the length reply.
    Send(SendArgs),
    /// Show the open-file limits channels grow into.
    Limits(LimitsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Limits(args) => limits::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Use UDP datagrams instead of a TCP stream.
    #[arg(long)]
    pub udp: bool,
    /// Expect terminator-framed strings instead of length-prefixed ones.
    #[arg(long, value_parser = non_empty)]
    pub terminator: Option<String>,
    /// Exit after answering N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up when no peer connects within this many milliseconds (-1 waits forever).
    #[arg(
        long,
        value_name = "MS",
        default_value_t = WAIT_FOREVER_MS,
        allow_negative_numbers = true
    )]
    pub accept_timeout: i64,
    /// Drop a peer that starts a message and sends nothing more for this many milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub stall_timeout: u64,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Host name or address of the echo server.
    #[arg(env = "WIRECHAN_HOST")]
    pub host: String,
    /// Port of the echo server.
    #[arg(env = "WIRECHAN_PORT")]
    pub port: u16,
    /// String to send.
    pub text: String,
    /// Use UDP datagrams instead of a TCP stream.
    #[arg(long)]
    pub udp: bool,
    /// Send the string followed by this terminator instead of a length prefix.
    #[arg(long, value_parser = non_empty)]
    pub terminator: Option<String>,
    /// Abandon the connect after this many milliseconds (-1 waits as long as the OS does).
    #[arg(
        long,
        value_name = "MS",
        default_value_t = WAIT_FOREVER_MS,
        allow_negative_numbers = true
    )]
    pub connect_timeout: i64,
    /// Maximum time to wait for the reply in milliseconds (-1 waits forever).
    #[arg(
        long,
        value_name = "MS",
        default_value_t = 5000,
        allow_negative_numbers = true
    )]
    pub wait_timeout: i64,
    /// Write a value trace to FILE.
    #[arg(long, value_name = "FILE")]
    pub trace: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct LimitsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn socket_kind(udp: bool) -> SocketKind {
    if udp {
        SocketKind::Datagram
    } else {
        SocketKind::Stream
    }
}

fn non_empty(value: &str) -> Result<String, String> {
    if value.is_empty() {
        Err("terminator must not be empty".to_string())
    } else {
        Ok(value.to_string())
    }
}
