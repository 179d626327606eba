//! Command-line surface for the daemon binary.
//!
//! Deliberately minimal — per the non-goals, this is not a stand-in for
//! PRRTE's MCA parameter system, just enough knobs to drive a manual smoke
//! test of the transport and mapper crates.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "prterun-daemon", version, about = "prterun transport/mapper smoke-test harness")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the round-robin mapper over a synthetic node list and print the
    /// resulting placement.
    Map(MapArgs),

    /// Bind a listening OOB socket and log connection/frame events until
    /// interrupted.
    Listen(ListenArgs),
}

#[derive(Parser, Debug)]
pub struct MapArgs {
    /// Number of nodes in the synthetic cluster.
    #[clap(long, default_value_t = 4)]
    pub nodes: u32,

    /// Slots per node.
    #[clap(long, default_value_t = 8)]
    pub slots_per_node: u32,

    /// Number of processes to place.
    #[clap(long, default_value_t = 10)]
    pub num_procs: u32,

    /// Placement policy: slot, node, or object.
    #[clap(long, default_value = "slot")]
    pub policy: String,

    /// Allow oversubscription.
    #[clap(long)]
    pub allow_oversubscribe: bool,

    /// Span topology objects across all nodes (by-object policy only).
    #[clap(long)]
    pub span: bool,
}

#[derive(Parser, Debug)]
pub struct ListenArgs {
    /// Address to bind the OOB listener to.
    #[clap(long)]
    pub addr: SocketAddr,

    /// Local job id used to identify this daemon on the wire.
    #[clap(long, default_value_t = 0)]
    pub job_id: u32,

    /// Local vpid used to identify this daemon on the wire.
    #[clap(long, default_value_t = 0)]
    pub vpid: u32,
}
