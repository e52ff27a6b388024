// volley - run one command across a fleet of hosts over SSH, in paced batches
//
// The engine partitions a resolved host list into fixed-size batches, opens
// one SSH connection per host in the current batch concurrently, runs the
// command on every open channel, and interleaves the streamed output under
// stable host labels. Per-host failures are warnings; only an empty host
// list or a non-zero exit under stop-on-failure ends the run early.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod inventory;
pub mod output;
pub mod runner;
pub mod ssh;

pub use batch::{partition, Batch};
pub use config::{
    build_connection_options, AuthMethod, ConnectionOptions, ConnectionOverrides,
    HostKeyVerification, Settings,
};
pub use inventory::{manual_list, resolve_hosts, Resolver, ScriptResolver};
pub use output::{OutputMultiplexer, Terminal, VolleyError};
pub use runner::{BatchRunner, RunConfig, RunResult};

/// Version of the volley tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
