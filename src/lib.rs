//! A library of routines for running benchmark campaigns against a BFT-CRDT cluster.
//!
//! A campaign sweeps two workload parameters over a fleet of remote hosts. For every point in the
//! sweep, the cluster is deployed, the benchmark client is run against it, and the cluster is torn
//! down again. The client's raw output is appended to a per-campaign result log.

// Must be imported first because the other submodules use the macros defined therein.
#[macro_use]
mod macros;

pub mod cli;
pub mod client;
pub mod cluster;
pub mod config;
pub mod progress;
pub mod sweep;
pub mod trial;
pub mod workload;

/// Common paths. Relative paths are relative to the directory `multibench` is run from, which is
/// normally the `scripts` directory of the client project.
pub mod paths {
    /// The benchmark client, as produced by a release build of the client project.
    pub const BENCHMARK_CLIENT_PATH: &str = "../bin/Release/net8.0/BFT-CRDT-Client";

    /// The directory into which campaign result logs are written.
    pub const RESULTS_DIR: &str = "results";

    /// The file listing the hosts currently running (or about to run) server processes.
    pub const HOST_INVENTORY_FILE: &str = "temp/ip_list_file.txt";

    /// The server project, which is built once per campaign.
    pub const SERVER_SRC_DIR: &str = "../../BFT-CRDT";

    /// Where the server build is published locally before being pushed to the hosts.
    pub const SERVER_ARTIFACT_DIR: &str = "temp/server";

    /// The directory on each remote into which the server is pushed and from which it runs.
    pub const REMOTE_SERVER_DIR: &str = "bftcrdt";

    /// The name of the server executable inside the artifact directory.
    pub const SERVER_BINARY: &str = "BFT-CRDT";
}

/// Given an array of timings, generate a human-readable string.
pub fn timings_str(timings: &[(&str, std::time::Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}
