//! The `sweep` and `teardown` subcommands, plus routines for adding the options they share in a
//! consistent, less boilerplatey way.

use std::str::FromStr;

use clap::{App, Arg, ArgMatches};

use crate::cluster::{ClusterSettings, HostInventory};
use crate::paths::{
    HOST_INVENTORY_FILE, REMOTE_SERVER_DIR, SERVER_ARTIFACT_DIR, SERVER_BINARY, SERVER_SRC_DIR,
};

/// A clap validator accepting anything that parses as a `T`.
fn is<T>(s: String) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    s.as_str()
        .parse::<T>()
        .map(|_| ())
        .map_err(|e| format!("{:?}", e))
}

/// Add options describing how to reach and run the fleet.
fn add_cluster_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("USERNAME")
            .long("username")
            .required(true)
            .takes_value(true)
            .help("The username on the remotes (e.g. bft)"),
    )
    .arg(
        Arg::with_name("INVENTORY")
            .long("inventory")
            .takes_value(true)
            .default_value(HOST_INVENTORY_FILE)
            .help("The file listing the hosts that may have servers running"),
    )
    .arg(
        Arg::with_name("BASE_PORT")
            .long("base_port")
            .takes_value(true)
            .default_value("5000")
            .validator(is::<u16>)
            .help("The cluster port of the first server on each host"),
    )
    .arg(
        Arg::with_name("SERVER_SRC")
            .long("server_src")
            .takes_value(true)
            .default_value(SERVER_SRC_DIR)
            .help("The local server project to build"),
    )
    .arg(
        Arg::with_name("ARTIFACT_DIR")
            .long("artifact_dir")
            .takes_value(true)
            .default_value(SERVER_ARTIFACT_DIR)
            .help("Where the server is published locally before being copied out"),
    )
    .arg(
        Arg::with_name("SERVER_BIN")
            .long("server_bin")
            .takes_value(true)
            .default_value(SERVER_BINARY)
            .help("The name of the server executable"),
    )
    .arg(
        Arg::with_name("REMOTE_DIR")
            .long("remote_dir")
            .takes_value(true)
            .default_value(REMOTE_SERVER_DIR)
            .help("The directory holding the server on each remote"),
    )
    .arg(
        Arg::with_name("LOG_LEVEL")
            .long("log_level")
            .takes_value(true)
            .default_value("2")
            .validator(is::<u8>)
            .help("The servers' log level (1 = debug, ..., 6 = none)"),
    )
}

/// Parse the values added by `add_cluster_options`.
fn parse_cluster_options(sub_m: &ArgMatches<'_>) -> (ClusterSettings, HostInventory) {
    let mut settings = ClusterSettings::new(sub_m.value_of("USERNAME").unwrap());
    settings.base_port = sub_m.value_of("BASE_PORT").unwrap().parse().unwrap();
    settings.server_src = sub_m.value_of("SERVER_SRC").unwrap().into();
    settings.artifact_dir = sub_m.value_of("ARTIFACT_DIR").unwrap().into();
    settings.server_bin = sub_m.value_of("SERVER_BIN").unwrap().into();
    settings.remote_dir = sub_m.value_of("REMOTE_DIR").unwrap().into();
    settings.log_level = sub_m.value_of("LOG_LEVEL").unwrap().parse().unwrap();

    let inventory = HostInventory::new(sub_m.value_of("INVENTORY").unwrap());

    (settings, inventory)
}

/// Run a two-dimensional sweep described by a campaign file.
pub mod sweep {
    use std::path::Path;
    use std::time::Duration;

    use clap::{clap_app, ArgMatches};

    use crate::client::ProcessClient;
    use crate::cluster::SshCluster;
    use crate::config::{load_campaign, SweepPolicy};
    use crate::paths::BENCHMARK_CLIENT_PATH;
    use crate::sweep::SweepDriver;

    use super::{add_cluster_options, is, parse_cluster_options};

    pub fn cli_options() -> clap::App<'static, 'static> {
        let app = clap_app! { sweep =>
            (about: "Run every trial of a campaign, writing client output to \
                     <RESULTS_DIR>/<name>.txt.")
            (@setting ArgRequiredElseHelp)
            (@setting DisableVersion)
            (@arg CAMPAIGN_FILE: +required +takes_value
             "A JSON file naming the campaign, its hosts, the swept dimensions and the \
              workload template")
            (@arg REPEAT: --repeat +takes_value {is::<usize>} default_value("5")
             "The number of trials of every sweep point")
            (@arg CLIENT: --client +takes_value default_value(BENCHMARK_CLIENT_PATH)
             "The benchmark client executable")
            (@arg RESULTS_DIR: --results_dir +takes_value default_value("results")
             "The directory the result log is written to")
            (@arg WORK_DIR: --work_dir +takes_value default_value(".")
             "The directory workload descriptors are written to")
            (@arg WARMUP: --warmup +takes_value {is::<u64>} default_value("10")
             "Seconds to wait between starting the servers and starting the client")
            (@arg SETTLE: --settle +takes_value {is::<u64>} default_value("2")
             "Seconds to wait between the client exiting and stopping the servers")
            (@arg PAUSE: --pause +takes_value {is::<u64>} default_value("1")
             "Seconds to wait between trials")
        };

        add_cluster_options(app)
    }

    pub fn run(sub_m: &ArgMatches<'_>) -> Result<(), failure::Error> {
        let campaign = load_campaign(Path::new(sub_m.value_of("CAMPAIGN_FILE").unwrap()))?;

        let secs =
            |name: &str| Duration::from_secs(sub_m.value_of(name).unwrap().parse().unwrap());
        let policy = SweepPolicy {
            repeat: sub_m.value_of("REPEAT").unwrap().parse().unwrap(),
            warmup: secs("WARMUP"),
            settle: secs("SETTLE"),
            pause: secs("PAUSE"),
            results_dir: sub_m.value_of("RESULTS_DIR").unwrap().into(),
            work_dir: sub_m.value_of("WORK_DIR").unwrap().into(),
        };

        let (settings, inventory) = parse_cluster_options(sub_m);
        let mut cluster = SshCluster::new(settings, inventory.clone());
        let mut client = ProcessClient::new(sub_m.value_of("CLIENT").unwrap());

        let summary = SweepDriver::new(&policy, &mut cluster, &mut client, &inventory)
            .run_campaign(&campaign)?;

        println!(
            "RESULTS: {} ({} trials, {} failed)",
            policy.result_log(&campaign.name).display(),
            summary.attempts,
            summary.failures
        );

        Ok(())
    }
}

/// Stop every server on the hosts in the inventory, e.g. after an aborted campaign.
pub mod teardown {
    use clap::{clap_app, ArgMatches};

    use log::info;

    use crate::cluster::{ClusterController, SshCluster};

    use super::{add_cluster_options, parse_cluster_options};

    pub fn cli_options() -> clap::App<'static, 'static> {
        let app = clap_app! { teardown =>
            (about: "Kill the servers on every host in the inventory and clear it.")
            (@setting ArgRequiredElseHelp)
            (@setting DisableVersion)
        };

        add_cluster_options(app)
    }

    pub fn run(sub_m: &ArgMatches<'_>) -> Result<(), failure::Error> {
        let (settings, inventory) = parse_cluster_options(sub_m);
        let hosts = inventory.hosts()?;

        info!("Stopping servers on {} hosts", hosts.len());

        SshCluster::new(settings, inventory).stop_all(/* force */ true, /* clear_inventory */ true)
    }
}
