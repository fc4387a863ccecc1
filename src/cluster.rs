//! Managing the fleet of hosts that run the BFT-CRDT server.
//!
//! Campaigns only talk to the fleet through the `ClusterController` trait. `SshCluster` is the
//! implementation used in practice: it builds the server locally, pushes it to every host with
//! rsync, and starts and stops the server processes over SSH.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use failure::ResultExt;

use log::{debug, info, warn};

use serde::{Deserialize, Serialize};

use spurs::{cmd, Execute, SshShell};
use spurs_util::escape_for_bash;

use crate::paths::*;

/// The port used to reach hosts over SSH.
pub const SSH_PORT: u16 = 22;

/// The default cluster port of the first server process on each host.
pub const DEFAULT_BASE_PORT: u16 = 5000;

/// Operations on the remote fleet needed to run a campaign.
pub trait ClusterController {
    /// The cluster port of the first server process on each host. Clients connect to this port
    /// plus `workload::CLIENT_PORT_OFFSET`.
    fn base_port(&self) -> u16;

    /// Build the server from source so that later deployments run the current code.
    fn build_server_artifact(&mut self) -> Result<(), failure::Error>;

    /// Write the cluster configuration for `replicas` server processes on each of `hosts`.
    fn write_cluster_config(
        &mut self,
        replicas: usize,
        hosts: &[String],
    ) -> Result<(), failure::Error>;

    /// Start `replicas` server processes on each of `hosts`, first pushing the most recent build
    /// if `push_binary` is set.
    fn deploy_and_start(
        &mut self,
        replicas: usize,
        hosts: &[String],
        push_binary: bool,
    ) -> Result<(), failure::Error>;

    /// Stop the server processes on every host in the inventory, killing them outright if
    /// `force` is set. If `clear_inventory` is set, the inventory is emptied afterwards.
    fn stop_all(&mut self, force: bool, clear_inventory: bool) -> Result<(), failure::Error>;
}

/// The host-inventory file: one host per line, listing the hosts that `stop_all` acts on.
#[derive(Clone, Debug)]
pub struct HostInventory {
    path: PathBuf,
}

impl HostInventory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        HostInventory { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The hosts currently listed. A missing file is an empty inventory.
    pub fn hosts(&self) -> Result<Vec<String>, failure::Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(failure::Error::from(err)
                    .context(format!("reading host inventory {}", self.path.display()))
                    .into())
            }
        };

        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Add `hosts` to the end of the inventory, creating it if needed.
    pub fn append(&self, hosts: &[String]) -> Result<(), failure::Error> {
        self.create_parent()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|_| format!("opening host inventory {}", self.path.display()))?;

        for host in hosts {
            writeln!(file, "{}", host)?;
        }

        Ok(())
    }

    /// Make `hosts` the whole inventory.
    pub fn replace(&self, hosts: &[String]) -> Result<(), failure::Error> {
        self.clear()?;
        self.append(hosts)
    }

    /// Empty the inventory, creating it if needed.
    pub fn clear(&self) -> Result<(), failure::Error> {
        self.create_parent()?;
        fs::File::create(&self.path)
            .with_context(|_| format!("clearing host inventory {}", self.path.display()))?;
        Ok(())
    }

    fn create_parent(&self) -> Result<(), failure::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// One entry of a server's cluster configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNode {
    pub nodeid: usize,
    pub address: String,
    pub port: u16,
    pub is_self: bool,
}

/// Lay out `replicas` server processes on each of `hosts`. Node ids are assigned in host order,
/// and the `r`-th process on every host listens on `base_port + r`. No node is marked as self.
pub fn cluster_layout(
    replicas: usize,
    hosts: &[String],
    base_port: u16,
) -> Result<Vec<ClusterNode>, failure::Error> {
    let mut nodes = Vec::with_capacity(replicas * hosts.len());

    for (i, host) in hosts.iter().enumerate() {
        for r in 0..replicas {
            let port = offset_port(base_port, r)?;
            nodes.push(ClusterNode {
                nodeid: i * replicas + r,
                address: host.clone(),
                port,
                is_self: false,
            });
        }
    }

    Ok(nodes)
}

/// The cluster configuration as seen by the node `self_id`.
pub fn cluster_config_for(layout: &[ClusterNode], self_id: usize) -> Vec<ClusterNode> {
    layout
        .iter()
        .map(|node| ClusterNode {
            is_self: node.nodeid == self_id,
            ..node.clone()
        })
        .collect()
}

/// `base + offset`, or an error if that is not a valid port.
fn offset_port(base: u16, offset: usize) -> Result<u16, failure::Error> {
    let port = base as usize + offset;
    if port > std::u16::MAX as usize {
        failure::bail!("port {} + {} is out of range", base, offset);
    }
    Ok(port as u16)
}

/// The name of the cluster configuration file of the `r`-th server process on a host.
pub fn cluster_file_name(r: usize) -> String {
    format!("cluster_{}.json", r)
}

/// The name of the output file of the `r`-th server process on a host.
pub fn server_log_name(r: usize) -> String {
    format!("server_{}.log", r)
}

/// Settings for `SshCluster`.
#[derive(Clone, Debug)]
pub struct ClusterSettings {
    /// The username to log into the hosts as.
    pub username: String,
    /// The cluster port of the first server process on each host.
    pub base_port: u16,
    /// The local server project.
    pub server_src: PathBuf,
    /// Where the server is published locally.
    pub artifact_dir: PathBuf,
    /// The directory on each remote holding the server.
    pub remote_dir: String,
    /// The name of the server executable.
    pub server_bin: String,
    /// The server's logging level (1 = debug, ..., 6 = none).
    pub log_level: u8,
}

impl ClusterSettings {
    pub fn new(username: &str) -> Self {
        ClusterSettings {
            username: username.into(),
            base_port: DEFAULT_BASE_PORT,
            server_src: SERVER_SRC_DIR.into(),
            artifact_dir: SERVER_ARTIFACT_DIR.into(),
            remote_dir: REMOTE_SERVER_DIR.into(),
            server_bin: SERVER_BINARY.into(),
            log_level: 2,
        }
    }
}

/// A `pkill -f` pattern matching `name` but not the shell command line that contains the pattern
/// itself, e.g. `[B]FT-CRDT`.
fn process_pattern(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("[{}]{}", first, chars.as_str()),
        None => String::new(),
    }
}

/// Run `stop` on every host in `inventory`, even if it fails on some of them, then clear the
/// inventory if asked to. Returns the first error.
fn stop_everywhere<F>(
    inventory: &HostInventory,
    clear_inventory: bool,
    mut stop: F,
) -> Result<(), failure::Error>
where
    F: FnMut(&str) -> Result<(), failure::Error>,
{
    let mut first_err = None;

    for host in inventory.hosts()? {
        if let Err(err) = stop(&host) {
            warn!("Unable to stop the servers on {}: {}", host, err);
            first_err.get_or_insert(err.context(format!("stopping the servers on {}", host)));
        }
    }

    if clear_inventory {
        inventory.clear()?;
    }

    match first_err {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Controls the fleet over SSH.
pub struct SshCluster {
    settings: ClusterSettings,
    inventory: HostInventory,
}

impl SshCluster {
    pub fn new(settings: ClusterSettings, inventory: HostInventory) -> Self {
        SshCluster {
            settings,
            inventory,
        }
    }

    fn connect(&self, host: &str) -> Result<SshShell, failure::Error> {
        SshShell::with_default_key(&self.settings.username, (host, SSH_PORT))
            .with_context(|_| format!("connecting to {}", host))
            .map_err(Into::into)
    }

    /// Copy the published server to `host` with rsync over SSH. This fails if the remote is not in
    /// known_hosts.
    fn rsync_to_remote(&self, host: &str) -> Result<(), failure::Error> {
        let mut cmd = Command::new("rsync");
        cmd.arg("-azP")
            .args(&["-e", "ssh -o StrictHostKeyChecking=yes"])
            .arg(format!("{}/", self.settings.artifact_dir.display()))
            .arg(format!(
                "{}@{}:{}",
                self.settings.username, host, self.settings.remote_dir
            ));

        debug!("{:?}", cmd);

        let status = cmd.status().context("running rsync")?;

        // If failure, exit with an Err(..).
        if !status.success() {
            failure::bail!(
                "rsync to {} failed. Exit code: {:?}",
                host,
                status.code()
            );
        }

        Ok(())
    }
}

impl ClusterController for SshCluster {
    fn base_port(&self) -> u16 {
        self.settings.base_port
    }

    fn build_server_artifact(&mut self) -> Result<(), failure::Error> {
        info!(
            "Building the server in {}",
            self.settings.server_src.display()
        );

        let artifact_dir = std::env::current_dir()?.join(&self.settings.artifact_dir);

        let mut cmd = Command::new("dotnet");
        cmd.args(&["publish", "-c", "Release", "-o"])
            .arg(&artifact_dir)
            .current_dir(&self.settings.server_src);

        debug!("{:?}", cmd);

        let status = cmd.status().context("running dotnet publish")?;
        if !status.success() {
            failure::bail!("Building the server failed. Exit code: {:?}", status.code());
        }

        Ok(())
    }

    fn write_cluster_config(
        &mut self,
        replicas: usize,
        hosts: &[String],
    ) -> Result<(), failure::Error> {
        let layout = cluster_layout(replicas, hosts, self.settings.base_port)?;
        let remote_dir = self.settings.remote_dir.as_str();

        for (i, host) in hosts.iter().enumerate() {
            let shell = self.connect(host)?;
            shell.run(cmd!("mkdir -p {}", remote_dir))?;

            for r in 0..replicas {
                let config = cluster_config_for(&layout, i * replicas + r);
                let config = serde_json::to_string(&config)?;

                shell.run(cmd!(
                    "echo '{}' > {}",
                    escape_for_bash(&config),
                    dir!(remote_dir, &cluster_file_name(r))
                ))?;
            }
        }

        Ok(())
    }

    fn deploy_and_start(
        &mut self,
        replicas: usize,
        hosts: &[String],
        push_binary: bool,
    ) -> Result<(), failure::Error> {
        // Record the hosts first so that `stop_all` can clean up after a partial start.
        self.inventory.replace(hosts)?;

        if push_binary {
            for host in hosts {
                info!("Pushing the server to {}", host);
                self.rsync_to_remote(host)?;
            }
        }

        for host in hosts {
            let shell = self.connect(host)?;

            for r in 0..replicas {
                shell.run(
                    cmd!(
                        "nohup ./{} {} {} > {} 2>&1 &",
                        self.settings.server_bin,
                        cluster_file_name(r),
                        self.settings.log_level,
                        server_log_name(r)
                    )
                    .cwd(&self.settings.remote_dir)
                    .use_bash(),
                )?;
            }

            debug!("Started {} server process(es) on {}", replicas, host);
        }

        Ok(())
    }

    fn stop_all(&mut self, force: bool, clear_inventory: bool) -> Result<(), failure::Error> {
        let signal = if force { "-9 " } else { "" };
        let pattern = escape_for_bash(&process_pattern(&self.settings.server_bin));

        stop_everywhere(&self.inventory, clear_inventory, |host| {
            let shell = self.connect(host)?;

            // pkill fails if there is nothing to kill, which is fine.
            shell.run(cmd!("pkill {}-f '{}'", signal, pattern).allow_error())?;

            Ok(())
        })
    }
}
