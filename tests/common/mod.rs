//! A fake fleet and a fake benchmark client that record what the campaign asks of them.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use multibench::client::BenchmarkClient;
use multibench::cluster::{ClusterController, DEFAULT_BASE_PORT};
use multibench::workload::{Dimension, Param, TypeCode, WorkloadTemplate};

/// Calls made to the fleet and the client, in order.
pub type CallLog = Rc<RefCell<Vec<String>>>;

#[derive(Default)]
pub struct FakeCluster {
    pub calls: CallLog,
    /// Overrides the default cluster base port.
    pub base_port: Option<u16>,
    /// Deployments (counted from 0) that fail.
    pub failing_deploys: HashSet<usize>,
    deploys: usize,
}

impl FakeCluster {
    pub fn new(calls: &CallLog) -> Self {
        FakeCluster {
            calls: calls.clone(),
            ..FakeCluster::default()
        }
    }
}

impl ClusterController for FakeCluster {
    fn base_port(&self) -> u16 {
        self.base_port.unwrap_or(DEFAULT_BASE_PORT)
    }

    fn build_server_artifact(&mut self) -> Result<(), failure::Error> {
        self.calls.borrow_mut().push("build".into());
        Ok(())
    }

    fn write_cluster_config(
        &mut self,
        replicas: usize,
        hosts: &[String],
    ) -> Result<(), failure::Error> {
        self.calls
            .borrow_mut()
            .push(format!("config {} {}", replicas, hosts.len()));
        Ok(())
    }

    fn deploy_and_start(
        &mut self,
        _replicas: usize,
        _hosts: &[String],
        push_binary: bool,
    ) -> Result<(), failure::Error> {
        let n = self.deploys;
        self.deploys += 1;

        self.calls.borrow_mut().push(format!("deploy {}", push_binary));

        if self.failing_deploys.contains(&n) {
            failure::bail!("deployment {} failed", n);
        }
        Ok(())
    }

    fn stop_all(&mut self, force: bool, clear_inventory: bool) -> Result<(), failure::Error> {
        self.calls
            .borrow_mut()
            .push(format!("stop {} {}", force, clear_inventory));
        Ok(())
    }
}

/// Appends one block per run to the result log: `BLOCK <targetOutputTPS> <safeRatio>`, both as
/// they appear in the descriptor.
#[derive(Default)]
pub struct FakeClient {
    pub calls: CallLog,
    /// Runs (counted from 0) that fail.
    pub failing_runs: HashSet<usize>,
    /// Fail every run.
    pub always_fail: bool,
    runs: usize,
}

impl FakeClient {
    pub fn new(calls: &CallLog) -> Self {
        FakeClient {
            calls: calls.clone(),
            ..FakeClient::default()
        }
    }

    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl BenchmarkClient for FakeClient {
    fn run(&mut self, descriptor: &Path, log: &Path) -> Result<Option<i32>, failure::Error> {
        let n = self.runs;
        self.runs += 1;

        self.calls
            .borrow_mut()
            .push(format!("client {}", descriptor.exists()));

        if self.always_fail || self.failing_runs.contains(&n) {
            failure::bail!("client run {} crashed", n);
        }

        let config: serde_json::Value = serde_json::from_str(&fs::read_to_string(descriptor)?)?;

        let mut log = OpenOptions::new().create(true).append(true).open(log)?;
        writeln!(
            log,
            "BLOCK {} {}",
            config["targetOutputTPS"], config["safeRatio"]
        )?;

        Ok(Some(0))
    }
}

/// A template sweeping `targetOutputTPS` over `tps` and `safeRatio` over `safe`.
pub fn template(tps: Vec<u32>, safe: Vec<f64>) -> WorkloadTemplate {
    WorkloadTemplate {
        client_threads: Param::One(12),
        type_code: Param::One(TypeCode::Pnc),
        num_objs: Param::One(100),
        duration: Param::One(20),
        ops_ratio: Param::One([0.35, 0.35, 0.3]),
        safe_ratio: Param::Many(safe),
        target_output_tps: Param::Many(tps),
    }
}

pub const PRIMARY: Dimension = Dimension::TargetOutputTps;
pub const SECONDARY: Dimension = Dimension::SafeRatio;

/// The blocks in a result log.
pub fn blocks(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap()
        .lines()
        .filter(|line| line.starts_with("BLOCK "))
        .map(str::to_owned)
        .collect()
}

/// The number of workload descriptors left in `dir`.
pub fn leftover_descriptors(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter(|entry| {
            entry.as_ref().unwrap().path().extension() == Some(std::ffi::OsStr::new("json"))
        })
        .count()
}
