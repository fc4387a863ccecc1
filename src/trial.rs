//! Running one trial: deploy the cluster, run the benchmark client against it, tear it down.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

use crate::client::BenchmarkClient;
use crate::cluster::ClusterController;
use crate::config::SweepPolicy;
use crate::workload::{DescriptorFile, RunConfiguration, SweepPoint};

/// The number of server processes started on each host: one logical cluster instance.
pub const REPLICAS_PER_HOST: usize = 1;

/// The lifecycle of a trial.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrialState {
    Configuring,
    Deploying,
    WarmingUp,
    Running,
    Collecting,
    TearingDown,
    Done,
    Aborting,
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrialState::Configuring => "configuring",
            TrialState::Deploying => "deploying",
            TrialState::WarmingUp => "warming up",
            TrialState::Running => "running",
            TrialState::Collecting => "collecting",
            TrialState::TearingDown => "tearing down",
            TrialState::Done => "done",
            TrialState::Aborting => "aborting",
        };
        write!(f, "{}", s)
    }
}

/// How a trial ended.
#[derive(Debug)]
pub enum TrialOutcome {
    /// The client ran to completion. Its output is in the result log.
    Success { exit_code: Option<i32> },

    /// The trial was aborted in `state`.
    Failure {
        state: TrialState,
        reason: failure::Error,
    },
}

impl TrialOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            TrialOutcome::Success { .. } => true,
            TrialOutcome::Failure { .. } => false,
        }
    }

    /// True if the servers were deployed successfully during the trial, whether or not the rest
    /// of the trial went well.
    pub fn deployed(&self) -> bool {
        match self {
            TrialOutcome::Success { .. } => true,
            TrialOutcome::Failure { state, .. } => match state {
                TrialState::Configuring | TrialState::Deploying => false,
                _ => true,
            },
        }
    }
}

/// Everything that identifies one trial.
#[derive(Debug)]
pub struct Trial<'a> {
    pub point: &'a SweepPoint,
    pub config: &'a RunConfiguration,
    pub hosts: &'a [String],
    /// The campaign's result log.
    pub log: &'a Path,
    /// Push the server build to the hosts before starting it.
    pub needs_build_push: bool,
}

/// Holds the fleet for the duration of a trial. Dropping it tears the trial down: the servers are
/// stopped and the workload descriptor is deleted, however the trial ended.
struct Teardown<'c, C: ClusterController + ?Sized> {
    cluster: &'c mut C,
    settle: Duration,
    descriptor: Option<DescriptorFile>,
}

impl<C: ClusterController + ?Sized> Drop for Teardown<'_, C> {
    fn drop(&mut self) {
        debug!("Trial state: {}", TrialState::TearingDown);

        // Make sure the client's connections are actually closed.
        std::thread::sleep(self.settle);

        if let Err(err) = self.cluster.stop_all(/* force */ true, /* clear_inventory */ false) {
            warn!("Unable to stop the servers: {}", err);
        }

        // Deletes the file.
        self.descriptor.take();
    }
}

/// Run one trial of `trial.config`. The client's output is appended to `trial.log`.
///
/// Teardown happens before this returns, whatever the outcome. Failures are reported in the
/// returned `TrialOutcome` rather than as an error; deciding whether to try again is up to the
/// caller.
pub fn execute_trial<C, B>(
    cluster: &mut C,
    client: &mut B,
    policy: &SweepPolicy,
    trial: &Trial<'_>,
) -> TrialOutcome
where
    C: ClusterController + ?Sized,
    B: BenchmarkClient + ?Sized,
{
    let mut timers = vec![];
    let mut state = TrialState::Configuring;

    let mut teardown = Teardown {
        cluster,
        settle: policy.settle,
        descriptor: None,
    };

    let result = run_phases(
        &mut teardown,
        client,
        policy,
        trial,
        &mut state,
        &mut timers,
    );

    if result.is_err() {
        debug!("Trial state: {} (failed while {})", TrialState::Aborting, state);
    }

    time!(timers, "Teardown", drop(teardown));

    debug!("Trial timings:\n{}", crate::timings_str(&timers));

    match result {
        Ok(exit_code) => {
            debug!("Trial state: {}", TrialState::Done);
            TrialOutcome::Success { exit_code }
        }
        Err(reason) => TrialOutcome::Failure { state, reason },
    }
}

fn advance(state: &mut TrialState, next: TrialState) {
    debug!("Trial state: {}", next);
    *state = next;
}

fn run_phases<C, B>(
    teardown: &mut Teardown<'_, C>,
    client: &mut B,
    policy: &SweepPolicy,
    trial: &Trial<'_>,
    state: &mut TrialState,
    timers: &mut Vec<(&'static str, Duration)>,
) -> Result<Option<i32>, failure::Error>
where
    C: ClusterController + ?Sized,
    B: BenchmarkClient + ?Sized,
{
    advance(state, TrialState::Configuring);
    let descriptor = DescriptorFile::create(&policy.work_dir, trial.point, trial.config)?;
    let descriptor_path = descriptor.path().to_owned();
    teardown.descriptor = Some(descriptor);

    advance(state, TrialState::Deploying);
    time!(timers, "Deploy", {
        teardown
            .cluster
            .write_cluster_config(REPLICAS_PER_HOST, trial.hosts)?;
        teardown.cluster.deploy_and_start(
            REPLICAS_PER_HOST,
            trial.hosts,
            trial.needs_build_push,
        )?;
    });

    advance(state, TrialState::WarmingUp);
    time!(timers, "Warm up", std::thread::sleep(policy.warmup));

    advance(state, TrialState::Running);
    let exit_code = time!(
        timers,
        "Benchmark client",
        client.run(&descriptor_path, trial.log)?
    );

    // The output is already in the log; all that is left is to note how the client exited.
    advance(state, TrialState::Collecting);
    match exit_code {
        Some(code) => info!("Benchmark client exited with status {}", code),
        None => warn!("Benchmark client was terminated by a signal"),
    }

    Ok(exit_code)
}
