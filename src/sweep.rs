//! Sweeping a workload template over two dimensions.
//!
//! For every primary value (outer loop) and every secondary value (inner loop), the driver runs
//! `repeat` independent trials. The order is fixed: the result log groups blocks by primary value
//! first, and downstream analysis relies on that.

use std::collections::HashSet;
use std::fs;

use failure::ResultExt;
use failure_derive::Fail;

use log::info;

use serde::{Deserialize, Serialize};

use crate::client::BenchmarkClient;
use crate::cluster::{ClusterController, HostInventory};
use crate::config::SweepPolicy;
use crate::progress::{format_elapsed, Progress};
use crate::trial::{execute_trial, Trial, TrialOutcome};
use crate::workload::{
    client_port, Assignment, Dimension, RunConfiguration, SweepPoint, WorkloadTemplate,
};

/// One sweep of `template` over `primary` × `secondary` on `hosts`. The result log is named after
/// `name`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    pub name: String,
    pub primary: Dimension,
    pub secondary: Dimension,
    pub hosts: Vec<String>,
    pub template: WorkloadTemplate,
}

impl Campaign {
    /// Check everything that can be checked before touching the fleet.
    pub fn validate(&self) -> Result<(), failure::Error> {
        if self.name.is_empty() || self.name.contains('/') {
            failure::bail!("invalid campaign name {:?}", self.name);
        }

        if self.hosts.is_empty() {
            failure::bail!("campaign {} has no hosts", self.name);
        }

        let mut seen = HashSet::new();
        for host in self.hosts.iter() {
            if !seen.insert(host) {
                failure::bail!("host {} is listed more than once", host);
            }
        }

        self.template
            .validate(self.primary, self.secondary)
            .with_context(|_| format!("invalid workload template for campaign {}", self.name))?;

        Ok(())
    }

    /// All sweep points, primary values outer and secondary values inner.
    pub fn points(&self) -> Vec<SweepPoint> {
        let secondaries = self.template.candidates(self.secondary);
        let mut points = vec![];

        for p in self.template.candidates(self.primary) {
            for &s in secondaries.iter() {
                points.push(SweepPoint {
                    primary: Assignment {
                        dim: self.primary,
                        value: p,
                    },
                    secondary: Assignment {
                        dim: self.secondary,
                        value: s,
                    },
                });
            }
        }

        points
    }
}

/// A campaign had to be abandoned.
#[derive(Debug, Fail)]
pub enum CampaignError {
    /// The last permitted trial of a sweep point failed. The result log is incomplete.
    #[fail(
        display = "the last of {} trials at {} failed: {}",
        attempts, point, reason
    )]
    RetriesExhausted {
        point: String,
        attempts: usize,
        reason: String,
    },
}

/// What a completed campaign did.
#[derive(Clone, Debug)]
pub struct CampaignSummary {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    pub elapsed: chrono::Duration,
}

/// Runs campaigns against a fleet with a benchmark client.
pub struct SweepDriver<'a, C: ?Sized, B: ?Sized> {
    policy: &'a SweepPolicy,
    cluster: &'a mut C,
    client: &'a mut B,
    inventory: &'a HostInventory,
}

impl<'a, C, B> SweepDriver<'a, C, B>
where
    C: ClusterController + ?Sized,
    B: BenchmarkClient + ?Sized,
{
    pub fn new(
        policy: &'a SweepPolicy,
        cluster: &'a mut C,
        client: &'a mut B,
        inventory: &'a HostInventory,
    ) -> Self {
        SweepDriver {
            policy,
            cluster,
            client,
            inventory,
        }
    }

    /// Run every trial of `campaign`, then stop the fleet and reset the inventory to the
    /// campaign's hosts.
    ///
    /// A failed trial is followed by the remaining trials of its sweep point. If the last trial
    /// of a point fails, the campaign is abandoned immediately with
    /// `CampaignError::RetriesExhausted`; the fleet is left stopped but the final cleanup is
    /// skipped.
    pub fn run_campaign(&mut self, campaign: &Campaign) -> Result<CampaignSummary, failure::Error> {
        let repeat = self.policy.repeat;
        if repeat == 0 {
            failure::bail!("the repeat count must be at least 1");
        }

        campaign.validate()?;

        // Checked before anything is built or deployed.
        let base_port = self.cluster.base_port();
        client_port(base_port)?;

        let points = campaign.points();
        let mut progress = Progress::start(points.len() * repeat);

        println!("Current time: {}", progress.started_at());
        println!("Running: {}", campaign.name);

        // The binary does not change during a sweep, so it is only built once.
        self.cluster
            .build_server_artifact()
            .context("building the server")?;

        fs::create_dir_all(&self.policy.results_dir)?;
        fs::create_dir_all(&self.policy.work_dir)?;

        // Clear the result log.
        let log = self.policy.result_log(&campaign.name);
        fs::File::create(&log)
            .with_context(|_| format!("creating result log {}", log.display()))?;

        let mut summary = CampaignSummary {
            attempts: 0,
            successes: 0,
            failures: 0,
            elapsed: chrono::Duration::zero(),
        };

        // Only needed until the build has made it onto the hosts.
        let mut needs_build_push = true;

        for point in points.iter() {
            for redo in 0..repeat {
                let config = RunConfiguration::resolve(
                    &campaign.template,
                    point,
                    &campaign.hosts,
                    base_port,
                )?;

                info!("Trial {}/{} of {}", redo + 1, repeat, point);

                let outcome = execute_trial(
                    &mut *self.cluster,
                    &mut *self.client,
                    self.policy,
                    &Trial {
                        point,
                        config: &config,
                        hosts: &campaign.hosts,
                        log: &log,
                        needs_build_push,
                    },
                );

                if outcome.deployed() {
                    needs_build_push = false;
                }

                summary.attempts += 1;
                progress.record();

                let remaining = repeat - 1 - redo;
                let exhausted = match outcome {
                    TrialOutcome::Success { .. } => {
                        summary.successes += 1;
                        None
                    }
                    TrialOutcome::Failure { state, reason } => {
                        summary.failures += 1;
                        println!("Error while {} ({}): {}", state, point, reason);
                        for cause in reason.iter_causes() {
                            println!("  caused by: {}", cause);
                        }
                        println!("Error, redoing left {}", remaining);

                        if remaining == 0 {
                            Some(reason)
                        } else {
                            None
                        }
                    }
                };

                println!("{}", progress.report());
                println!("Elapsed time: {}", format_elapsed(progress.elapsed()));

                if let Some(reason) = exhausted {
                    println!("Error, exiting");
                    return Err(CampaignError::RetriesExhausted {
                        point: point.to_string(),
                        attempts: repeat,
                        reason: reason.to_string(),
                    }
                    .into());
                }

                std::thread::sleep(self.policy.pause);
            }
        }

        // Restore the inventory so that the final teardown reaches every host.
        self.inventory.append(&campaign.hosts)?;
        self.cluster
            .stop_all(/* force */ true, /* clear_inventory */ true)
            .context("stopping the fleet")?;

        summary.elapsed = progress.elapsed();

        println!("Experiment complete");
        println!("=============================================================");

        Ok(summary)
    }
}
