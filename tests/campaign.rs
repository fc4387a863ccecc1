//! Full campaigns against a fake fleet and a fake benchmark client.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use multibench::cluster::HostInventory;
use multibench::config::SweepPolicy;
use multibench::sweep::{Campaign, CampaignError, CampaignSummary, SweepDriver};
use multibench::workload::{Dimension, Param, TypeCode, WorkloadTemplate};

use common::*;

struct Bench {
    dir: tempfile::TempDir,
    policy: SweepPolicy,
    inventory: HostInventory,
    calls: CallLog,
}

impl Bench {
    fn new(repeat: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut policy =
            SweepPolicy::immediate(&dir.path().join("results"), &dir.path().join("work"));
        policy.repeat = repeat;
        let inventory = HostInventory::new(dir.path().join("temp").join("ip_list_file.txt"));

        Bench {
            dir,
            policy,
            inventory,
            calls: CallLog::default(),
        }
    }

    fn log(&self, campaign: &Campaign) -> PathBuf {
        self.policy.result_log(&campaign.name)
    }

    fn work_dir(&self) -> &Path {
        &self.policy.work_dir
    }

    fn run(
        &self,
        campaign: &Campaign,
        cluster: &mut FakeCluster,
        client: &mut FakeClient,
    ) -> Result<CampaignSummary, failure::Error> {
        SweepDriver::new(&self.policy, cluster, client, &self.inventory).run_campaign(campaign)
    }

    fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn campaign(hosts: &[&str], tps: Vec<u32>, safe: Vec<f64>) -> Campaign {
    Campaign {
        name: "pnc-test".into(),
        primary: PRIMARY,
        secondary: SECONDARY,
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        template: template(tps, safe),
    }
}

#[test]
fn one_block_per_trial_primary_outer() {
    let bench = Bench::new(2);
    let campaign = campaign(&["h1", "h2"], vec![1000, 2000], vec![0.0, 0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);

    let summary = bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(summary.attempts, 8);
    assert_eq!(summary.successes, 8);
    assert_eq!(summary.failures, 0);
    assert_eq!(
        blocks(&bench.log(&campaign)),
        vec![
            "BLOCK 1000 0.0",
            "BLOCK 1000 0.0",
            "BLOCK 1000 0.5",
            "BLOCK 1000 0.5",
            "BLOCK 2000 0.0",
            "BLOCK 2000 0.0",
            "BLOCK 2000 0.5",
            "BLOCK 2000 0.5",
        ]
    );
}

#[test]
fn descriptors_exist_only_during_the_client_run() {
    let bench = Bench::new(2);
    let campaign = campaign(&["h1"], vec![1000, 2000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);
    client.failing_runs.insert(1);

    bench.run(&campaign, &mut cluster, &mut client).unwrap();

    let clients = bench.calls_starting_with("client");
    assert_eq!(clients.len(), 4);
    assert!(clients.iter().all(|call| call == "client true"));
    assert_eq!(leftover_descriptors(bench.work_dir()), 0);
}

#[test]
fn every_trial_is_torn_down() {
    let bench = Bench::new(3);
    let campaign = campaign(&["h1", "h2"], vec![1000], vec![0.0, 0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    cluster.failing_deploys.insert(3);
    let mut client = FakeClient::new(&bench.calls);
    client.failing_runs.insert(0);

    bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(bench.calls_starting_with("stop true false").len(), 6);
    assert_eq!(bench.calls_starting_with("stop true true").len(), 1);
    assert_eq!(
        bench.calls.borrow().last().map(String::as_str),
        Some("stop true true")
    );
}

#[test]
fn last_failure_aborts_the_campaign() {
    let bench = Bench::new(3);
    let campaign = campaign(&["h1"], vec![1000, 2000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);
    client.always_fail = true;

    let err = bench
        .run(&campaign, &mut cluster, &mut client)
        .unwrap_err();

    match err.downcast_ref::<CampaignError>() {
        Some(CampaignError::RetriesExhausted {
            point, attempts, ..
        }) => {
            assert_eq!(*attempts, 3);
            assert!(point.contains("1000"), "{}", point);
        }
        None => panic!("unexpected error: {}", err),
    }

    // The second point is never reached.
    assert_eq!(client.runs(), 3);
    assert!(blocks(&bench.log(&campaign)).is_empty());

    // The failed trial itself is torn down, but the final cleanup is skipped.
    assert_eq!(bench.calls_starting_with("stop true false").len(), 3);
    assert!(bench.calls_starting_with("stop true true").is_empty());
    assert_eq!(leftover_descriptors(bench.work_dir()), 0);
}

#[test]
fn failures_before_the_last_repeat_are_absorbed() {
    let bench = Bench::new(5);
    let campaign = campaign(&["h1"], vec![1000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);
    client.failing_runs.insert(0);
    client.failing_runs.insert(1);

    let summary = bench.run(&campaign, &mut cluster, &mut client).unwrap();

    // The remaining repeats still run once a trial succeeds.
    assert_eq!(client.runs(), 5);
    assert_eq!(summary.attempts, 5);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.successes, 3);
    assert_eq!(blocks(&bench.log(&campaign)).len(), 3);
}

#[test]
fn failure_on_the_last_repeat_aborts_even_after_successes() {
    let bench = Bench::new(3);
    let campaign = campaign(&["h1"], vec![1000, 2000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);
    client.failing_runs.insert(2);

    assert!(bench.run(&campaign, &mut cluster, &mut client).is_err());
    assert_eq!(client.runs(), 3);
    assert_eq!(blocks(&bench.log(&campaign)).len(), 2);
}

#[test]
fn server_is_built_once_and_pushed_until_deployed() {
    let bench = Bench::new(2);
    let campaign = campaign(&["h1"], vec![1000, 2000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    cluster.failing_deploys.insert(0);
    let mut client = FakeClient::new(&bench.calls);

    bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(bench.calls.borrow()[0], "build");
    assert_eq!(bench.calls_starting_with("build").len(), 1);
    assert_eq!(
        bench.calls_starting_with("deploy"),
        vec!["deploy true", "deploy true", "deploy false", "deploy false"]
    );
}

#[test]
fn four_hosts_one_point_five_repeats() {
    let bench = Bench::new(5);
    let campaign = campaign(&["a", "b", "c", "d"], vec![1000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);

    let summary = bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(summary.attempts, 5);
    assert_eq!(blocks(&bench.log(&campaign)), vec!["BLOCK 1000 0.5"; 5]);
    assert_eq!(bench.calls_starting_with("config 1 4").len(), 5);
}

#[test]
fn inventory_is_restored_for_the_final_teardown() {
    let bench = Bench::new(1);
    bench.inventory.replace(&["stale".to_string()]).unwrap();
    let campaign = campaign(&["h1", "h2"], vec![1000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);

    bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(
        bench.inventory.hosts().unwrap(),
        vec!["stale".to_string(), "h1".to_string(), "h2".to_string()]
    );
}

#[test]
fn result_log_starts_empty() {
    let bench = Bench::new(1);
    let campaign = campaign(&["h1"], vec![1000], vec![0.5]);
    fs::create_dir_all(&bench.policy.results_dir).unwrap();
    fs::write(bench.log(&campaign), "BLOCK from an earlier campaign\n").unwrap();

    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);
    bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(blocks(&bench.log(&campaign)), vec!["BLOCK 1000 0.5"]);
}

#[test]
fn invalid_campaign_touches_nothing() {
    let bench = Bench::new(2);
    let mut campaign = campaign(&["h1"], vec![1000], vec![0.5]);
    campaign.secondary = campaign.primary;
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);

    assert!(bench.run(&campaign, &mut cluster, &mut client).is_err());
    assert!(bench.calls.borrow().is_empty());
    assert!(!bench.dir.path().join("results").exists());
}

#[test]
fn unswept_lists_reach_every_descriptor() {
    let bench = Bench::new(5);
    let campaign = Campaign {
        name: "orset-scenario".into(),
        primary: Dimension::TargetOutputTps,
        secondary: Dimension::OpsRatio,
        hosts: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        template: WorkloadTemplate {
            client_threads: Param::One(32),
            type_code: Param::One(TypeCode::Orset),
            num_objs: Param::One(100),
            duration: Param::One(20),
            ops_ratio: Param::Many(vec![[0.5, 0.0, 0.5]]),
            safe_ratio: Param::Many(vec![0.5, 1.0]),
            target_output_tps: Param::Many(vec![1000]),
        },
    };
    let mut cluster = FakeCluster::new(&bench.calls);
    let mut client = FakeClient::new(&bench.calls);

    let summary = bench.run(&campaign, &mut cluster, &mut client).unwrap();

    assert_eq!(summary.attempts, 5);
    assert_eq!(
        blocks(&bench.log(&campaign)),
        vec!["BLOCK 1000 [0.5,1.0]"; 5]
    );
    assert_eq!(bench.calls_starting_with("build").len(), 1);
    assert_eq!(
        bench.calls_starting_with("deploy"),
        vec![
            "deploy true",
            "deploy false",
            "deploy false",
            "deploy false",
            "deploy false"
        ]
    );
}

#[test]
fn client_port_overflow_is_rejected_up_front() {
    let bench = Bench::new(1);
    let campaign = campaign(&["h1"], vec![1000], vec![0.5]);
    let mut cluster = FakeCluster::new(&bench.calls);
    cluster.base_port = Some(65000);
    let mut client = FakeClient::new(&bench.calls);

    assert!(bench.run(&campaign, &mut cluster, &mut client).is_err());
    assert!(bench.calls.borrow().is_empty());
    assert!(!bench.dir.path().join("results").exists());
}
