//! Campaign files and the policy knobs of a sweep.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use failure::ResultExt;

use crate::paths::RESULTS_DIR;
use crate::sweep::Campaign;

/// The default number of trials per sweep point.
pub const DEFAULT_REPEAT: usize = 5;

/// How long to wait after starting the servers before running the client. The servers need time
/// to start, join the cluster (they wait a while before joining) and initialize the keyspace.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(10);

/// How long to wait after the client exits before stopping the servers, so that client
/// connections are closed cleanly.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(2);

/// How long to wait between trials so that remote processes are fully gone before the next
/// deployment.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);

/// How a campaign is run, independent of what it sweeps.
#[derive(Clone, Debug)]
pub struct SweepPolicy {
    /// The number of trials of every sweep point.
    pub repeat: usize,
    pub warmup: Duration,
    pub settle: Duration,
    pub pause: Duration,
    /// Where `<campaign>.txt` is written.
    pub results_dir: PathBuf,
    /// Where workload descriptors are written for the duration of a trial.
    pub work_dir: PathBuf,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        SweepPolicy {
            repeat: DEFAULT_REPEAT,
            warmup: DEFAULT_WARMUP,
            settle: DEFAULT_SETTLE,
            pause: DEFAULT_PAUSE,
            results_dir: RESULTS_DIR.into(),
            work_dir: ".".into(),
        }
    }
}

impl SweepPolicy {
    /// A policy with no waiting at all. Useful when nothing real is deployed.
    pub fn immediate(results_dir: &Path, work_dir: &Path) -> Self {
        SweepPolicy {
            warmup: Duration::from_secs(0),
            settle: Duration::from_secs(0),
            pause: Duration::from_secs(0),
            results_dir: results_dir.into(),
            work_dir: work_dir.into(),
            ..SweepPolicy::default()
        }
    }

    /// The result log of the campaign with the given name.
    pub fn result_log(&self, campaign: &str) -> PathBuf {
        self.results_dir.join(format!("{}.txt", campaign))
    }
}

/// Read a campaign from a JSON file.
pub fn load_campaign(path: &Path) -> Result<Campaign, failure::Error> {
    let contents = fs::read_to_string(path)
        .with_context(|_| format!("reading campaign file {}", path.display()))?;
    let campaign = serde_json::from_str(&contents)
        .with_context(|_| format!("parsing campaign file {}", path.display()))?;
    Ok(campaign)
}
