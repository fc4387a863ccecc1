//! Launching the benchmark client.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use failure::ResultExt;

use log::debug;

use crate::paths::BENCHMARK_CLIENT_PATH;

/// The first argument to the client, selecting its benchmark mode.
pub const BENCHMARK_MODE: &str = "2";

/// The last argument to the client: run the benchmark once and exit.
pub const ONESHOT_FLAG: &str = "y";

/// Something that can run one benchmark against a live cluster.
pub trait BenchmarkClient {
    /// Run the benchmark described by `descriptor`, appending everything it prints (stdout and
    /// stderr) to `log`, and block until it finishes. Returns the client's exit code, or `None` if
    /// it was killed by a signal.
    ///
    /// An `Err` means the client could not be run at all.
    fn run(&mut self, descriptor: &Path, log: &Path) -> Result<Option<i32>, failure::Error>;
}

/// Runs the benchmark client executable as a subprocess.
#[derive(Clone, Debug)]
pub struct ProcessClient {
    binary: PathBuf,
    mode: String,
    output_flag: String,
}

impl ProcessClient {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        ProcessClient {
            binary: binary.into(),
            mode: BENCHMARK_MODE.into(),
            output_flag: ONESHOT_FLAG.into(),
        }
    }

    /// Override the mode and output flag passed to the client.
    pub fn with_args(mut self, mode: &str, output_flag: &str) -> Self {
        self.mode = mode.into();
        self.output_flag = output_flag.into();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl Default for ProcessClient {
    fn default() -> Self {
        ProcessClient::new(BENCHMARK_CLIENT_PATH)
    }
}

impl BenchmarkClient for ProcessClient {
    fn run(&mut self, descriptor: &Path, log: &Path) -> Result<Option<i32>, failure::Error> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .with_context(|_| format!("opening result log {}", log.display()))?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(&self.mode)
            .arg(descriptor)
            .arg(&self.output_flag)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        debug!("{:?}", cmd);

        let status = cmd
            .status()
            .with_context(|_| format!("running benchmark client {}", self.binary.display()))?;

        Ok(status.code())
    }
}
