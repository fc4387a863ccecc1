//! Progress and wall-clock accounting for a campaign.

use chrono::{DateTime, Local};

/// Counts trial attempts against the number planned and tracks time since the campaign started.
#[derive(Clone, Debug)]
pub struct Progress {
    start: DateTime<Local>,
    count: usize,
    total: usize,
}

impl Progress {
    pub fn start(total: usize) -> Self {
        Progress {
            start: Local::now(),
            count: 0,
            total,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.start
    }

    /// Record one finished attempt, successful or not.
    pub fn record(&mut self) {
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Local::now().signed_duration_since(self.start)
    }

    /// E.g. `3/10 done`.
    pub fn report(&self) -> String {
        format!("{}/{} done", self.count, self.total)
    }
}

/// Format a duration as `H:MM:SS`.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
