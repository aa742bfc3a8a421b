//! Run statistics aggregated by the coordinator

use std::path::PathBuf;
use std::time::Duration;

use console::style;
use serde::Serialize;

use crate::error::ErrorKind;
use crate::processing::ProcessedResult;

/// One failed item in the final report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    pub path: PathBuf,
    pub kind: ErrorKind,
    pub detail: Option<String>,
}

/// Counters and byte sums accumulated from the result stream.
///
/// Recording only adds, so the totals do not depend on the order results
/// arrive in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub converted: usize,
    pub skipped: usize,
    pub errored: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub failures: Vec<FailedItem>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into the totals
    pub fn record(&mut self, result: &ProcessedResult) {
        self.bytes_before += result.size_before;
        self.bytes_after += result.size_after;

        match result.error() {
            Some(kind) => {
                self.errored += 1;
                self.failures.push(FailedItem {
                    path: result.path.clone(),
                    kind,
                    detail: result.detail().map(str::to_string),
                });
            }
            None if result.processed() => self.converted += 1,
            None => self.skipped += 1,
        }
    }

    /// Number of results recorded
    pub fn total(&self) -> usize {
        self.converted + self.skipped + self.errored
    }

    /// Bytes saved across all items; negative when re-encoding grew the files
    pub fn bytes_saved(&self) -> i128 {
        i128::from(self.bytes_before) - i128::from(self.bytes_after)
    }

    /// Get size reduction percentage
    pub fn size_reduction(&self) -> f64 {
        if self.bytes_before == 0 {
            return 0.0;
        }
        (self.bytes_saved() as f64 / self.bytes_before as f64) * 100.0
    }
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Images found while seeding
    pub discovered: usize,
    /// Results consumed while draining
    pub drained: usize,
    pub statistics: RunStatistics,
    /// The run was cut short by a user interrupt
    pub interrupted: bool,
    /// Draining ended because no result arrived within the drain timeout
    pub stalled: bool,
    pub elapsed: Duration,
}

impl RunReport {
    /// Every discovered image has a result
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.drained == self.discovered
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let stats = &self.statistics;

        println!();
        if self.interrupted {
            println!("{}", style("Process stopped").yellow().bold());
        }
        println!("{}", style("Finished").bold());
        println!(
            " {} of images got converted and {} got skipped.",
            style(stats.converted).green(),
            stats.skipped
        );
        println!(
            "  {}: {} / {} images in {:.2}s",
            style("Drained").blue(),
            self.drained,
            self.discovered,
            self.elapsed.as_secs_f64()
        );
        println!(
            "  {}: {:.2}MB -> {:.2}MB ({:.1}% reduction)",
            style("Size").cyan(),
            stats.bytes_before as f64 / 1024.0 / 1024.0,
            stats.bytes_after as f64 / 1024.0 / 1024.0,
            stats.size_reduction()
        );

        if stats.errored > 0 {
            println!("  {}: {}", style("Errors").red(), stats.errored);
            for (i, failure) in stats.failures.iter().enumerate() {
                println!(
                    "    {}: {} [{}] {}",
                    i + 1,
                    failure.path.display(),
                    failure.kind,
                    failure.detail.as_deref().unwrap_or("")
                );
            }
        }
    }
}
