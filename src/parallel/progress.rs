//! Progress reporting for resize runs

use std::io::{self, Write};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::warn;

use super::stats::RunReport;
use crate::processing::ProcessedResult;

/// Receives the events of a run, in order: `discovered` once, `progress`
/// once per drained result, then `finished`.
pub trait ProgressSink {
    fn discovered(&mut self, total: usize);

    fn progress(&mut self, result: &ProcessedResult);

    fn finished(&mut self, report: &RunReport);
}

/// Progress update event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressUpdate {
    Discovered { total: usize },
    Processed { result: ProcessedResult },
    Finished { report: RunReport },
}

/// Indicatif bar while draining, styled summary at the end
#[derive(Default)]
pub struct ConsoleProgress {
    bar: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for ConsoleProgress {
    fn discovered(&mut self, total: usize) {
        println!("Found {} image files.", style(total).bold());

        let bar = ProgressBar::new(total as u64);
        match ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%, {eta})")
        {
            Ok(bar_style) => bar.set_style(bar_style.progress_chars("#>-")),
            Err(e) => warn!("Falling back to default progress style: {}", e),
        }
        self.bar = Some(bar);
    }

    fn progress(&mut self, result: &ProcessedResult) {
        if let Some(bar) = &self.bar {
            if let Some(kind) = result.error() {
                bar.println(format!(
                    "{} {} [{}]",
                    style("✗").red(),
                    result.path.display(),
                    kind
                ));
            }
            bar.inc(1);
        }
    }

    fn finished(&mut self, report: &RunReport) {
        if let Some(bar) = self.bar.take() {
            if report.interrupted || report.stalled {
                bar.abandon();
            } else {
                bar.finish();
            }
        }
        report.print_summary();
    }
}

/// One JSON object per event, one event per line
pub struct JsonProgress<W: Write = io::Stdout> {
    out: W,
}

impl JsonProgress {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> JsonProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, update: &ProgressUpdate) {
        if let Err(e) = write_line(&mut self.out, update) {
            warn!("Failed to write progress event: {}", e);
        }
    }
}

fn write_line<W: Write>(out: &mut W, update: &ProgressUpdate) -> io::Result<()> {
    serde_json::to_writer(&mut *out, update)?;
    writeln!(out)?;
    out.flush()
}

impl<W: Write> ProgressSink for JsonProgress<W> {
    fn discovered(&mut self, total: usize) {
        self.emit(&ProgressUpdate::Discovered { total });
    }

    fn progress(&mut self, result: &ProcessedResult) {
        self.emit(&ProgressUpdate::Processed {
            result: result.clone(),
        });
    }

    fn finished(&mut self, report: &RunReport) {
        self.emit(&ProgressUpdate::Finished {
            report: report.clone(),
        });
    }
}

/// Keeps every event for later inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<ProgressUpdate>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total announced by `discovered`, if it was emitted
    pub fn discovered_total(&self) -> Option<usize> {
        self.events.iter().find_map(|event| match event {
            ProgressUpdate::Discovered { total } => Some(*total),
            _ => None,
        })
    }

    pub fn results(&self) -> Vec<&ProcessedResult> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ProgressUpdate::Processed { result } => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn report(&self) -> Option<&RunReport> {
        self.events.iter().find_map(|event| match event {
            ProgressUpdate::Finished { report } => Some(report),
            _ => None,
        })
    }
}

impl ProgressSink for MemorySink {
    fn discovered(&mut self, total: usize) {
        self.events.push(ProgressUpdate::Discovered { total });
    }

    fn progress(&mut self, result: &ProcessedResult) {
        self.events.push(ProgressUpdate::Processed {
            result: result.clone(),
        });
    }

    fn finished(&mut self, report: &RunReport) {
        self.events.push(ProgressUpdate::Finished {
            report: report.clone(),
        });
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn discovered(&mut self, _total: usize) {}

    fn progress(&mut self, _result: &ProcessedResult) {}

    fn finished(&mut self, _report: &RunReport) {}
}
