//! Run coordinator: seeds the work queue, drains results and owns shutdown

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::pool::{ShutdownSignal, WorkerContext, WorkerPool};
use super::progress::ProgressSink;
use super::stats::{RunReport, RunStatistics};
use crate::config::RunOptions;
use crate::error::{Result, ResizerError};
use crate::processing::{ImageCodec, ProcessedResult};
use crate::walker::ImageWalker;

/// Longest single wait on the result channel, so an interrupt is noticed
/// promptly even with a long drain timeout
const DRAIN_SLICE: Duration = Duration::from_millis(100);

/// Coordinator lifecycle, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seeding,
    Draining,
    ShuttingDown,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Seeding => "seeding",
            Phase::Draining => "draining",
            Phase::ShuttingDown => "shutting down",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

/// How draining ended
enum DrainOutcome {
    Complete,
    Stalled,
    Interrupted,
}

/// Drives one resize run over a source tree
pub struct Coordinator<C> {
    options: RunOptions,
    codec: Arc<C>,
    interrupt: Arc<AtomicBool>,
}

impl<C: ImageCodec + 'static> Coordinator<C> {
    pub fn new(options: RunOptions, codec: Arc<C>) -> Self {
        Self {
            options,
            codec,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use an interrupt flag owned by the caller (typically set from a
    /// Ctrl+C handler)
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Flag that stops the run when set
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn enter(&self, phase: Phase) {
        info!("Coordinator {}", phase);
    }

    fn validate(&self) -> Result<()> {
        let source = &self.options.source_root;
        if !source.is_dir() {
            return Err(ResizerError::config(format!(
                "Source {:?} does not exist or is not a directory",
                source
            )));
        }
        if self.options.max_size == 0 {
            return Err(ResizerError::config("max_size must be greater than 0"));
        }
        // Outputs written under the source would be walked and queued again
        let source = resolve(source);
        let destination = resolve(&self.options.destination_root);
        if destination != source && destination.starts_with(&source) {
            return Err(ResizerError::config(format!(
                "Destination {:?} is inside source {:?}",
                destination, source
            )));
        }
        fs::create_dir_all(&self.options.destination_root)?;
        Ok(())
    }

    /// Run the pipeline to completion, stall or interrupt.
    ///
    /// Only setup failures are errors. Per-item failures end up in the
    /// report, and an interrupted run still returns the partial report.
    pub fn run(&self, sink: &mut dyn ProgressSink) -> Result<RunReport> {
        self.validate()?;
        let started = Instant::now();

        let (work_tx, work_rx) = unbounded::<PathBuf>();
        let (result_tx, result_rx) = unbounded::<ProcessedResult>();
        let shutdown = ShutdownSignal::new();
        let context = Arc::new(WorkerContext {
            source_root: self.options.source_root.clone(),
            destination_root: self.options.destination_root.clone(),
            max_size: self.options.max_size,
            poll_interval: self.options.poll_interval,
        });

        // The pool holds the only result senders, so the channel disconnects
        // once every worker has exited
        let pool = WorkerPool::start(
            self.options.workers,
            Arc::clone(&self.codec),
            context,
            work_rx,
            result_tx,
            shutdown.clone(),
        )?;
        info!(
            "Resizing images under {:?} to at most {}px with {} workers",
            self.options.source_root,
            self.options.max_size,
            pool.size()
        );

        self.enter(Phase::Seeding);
        let mut discovered = 0;
        let mut interrupted = false;
        for path in ImageWalker::new(self.options.source_root.clone(), &*self.codec) {
            if self.interrupted() {
                warn!("Interrupted while seeding after {} images", discovered);
                interrupted = true;
                break;
            }
            if work_tx.send(path).is_err() {
                warn!("Every worker has exited; stopped seeding");
                break;
            }
            discovered += 1;
        }
        sink.discovered(discovered);

        let mut statistics = RunStatistics::new();
        let mut drained = 0;
        let mut stalled = false;
        if !interrupted {
            self.enter(Phase::Draining);
            match self.drain(&result_rx, discovered, &mut statistics, &mut drained, sink) {
                DrainOutcome::Complete => {}
                DrainOutcome::Stalled => stalled = true,
                DrainOutcome::Interrupted => interrupted = true,
            }
        }

        self.enter(Phase::ShuttingDown);
        shutdown.trigger();
        drop(work_tx);
        let panicked = pool.join();
        if panicked > 0 {
            warn!("{} workers panicked", panicked);
        }

        // Every worker has exited, so each image it finished (including those
        // finished while seeding was interrupted) is already in the channel
        let late = Self::record_ready(&result_rx, &mut statistics, &mut drained, sink);
        if late > 0 {
            debug!("Recorded {} results finished after draining stopped", late);
        }

        self.enter(Phase::Done);
        let report = RunReport {
            discovered,
            drained,
            statistics,
            interrupted,
            stalled,
            elapsed: started.elapsed(),
        };
        info!(
            "{} converted, {} skipped, {} failed in {:.2}s",
            report.statistics.converted,
            report.statistics.skipped,
            report.statistics.errored,
            report.elapsed.as_secs_f64()
        );
        sink.finished(&report);

        Ok(report)
    }

    /// Record the results already queued without waiting for more
    fn record_ready(
        result_rx: &Receiver<ProcessedResult>,
        statistics: &mut RunStatistics,
        drained: &mut usize,
        sink: &mut dyn ProgressSink,
    ) -> usize {
        let mut recorded = 0;
        for result in result_rx.try_iter() {
            *drained += 1;
            statistics.record(&result);
            sink.progress(&result);
            recorded += 1;
        }
        recorded
    }

    fn drain(
        &self,
        result_rx: &Receiver<ProcessedResult>,
        discovered: usize,
        statistics: &mut RunStatistics,
        drained: &mut usize,
        sink: &mut dyn ProgressSink,
    ) -> DrainOutcome {
        let drain_timeout = self.options.drain_timeout;
        let slice = drain_timeout.min(DRAIN_SLICE);
        let mut last_result = Instant::now();

        while *drained < discovered {
            if self.interrupted() {
                warn!("Interrupted with {} of {} results drained", drained, discovered);
                return DrainOutcome::Interrupted;
            }

            match result_rx.recv_timeout(slice) {
                Ok(result) => {
                    debug!("Result for {:?}", result.path);
                    *drained += 1;
                    statistics.record(&result);
                    sink.progress(&result);
                    last_result = Instant::now();
                }
                Err(RecvTimeoutError::Timeout) => {
                    if last_result.elapsed() >= drain_timeout {
                        warn!(
                            "No result within {:?}; stopping with {} of {} drained",
                            drain_timeout, drained, discovered
                        );
                        return DrainOutcome::Stalled;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(
                        "Every worker has exited with {} of {} results drained",
                        drained, discovered
                    );
                    return DrainOutcome::Stalled;
                }
            }
        }

        DrainOutcome::Complete
    }
}

/// Canonical form of `path`, which may not exist yet: the nearest existing
/// ancestor is canonicalized and the missing components re-joined
fn resolve(path: &Path) -> PathBuf {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return missing.iter().rev().fold(canonical, |resolved, name| resolved.join(name));
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                current = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::parallel::progress::MemorySink;
    use crate::processing::{ImageInfo, ImageMetadata};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tempfile::TempDir;

    /// Reads dimensions from file names like `1200x640.img` and writes a
    /// placeholder on resize
    #[derive(Default)]
    struct NameCodec {
        delay: Duration,
        interrupt_on_resize: Option<Arc<AtomicBool>>,
        probe_delay: Duration,
        interrupt_on_probe: Option<(usize, Arc<AtomicBool>)>,
        probes: AtomicUsize,
    }

    impl ImageCodec for NameCodec {
        fn probe(&self, path: &Path) -> bool {
            let is_image = path.is_file() && path.extension().is_some_and(|ext| ext == "img");
            if is_image {
                thread::sleep(self.probe_delay);
                let seen = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((after, flag)) = &self.interrupt_on_probe {
                    if seen >= *after {
                        flag.store(true, Ordering::SeqCst);
                    }
                }
            }
            is_image
        }

        fn decode(&self, path: &Path) -> Result<ImageInfo> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let dims = stem.split('-').next().unwrap_or_default();
            let (width, height): (u32, u32) = dims
                .split_once('x')
                .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
                .ok_or_else(|| ResizerError::invalid_parameters("no dimensions in name"))?;
            Ok(ImageInfo {
                width,
                height,
                metadata: ImageMetadata::default(),
            })
        }

        fn resize_and_encode(&self, _: &Path, destination: &Path, width: u32, height: u32, _: &ImageMetadata) -> Result<u64> {
            thread::sleep(self.delay);
            if let Some(flag) = &self.interrupt_on_resize {
                flag.store(true, Ordering::SeqCst);
            }
            if width == 0 || height == 0 {
                return Err(ResizerError::invalid_parameters("empty target"));
            }
            let data = format!("{}x{}", width, height);
            crate::processing::write_atomically(destination, data.as_bytes())
        }
    }

    fn tree(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in names {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"original bytes").unwrap();
        }
        dir
    }

    /// Destination-relative paths of the converted, skipped and failed results
    fn outcome(sink: &MemorySink, root: &Path) -> [Vec<PathBuf>; 3] {
        let mut buckets: [Vec<PathBuf>; 3] = Default::default();
        for result in sink.results() {
            let bucket = match (result.processed(), result.error()) {
                (true, _) => 0,
                (false, None) => 1,
                (false, Some(_)) => 2,
            };
            buckets[bucket].push(result.path.strip_prefix(root).unwrap().to_path_buf());
        }
        for bucket in &mut buckets {
            bucket.sort();
        }
        buckets
    }

    /// Files whose bytes were replaced by a resize
    fn rewritten(root: &Path) -> usize {
        fs::read_dir(root)
            .unwrap()
            .filter(|entry| fs::read(entry.as_ref().unwrap().path()).unwrap() != b"original bytes")
            .count()
    }

    fn options(source: &Path, workers: usize) -> RunOptions {
        RunOptions::new(source, 300)
            .workers(workers)
            .poll_interval(Duration::from_millis(20))
            .drain_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Seeding.to_string(), "seeding");
        assert_eq!(Phase::ShuttingDown.to_string(), "shutting down");
    }

    #[test]
    fn test_run_converts_skips_and_fails() {
        let dir = tree(&["1200x640.img", "sub/300x300.img", "sub/deeper/10000x1.img", "notes.txt"]);
        let coordinator = Coordinator::new(options(dir.path(), 2), Arc::new(NameCodec::default()));

        let mut sink = MemorySink::new();
        let report = coordinator.run(&mut sink).unwrap();

        assert_eq!(report.discovered, 3);
        assert_eq!(report.drained, 3);
        assert!(report.is_complete());
        assert!(!report.stalled);

        let stats = &report.statistics;
        assert_eq!((stats.converted, stats.skipped, stats.errored), (1, 1, 1));
        assert_eq!(stats.failures[0].kind, ErrorKind::Encode);
        assert_eq!(fs::read(dir.path().join("1200x640.img")).unwrap(), b"300x160");
        assert_eq!(fs::read(dir.path().join("sub/300x300.img")).unwrap(), b"original bytes");

        assert_eq!(sink.discovered_total(), Some(3));
        assert_eq!(sink.results().len(), 3);
        assert!(sink.report().is_some());
    }

    #[test]
    fn test_pool_size_does_not_change_statistics() {
        let dir = tree(&["1200x640.img", "a/640x1200.img", "a/b/50x50.img", "a/b/900x901.img", "c/4000x1.img"]);
        let out = TempDir::new().unwrap();

        let run = |workers: usize, name: &str| {
            let destination = out.path().join(name);
            let options = options(dir.path(), workers).destination(&destination);
            let mut sink = MemorySink::new();
            let report = Coordinator::new(options, Arc::new(NameCodec::default()))
                .run(&mut sink)
                .unwrap();
            (report.statistics, outcome(&sink, &destination))
        };

        let (single, single_paths) = run(1, "single");
        let (many, many_paths) = run(4, "many");
        assert_eq!(single.converted, many.converted);
        assert_eq!(single.skipped, many.skipped);
        assert_eq!(single.errored, many.errored);
        assert_eq!(single.bytes_before, many.bytes_before);
        assert_eq!(single.bytes_after, many.bytes_after);
        assert_eq!(single_paths, many_paths);
        assert_eq!(single_paths[1], vec![PathBuf::from("a/b/50x50.img")]);
        assert_eq!(single_paths[2], vec![PathBuf::from("c/4000x1.img")]);
        assert!(out.path().join("many/a/b/900x901.img").exists());
        assert_eq!(fs::read(dir.path().join("1200x640.img")).unwrap(), b"original bytes");
    }

    #[test]
    fn test_interrupt_before_seeding_skips_everything() {
        let dir = tree(&["1200x640.img", "900x900.img"]);
        let coordinator = Coordinator::new(options(dir.path(), 2), Arc::new(NameCodec::default()));
        coordinator.interrupt_handle().store(true, Ordering::SeqCst);

        let mut sink = MemorySink::new();
        let report = coordinator.run(&mut sink).unwrap();

        assert!(report.interrupted);
        assert_eq!((report.discovered, report.drained), (0, 0));
        assert_eq!(report.statistics.total(), 0);
        assert_eq!(fs::read(dir.path().join("900x900.img")).unwrap(), b"original bytes");
        assert_eq!(sink.discovered_total(), Some(0));
    }

    #[test]
    fn test_interrupt_while_draining_reports_partial_counts() {
        let names: Vec<String> = (0..20).map(|i| format!("1200x640-{}.img", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = tree(&names);

        let interrupt = Arc::new(AtomicBool::new(false));
        let codec = NameCodec {
            delay: Duration::from_millis(50),
            interrupt_on_resize: Some(Arc::clone(&interrupt)),
            ..NameCodec::default()
        };
        let coordinator = Coordinator::new(options(dir.path(), 1), Arc::new(codec)).with_interrupt(interrupt);

        let report = coordinator.run(&mut MemorySink::new()).unwrap();
        assert!(report.interrupted);
        assert!(report.discovered >= 1);
        assert!(report.drained < names.len());
        assert_eq!(report.drained, report.statistics.total());
        assert_eq!(report.statistics.converted, rewritten(dir.path()));
    }

    #[test]
    fn test_interrupt_while_seeding_reports_finished_images() {
        let names: Vec<String> = (0..30).map(|i| format!("1200x640-{:02}.img", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = tree(&names);

        let interrupt = Arc::new(AtomicBool::new(false));
        let codec = NameCodec {
            probe_delay: Duration::from_millis(30),
            interrupt_on_probe: Some((16, Arc::clone(&interrupt))),
            ..NameCodec::default()
        };
        let coordinator = Coordinator::new(options(dir.path(), 2), Arc::new(codec)).with_interrupt(interrupt);

        let mut sink = MemorySink::new();
        let report = coordinator.run(&mut sink).unwrap();

        assert!(report.interrupted);
        assert_eq!(report.discovered, 15);
        assert!(report.statistics.converted >= 1);
        assert_eq!(report.statistics.converted, rewritten(dir.path()));
        assert_eq!(report.drained, report.statistics.total());
        assert_eq!(sink.results().len(), report.drained);
    }

    #[test]
    fn test_stall_ends_draining_without_error() {
        let dir = tree(&["1200x640-a.img", "1200x640-b.img"]);
        let codec = NameCodec {
            delay: Duration::from_millis(600),
            ..NameCodec::default()
        };
        let options = options(dir.path(), 1).drain_timeout(Duration::from_millis(100));
        let report = Coordinator::new(options, Arc::new(codec)).run(&mut MemorySink::new()).unwrap();

        assert!(report.stalled);
        assert!(!report.interrupted);
        assert!(report.drained < report.discovered);
    }

    #[test]
    fn test_invalid_runs_are_rejected() {
        let dir = TempDir::new().unwrap();
        let missing = Coordinator::new(
            RunOptions::new(dir.path().join("missing"), 300),
            Arc::new(NameCodec::default()),
        );
        assert!(missing.run(&mut MemorySink::new()).is_err());

        let zero = Coordinator::new(RunOptions::new(dir.path(), 0), Arc::new(NameCodec::default()));
        assert!(zero.run(&mut MemorySink::new()).is_err());
    }

    #[test]
    fn test_destination_inside_source_is_rejected() {
        let dir = tree(&["1200x640.img"]);
        let nested = Coordinator::new(
            options(dir.path(), 1).destination(dir.path().join("small")),
            Arc::new(NameCodec::default()),
        );
        assert!(nested.run(&mut MemorySink::new()).is_err());
        assert!(!dir.path().join("small").exists());
        assert_eq!(fs::read(dir.path().join("1200x640.img")).unwrap(), b"original bytes");

        let sibling = TempDir::new().unwrap();
        let beside = Coordinator::new(
            options(dir.path(), 1).destination(sibling.path().join("small")),
            Arc::new(NameCodec::default()),
        );
        assert!(beside.run(&mut MemorySink::new()).unwrap().is_complete());
    }

    #[test]
    fn test_resolve_handles_missing_components() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(resolve(dir.path()), root);
        assert_eq!(resolve(&dir.path().join("a/b")), root.join("a/b"));
    }

    #[test]
    fn test_empty_tree_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let report = Coordinator::new(options(dir.path(), 2), Arc::new(NameCodec::default()))
            .run(&mut MemorySink::new())
            .unwrap();
        assert_eq!(report.discovered, 0);
        assert!(report.is_complete());
    }
}
