//! Fixed-size pool of worker threads fed from a shared work queue

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result, ResizerError};
use crate::processing::{resize_image, ImageCodec, ProcessedResult};

/// Cooperative stop flag shared by the coordinator and every worker.
///
/// Only the coordinator triggers it; workers check it between items.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually set it.
    pub fn trigger(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A discovered image and where its output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl WorkItem {
    /// Re-root `source` from `source_root` under `destination_root`
    pub fn new(source_root: &Path, destination_root: &Path, source: PathBuf) -> Result<Self> {
        Ok(Self {
            destination: destination_for(source_root, destination_root, &source)?,
            source,
        })
    }
}

/// Where the output for `source` goes. When both roots are equal this is
/// `source` itself.
pub fn destination_for(source_root: &Path, destination_root: &Path, source: &Path) -> Result<PathBuf> {
    let relative = source
        .strip_prefix(source_root)
        .map_err(|_| ResizerError::path_integrity(source.to_path_buf(), source_root.to_path_buf()))?;
    Ok(destination_root.join(relative))
}

/// Everything a worker needs that does not change during a run
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub max_size: u32,
    pub poll_interval: Duration,
}

/// Handles of the running workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<usize>>,
}

impl WorkerPool {
    /// Spawn `size` workers. Failing to spawn any thread is fatal to the run;
    /// workers already started are stopped through `shutdown`.
    pub fn start<C: ImageCodec + 'static>(
        size: usize,
        codec: Arc<C>,
        context: Arc<WorkerContext>,
        work_rx: Receiver<PathBuf>,
        result_tx: Sender<ProcessedResult>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let size = size.max(1);
        let mut handles = Vec::with_capacity(size);

        for id in 0..size {
            let worker = Worker {
                id,
                codec: Arc::clone(&codec),
                context: Arc::clone(&context),
                work_rx: work_rx.clone(),
                result_tx: result_tx.clone(),
                shutdown: shutdown.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("treeshrink-worker-{}", id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    shutdown.trigger();
                    Self { handles }.join();
                    return Err(ResizerError::pool(format!("Failed to spawn worker {}: {}", id, e)));
                }
            }
        }

        debug!("Started {} workers", size);
        Ok(Self { handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit. Returns the number of workers that
    /// panicked.
    pub fn join(self) -> usize {
        let mut panicked = 0;
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            match handle.join() {
                Ok(handled) => debug!("{} exited after {} items", name, handled),
                Err(_) => {
                    warn!("{} panicked", name);
                    panicked += 1;
                }
            }
        }
        panicked
    }
}

struct Worker<C> {
    id: usize,
    codec: Arc<C>,
    context: Arc<WorkerContext>,
    work_rx: Receiver<PathBuf>,
    result_tx: Sender<ProcessedResult>,
    shutdown: ShutdownSignal,
}

impl<C: ImageCodec> Worker<C> {
    /// Pull items until shutdown is signalled or the queue is closed.
    /// Shutdown is only observed between items, never mid-encode. A panic
    /// while processing an item becomes that item's failed result.
    fn run(self) -> usize {
        let mut handled = 0;

        while !self.shutdown.is_triggered() {
            let source = match self.work_rx.recv_timeout(self.context.poll_interval) {
                Ok(source) => source,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let result = match panic::catch_unwind(AssertUnwindSafe(|| self.process(source.clone()))) {
                Ok(result) => result,
                Err(payload) => self.panicked(source, payload),
            };
            handled += 1;

            if self.result_tx.send(result).is_err() {
                debug!("worker {}: result channel closed", self.id);
                break;
            }
        }

        handled
    }

    fn process(&self, source: PathBuf) -> ProcessedResult {
        let context = &self.context;
        match WorkItem::new(&context.source_root, &context.destination_root, source) {
            Ok(item) => resize_image(&*self.codec, &item.source, &item.destination, context.max_size),
            Err(e) => {
                warn!("worker {}: {}", self.id, e);
                let path = match &e {
                    ResizerError::PathIntegrity { path, .. } => path.clone(),
                    _ => PathBuf::new(),
                };
                ProcessedResult::failed(path, (0, 0), 0, ErrorKind::PathIntegrity, e.to_string())
            }
        }
    }

    fn panicked(&self, source: PathBuf, payload: Box<dyn Any + Send>) -> ProcessedResult {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!("worker {}: panicked on {:?}: {}", self.id, source, message);

        let context = &self.context;
        let size = fs::metadata(&source).map(|m| m.len()).unwrap_or(0);
        let path = destination_for(&context.source_root, &context.destination_root, &source).unwrap_or(source);
        ProcessedResult::failed(path, (0, 0), size, ErrorKind::Io, format!("worker panicked: {}", message))
    }
}
