//! Serial command queue with completion callbacks
//!
//! Stands in for a device command queue: buffers run one after another on a
//! dedicated thread, in submission order, and each one's completion handler
//! runs on that thread as soon as its work returns.

use crate::error::{DispatchError, PipelineError};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Work = Box<dyn FnOnce() -> Result<(), DispatchError> + Send>;
type Completion = Box<dyn FnOnce(Result<(), DispatchError>) + Send>;

/// Encoded work plus what to do once it finishes
pub struct CommandBuffer {
    label: &'static str,
    work: Work,
    on_complete: Option<Completion>,
}

impl CommandBuffer {
    pub fn new<F>(label: &'static str, work: F) -> Self
    where
        F: FnOnce() -> Result<(), DispatchError> + Send + 'static,
    {
        Self {
            label,
            work: Box::new(work),
            on_complete: None,
        }
    }

    pub fn on_complete<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Result<(), DispatchError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(handler));
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    fn run(self) {
        let label = self.label;
        let result = panic::catch_unwind(AssertUnwindSafe(self.work)).unwrap_or_else(|_| {
            log::error!("Command buffer '{}' panicked", label);
            Err(DispatchError::Aborted(format!("{} panicked", label)))
        });

        if let Some(handler) = self.on_complete {
            handler(result);
        }
    }
}

#[derive(Default)]
struct QueueCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
}

pub struct CommandQueue {
    tx: Mutex<Option<Sender<CommandBuffer>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<QueueCounters>,
}

impl CommandQueue {
    pub fn new(name: &str) -> Result<Self, PipelineError> {
        let (tx, rx) = channel::unbounded::<CommandBuffer>();
        let counters = Arc::new(QueueCounters::default());

        let thread_counters = Arc::clone(&counters);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for buffer in rx.iter() {
                    buffer.run();
                    thread_counters.completed.fetch_add(1, Ordering::Release);
                }
                log::debug!("Command queue thread exiting");
            })
            .map_err(|e| PipelineError::Construction(format!("command queue thread: {}", e)))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            counters,
        })
    }

    /// Enqueue a buffer. A closed queue hands the buffer back unrun.
    pub fn submit(&self, buffer: CommandBuffer) -> Result<(), CommandBuffer> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(buffer);
        };
        tx.send(buffer).map_err(|e| e.into_inner())?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Buffers submitted but not yet completed
    pub fn pending(&self) -> u64 {
        let completed = self.counters.completed.load(Ordering::Acquire);
        self.counters
            .submitted
            .load(Ordering::Relaxed)
            .saturating_sub(completed)
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Acquire)
    }

    /// Stop accepting work, finish what is queued and join the thread
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // Joining from the queue's own thread would never return
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Command queue thread panicked");
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
