//! Producer/consumer conversion pipeline
//!
//! A producer thread publishes frames into a latest-wins mailbox and never
//! waits on conversion. The consumer side ticks at the display rate: each
//! tick takes an in-flight unit, pulls whatever frame is pending and submits
//! its decode to the command queue. When the queue reports completion the
//! unit is returned and the result fans out to every connected output.
//! Ticks with nothing new re-present the last output instead.

use crate::buffer_pool::PoolStats;
use crate::command_queue::{CommandBuffer, CommandQueue};
use crate::compute::ComputeBackend;
use crate::config::PipelineConfig;
use crate::converter::{Converter, PresentedFrame, SkippedUnsupportedFormat};
use crate::error::{DispatchError, PipelineError, Result};
use crate::in_flight::GateStats;
use crate::mailbox::{LatestFrameMailbox, MailboxStats};
use crate::types::{FrameRecord, OwnedFrame};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// What a single consumer tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending and nothing presented yet
    Idle,
    /// Nothing pending; the last output went out again
    Represented { sequence: u64 },
    Skipped(SkippedUnsupportedFormat),
    /// No buffers for this geometry; the next frame retries
    AllocationFailed,
    /// Frame layout does not cover its own geometry
    Rejected,
    /// The command queue is gone
    DispatchFailed,
    Submitted { slot_index: usize, sequence: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub ticks: u64,
    pub submitted: u64,
    pub completed: u64,
    pub represented: u64,
    pub skipped_unsupported: u64,
    pub allocation_failures: u64,
    pub dispatch_failures: u64,
    pub rejected: u64,
    /// Deliveries dropped because an output's channel was full
    pub missed_outputs: u64,
    pub mailbox: MailboxStats,
    pub in_flight: GateStats,
    pub pool: PoolStats,
}

struct OutputConnection {
    frame_rate_divisor: u32,
    frame_count: u32,
    tx: Sender<PresentedFrame>,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    submitted: AtomicU64,
    completed: AtomicU64,
    represented: AtomicU64,
    dispatch_failures: AtomicU64,
    rejected: AtomicU64,
    missed_outputs: AtomicU64,
}

struct Shared {
    converter: Converter,
    queue: CommandQueue,
    mailbox: LatestFrameMailbox<OwnedFrame>,
    last_output: Mutex<Option<PresentedFrame>>,
    outputs: Mutex<Vec<OutputConnection>>,
    counters: Counters,
}

impl Shared {
    fn tick(self: &Arc<Self>) -> TickOutcome {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        let outcome = self.tick_inner();
        log::trace!("Tick: {:?}", outcome);
        outcome
    }

    fn tick_inner(self: &Arc<Self>) -> TickOutcome {
        let permit = self.converter.in_flight().acquire_permit();

        let Some(frame) = self.mailbox.take_and_clear() else {
            drop(permit);
            return self.represent();
        };
        let record = frame.record();

        let kernel = match self.converter.decode_kernel(record.format) {
            Ok(kernel) => kernel,
            Err(skipped) => return TickOutcome::Skipped(skipped),
        };

        let job = match self.converter.prepare_decode(kernel, &record) {
            Ok(job) => job,
            Err(PipelineError::Allocation { .. }) => return TickOutcome::AllocationFailed,
            Err(err) => {
                log::warn!("Rejecting frame: {}", err);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return TickOutcome::Rejected;
            }
        };
        drop(frame);

        let presented = job.presented();
        let slot_index = presented.slot_index;
        let sequence = presented.sequence;

        let backend: Arc<dyn ComputeBackend> = Arc::clone(self.converter.backend());
        let shared = Arc::clone(self);
        let buffer = CommandBuffer::new("decode", move || job.run(backend.as_ref())).on_complete(
            move |result| {
                shared.complete(presented, result);
                drop(permit);
            },
        );

        if self.queue.submit(buffer).is_err() {
            log::warn!("Command queue closed, dropping frame {}", sequence);
            self.counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::DispatchFailed;
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        TickOutcome::Submitted {
            slot_index,
            sequence,
        }
    }

    fn represent(&self) -> TickOutcome {
        let last = self.last_output.lock().clone();
        match last {
            Some(frame) => {
                let sequence = frame.sequence;
                self.fan_out(&frame);
                self.counters.represented.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Represented { sequence }
            }
            None => TickOutcome::Idle,
        }
    }

    /// Runs on the queue thread once a decode has finished
    fn complete(&self, frame: PresentedFrame, result: std::result::Result<(), DispatchError>) {
        if let Err(err) = result {
            log::warn!("Decode of frame {} failed: {}", frame.sequence, err);
            self.counters.dispatch_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.converter.record_decoded();

        let newer = {
            let mut last = self.last_output.lock();
            let newer = last
                .as_ref()
                .map_or(true, |current| frame.sequence > current.sequence);
            if newer {
                *last = Some(frame.clone());
            }
            newer
        };

        if newer {
            self.fan_out(&frame);
        }
        self.counters.completed.fetch_add(1, Ordering::Release);
    }

    fn fan_out(&self, frame: &PresentedFrame) {
        let mut outputs = self.outputs.lock();

        outputs.retain_mut(|output| {
            output.frame_count += 1;
            if output.frame_count < output.frame_rate_divisor {
                return true;
            }
            output.frame_count = 0;

            // Slow outputs miss frames rather than queue them
            match output.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.counters.missed_outputs.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }
}

pub struct Pipeline {
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Pipeline {
    /// Pipeline on the CPU backend
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::from_converter(Converter::new(config)?)
    }

    pub fn with_backend(backend: Arc<dyn ComputeBackend>, config: PipelineConfig) -> Result<Self> {
        Self::from_converter(Converter::with_backend(backend, config)?)
    }

    fn from_converter(converter: Converter) -> Result<Self> {
        let queue = CommandQueue::new("wirelink-command-queue")?;

        log::info!(
            "Pipeline ready: {} frames in flight at {:.2} fps",
            converter.config().in_flight_capacity,
            converter.config().tick_rate.as_f64()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                converter,
                queue,
                mailbox: LatestFrameMailbox::new(),
                last_output: Mutex::new(None),
                outputs: Mutex::new(Vec::new()),
                counters: Counters::default(),
            }),
            running: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn converter(&self) -> &Converter {
        &self.shared.converter
    }

    /// Hand a frame to the consumer (producer side).
    ///
    /// The bytes are copied before this returns. Returns true when an
    /// unconsumed frame was displaced.
    pub fn publish(&self, frame: &FrameRecord<'_>) -> bool {
        let owned = frame.to_owned_frame();
        self.shared.mailbox.publish(owned).is_some()
    }

    /// Run one consumer step. Blocks while every in-flight unit is taken.
    pub fn tick(&self) -> TickOutcome {
        self.shared.tick()
    }

    /// Subscribe to every presented frame
    pub fn connect_output(&self) -> Receiver<PresentedFrame> {
        self.connect_output_with_divisor(1)
    }

    /// Subscribe to every `frame_rate_divisor`-th presented frame, e.g. 2
    /// for a 30 fps consumer on a 60 fps pipeline
    pub fn connect_output_with_divisor(&self, frame_rate_divisor: u32) -> Receiver<PresentedFrame> {
        let depth = self.shared.converter.config().output_channel_depth;
        let (tx, rx) = channel::bounded(depth);

        self.shared.outputs.lock().push(OutputConnection {
            frame_rate_divisor: frame_rate_divisor.max(1),
            frame_count: 0,
            tx,
        });

        rx
    }

    pub fn output_count(&self) -> usize {
        self.shared.outputs.lock().len()
    }

    pub fn latest_output(&self) -> Option<PresentedFrame> {
        self.shared.last_output.lock().clone()
    }

    /// Wait for all in-flight work, then forget the last output and any
    /// pending frame
    pub fn drain_and_reset(&self) {
        let shared = &self.shared;
        shared.converter.in_flight().drain_and_reset(|| {
            shared.last_output.lock().take();
            shared.mailbox.clear();
        });
    }

    /// Start ticking on a background thread at the configured rate
    pub fn start(&self) -> Result<()> {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return Ok(());
        }

        let tick_rate = self.shared.converter.config().tick_rate;
        let interval = tick_rate.interval().ok_or_else(|| {
            PipelineError::Construction(format!("tick rate {:?} is not a valid rate", tick_rate))
        })?;

        self.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("wirelink-ticker".to_string())
            .spawn(move || {
                log::info!("Ticker started, {:?} per tick", interval);
                let mut deadline = Instant::now();

                while running.load(Ordering::Acquire) {
                    shared.tick();

                    deadline += interval;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Fell behind, don't try to catch up
                        deadline = now;
                    }
                }

                log::info!("Ticker thread exiting");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                PipelineError::Construction(format!("ticker thread: {}", e))
            })?;

        *ticker = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the ticker, wait for in-flight work, free buffers and stop the
    /// command queue
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.ticker.lock().take() {
            if handle.join().is_err() {
                log::error!("Ticker thread panicked");
            }
        }

        self.drain_and_reset();
        self.shared.converter.pool().clear();
        self.shared.queue.shutdown();
        self.shared.outputs.lock().clear();

        log::info!("Pipeline shut down");
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        let converter = self.shared.converter.stats();

        PipelineStats {
            ticks: counters.ticks.load(Ordering::Relaxed),
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Acquire),
            represented: counters.represented.load(Ordering::Relaxed),
            skipped_unsupported: converter.skipped_unsupported,
            allocation_failures: converter.allocation_failures,
            dispatch_failures: counters.dispatch_failures.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            missed_outputs: counters.missed_outputs.load(Ordering::Relaxed),
            mailbox: self.shared.mailbox.stats(),
            in_flight: self.shared.converter.in_flight().stats(),
            pool: self.shared.converter.pool().stats(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
