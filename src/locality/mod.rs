//! Locality lanes
//!
//! A lane is a serialized execution context: continuations posted to
//! the same lane run one at a time, in posting order. Parallelism exists
//! only across lanes.
//!
//! `LocalityPool` backs every lane with its own OS thread driving a
//! single-threaded tokio runtime that drains an unbounded channel of
//! continuations.

mod errors;

pub use errors::{LocalityError, LocalityResult};

use std::fmt;
use std::thread::{self, JoinHandle};

use tokio::runtime::Builder;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::observability::{event_enabled, log_event_with_fields, Event};

/// Work posted onto a lane
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Posts continuations onto serialized lanes
pub trait Scheduler: Send + Sync {
    /// Number of lanes
    fn lanes(&self) -> usize;

    /// Fire-and-forget posting of `job` onto `lane`
    ///
    /// Lanes are numbered `0..lanes()`; larger numbers wrap around.
    fn post(&self, lane: usize, job: Continuation);
}

struct Lane {
    sender: Option<UnboundedSender<Continuation>>,
    thread: Option<JoinHandle<()>>,
}

/// Thread-per-lane scheduler
pub struct LocalityPool {
    lanes: Vec<Lane>,
}

impl LocalityPool {
    /// Start `lanes` lanes
    pub fn new(lanes: usize) -> LocalityResult<Self> {
        if lanes == 0 {
            return Err(LocalityError::NoLanes);
        }
        let mut pool = Self {
            lanes: Vec::with_capacity(lanes),
        };
        for lane in 0..lanes {
            // Already started lanes are stopped by Drop on error
            pool.lanes.push(Self::start_lane(lane)?);
        }
        Ok(pool)
    }

    /// One lane per available CPU
    pub fn with_available_parallelism() -> LocalityResult<Self> {
        let lanes = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(lanes)
    }

    fn start_lane(lane: usize) -> LocalityResult<Lane> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|source| LocalityError::Spawn { lane, source })?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<Continuation>();

        let thread = thread::Builder::new()
            .name(format!("aerotx-lane-{}", lane))
            .spawn(move || {
                if event_enabled(Event::LaneStart) {
                    log_event_with_fields(Event::LaneStart, &[("lane", &lane.to_string())]);
                }
                runtime.block_on(async move {
                    while let Some(job) = receiver.recv().await {
                        job();
                    }
                });
            })
            .map_err(|source| LocalityError::Spawn { lane, source })?;

        Ok(Lane {
            sender: Some(sender),
            thread: Some(thread),
        })
    }
}

impl Scheduler for LocalityPool {
    fn lanes(&self) -> usize {
        self.lanes.len()
    }

    fn post(&self, lane: usize, job: Continuation) {
        let index = lane % self.lanes.len();
        let sent = match &self.lanes[index].sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            log_event_with_fields(Event::LanePostFailed, &[("lane", &index.to_string())]);
        }
    }
}

impl Drop for LocalityPool {
    fn drop(&mut self) {
        // Closing every channel first lets all lanes wind down together
        for lane in &mut self.lanes {
            lane.sender.take();
        }
        let current = thread::current().id();
        for lane in &mut self.lanes {
            if let Some(thread) = lane.thread.take() {
                // A lane cannot join itself
                if thread.thread().id() != current {
                    let _ = thread.join();
                }
            }
        }
    }
}

impl fmt::Debug for LocalityPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalityPool")
            .field("lanes", &self.lanes.len())
            .finish()
    }
}
