//! Background tracking with a latest-wins frame slot.
//!
//! A worker thread owns the [`PatternTracker`]. Callers drop frames into a
//! single front buffer that the worker swaps out when it is ready for more;
//! frames arriving while it is busy simply overwrite each other. After every
//! pass the worker publishes a full [`TrackerSnapshot`] that readers clone.

use crate::{AsyncError, AsyncParams, PatternTracker};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use nalgebra::{Matrix4, Point2};
use parking_lot::Mutex;
use pattern_track_core::{Homography, ImageBuffer, ImageView};
use pattern_track_features::{Keypoint, Match};
use pattern_track_geometry::Pose;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Everything a reader can observe about the latest processed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackerSnapshot {
    /// Sequence number (from [`AsyncTracker::submit_frame`]) of the frame this
    /// snapshot describes; 0 before the first processed frame.
    pub frame_index: u64,
    pub found: bool,
    pub query_keypoints: Vec<Keypoint>,
    pub pattern_keypoints: Vec<Keypoint>,
    pub matches: Vec<Match>,
    pub quad: Option<[Point2<f32>; 4]>,
    pub homography: Option<Homography>,
    pub pose: Option<Pose>,
    pub model_matrix: Option<Matrix4<f64>>,
    pub update_time: Option<Duration>,
}

impl TrackerSnapshot {
    fn capture(tracker: &PatternTracker, frame_index: u64) -> Self {
        Self {
            frame_index,
            found: tracker.is_found(),
            query_keypoints: tracker.query_keypoints().to_vec(),
            pattern_keypoints: tracker.pattern_keypoints().to_vec(),
            matches: tracker.matches().to_vec(),
            quad: tracker.quad(),
            homography: tracker.homography(),
            pose: tracker.pose(),
            model_matrix: tracker.model_matrix(),
            update_time: tracker.last_update_time(),
        }
    }
}

struct Slots {
    front: ImageBuffer,
    front_updated: bool,
    /// Sequence number of the frame currently in `front`.
    front_seq: u64,
    /// Last sequence number handed out by `submit_frame`.
    latest_seq: u64,
    snapshot: TrackerSnapshot,
}

struct Shared {
    slots: Mutex<Slots>,
    running: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<PatternTracker>,
}

/// Runs a [`PatternTracker`] on its own thread.
///
/// `submit_frame` never waits for tracking; it only copies pixels into the
/// front buffer. Readers see the snapshot of the most recently processed
/// frame, so the reported frame index never decreases.
pub struct AsyncTracker {
    shared: Arc<Shared>,
    params: AsyncParams,
    worker: Option<Worker>,
    /// The tracker while no worker runs.
    parked: Option<PatternTracker>,
}

fn worker_loop(
    shared: Arc<Shared>,
    mut tracker: PatternTracker,
    idle_sleep: Duration,
    done: Sender<PatternTracker>,
) {
    let mut back = ImageBuffer::default();
    while shared.running.load(Ordering::SeqCst) {
        let pending = {
            let mut slots = shared.slots.lock();
            if slots.front_updated {
                std::mem::swap(&mut slots.front, &mut back);
                slots.front_updated = false;
                Some(slots.front_seq)
            } else {
                None
            }
        };

        let Some(seq) = pending else {
            thread::sleep(idle_sleep);
            continue;
        };

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!("async_frame", seq).entered();
        if let Err(err) = tracker.process_frame(&back.view()) {
            log::trace!("frame {seq}: {err}");
        }
        let snapshot = TrackerSnapshot::capture(&tracker, seq);
        shared.slots.lock().snapshot = snapshot;
    }
    // the receiver may already be gone if the owner gave up waiting
    let _ = done.send(tracker);
}

impl AsyncTracker {
    /// Move `tracker` onto a new worker thread and start it.
    pub fn new(tracker: PatternTracker, params: AsyncParams) -> Self {
        let snapshot = TrackerSnapshot {
            pattern_keypoints: tracker.pattern_keypoints().to_vec(),
            ..TrackerSnapshot::default()
        };
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots {
                front: ImageBuffer::default(),
                front_updated: false,
                front_seq: 0,
                latest_seq: 0,
                snapshot,
            }),
            running: AtomicBool::new(false),
        });
        let mut this = Self {
            shared,
            params,
            worker: None,
            parked: Some(tracker),
        };
        this.start();
        this
    }

    /// Restart the worker after [`stop`](Self::stop). No-op while running.
    pub fn start(&mut self) {
        let Some(tracker) = self.parked.take() else {
            return;
        };
        let (tx, rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let idle_sleep = self.params.idle_sleep();
        shared.running.store(true, Ordering::SeqCst);
        let handle = thread::spawn(move || worker_loop(shared, tracker, idle_sleep, tx));
        self.worker = Some(Worker { handle, done: rx });
        log::debug!("tracking worker started");
    }

    /// Signal the worker to finish and wait (bounded) for the tracker to come
    /// back. On timeout the worker keeps its handle so a later call can
    /// retry.
    pub fn stop(&mut self) -> Result<(), AsyncError> {
        let Some(worker) = self.worker.as_ref() else {
            return Ok(());
        };
        self.shared.running.store(false, Ordering::SeqCst);
        let timeout = self.params.shutdown_timeout();
        match worker.done.recv_timeout(timeout) {
            Ok(tracker) => {
                if let Some(worker) = self.worker.take() {
                    if worker.handle.join().is_err() {
                        log::warn!("tracking worker panicked after returning the tracker");
                    }
                }
                self.parked = Some(tracker);
                log::debug!("tracking worker stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("tracking worker did not stop within {timeout:?}");
                Err(AsyncError::WorkerTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.handle.join();
                }
                log::warn!("tracking worker terminated without returning the tracker");
                Err(AsyncError::WorkerLost)
            }
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.running.load(Ordering::SeqCst)
    }

    /// Hand a frame to the worker and return its sequence number.
    ///
    /// Only copies pixels; a frame not yet picked up is replaced.
    pub fn submit_frame(&self, frame: &ImageView<'_>) -> u64 {
        let mut slots = self.shared.slots.lock();
        slots.front.copy_from(frame);
        slots.front_updated = true;
        slots.latest_seq += 1;
        slots.front_seq = slots.latest_seq;
        slots.latest_seq
    }

    /// Stop the worker, register the pattern on the tracker and restart.
    ///
    /// The published snapshot is reset to reflect the new pattern. If the
    /// registration itself fails the previous pattern stays active. Fails with
    /// [`AsyncError::WorkerLost`] once the worker has died with the tracker.
    pub fn register_pattern(&mut self, image: &ImageView<'_>) -> Result<(), AsyncError> {
        self.stop()?;
        let Some(tracker) = self.parked.as_mut() else {
            return Err(AsyncError::WorkerLost);
        };
        let result = tracker.register_pattern(image);
        if result.is_ok() {
            let mut slots = self.shared.slots.lock();
            slots.front_updated = false;
            let frame_index = slots.snapshot.frame_index;
            slots.snapshot = TrackerSnapshot {
                frame_index,
                pattern_keypoints: tracker.pattern_keypoints().to_vec(),
                ..TrackerSnapshot::default()
            };
        }
        self.start();
        result.map_err(AsyncError::from)
    }

    /// Clone of the latest published snapshot.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.shared.slots.lock().snapshot.clone()
    }

    pub fn is_found(&self) -> bool {
        self.shared.slots.lock().snapshot.found
    }

    pub fn frame_index(&self) -> u64 {
        self.shared.slots.lock().snapshot.frame_index
    }

    pub fn pose(&self) -> Option<Pose> {
        self.shared.slots.lock().snapshot.pose
    }

    pub fn model_matrix(&self) -> Option<Matrix4<f64>> {
        self.shared.slots.lock().snapshot.model_matrix
    }

    pub fn quad(&self) -> Option<[Point2<f32>; 4]> {
        self.shared.slots.lock().snapshot.quad
    }

    pub fn homography(&self) -> Option<Homography> {
        self.shared.slots.lock().snapshot.homography
    }

    pub fn matches(&self) -> Vec<Match> {
        self.shared.slots.lock().snapshot.matches.clone()
    }

    pub fn query_keypoints(&self) -> Vec<Keypoint> {
        self.shared.slots.lock().snapshot.query_keypoints.clone()
    }

    pub fn pattern_keypoints(&self) -> Vec<Keypoint> {
        self.shared.slots.lock().snapshot.pattern_keypoints.clone()
    }

    pub fn update_time(&self) -> Option<Duration> {
        self.shared.slots.lock().snapshot.update_time
    }

    /// Stop the worker and take the tracker back.
    pub fn into_inner(mut self) -> Result<PatternTracker, AsyncError> {
        self.stop()?;
        self.parked.take().ok_or(AsyncError::WorkerLost)
    }
}

impl Drop for AsyncTracker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!("dropping tracking worker: {err}");
        }
    }
}
