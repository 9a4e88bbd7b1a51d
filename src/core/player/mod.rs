//! Playback control and scheduling.
//!
//! [`Player`] drives one playback session at a time: it batches the
//! document from the requested page, keeps generation requests in flight
//! ahead of the timeline, and places each decoded buffer in strict batch
//! order with crossfaded seams, while the highlight poller follows the
//! output clock. `play`/`pause`/`stop` are the only mutation entry
//! points; everything else is observable state.

pub mod errors;
pub mod highlight;
pub mod prefetch;
pub mod session;
pub mod timeline;

#[cfg(feature = "device")]
pub mod device;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{IMAGE_PAUSE_SECS, PlaybackOptions};
use crate::core::batch::build_batches;
use crate::core::cache::AudioCache;
use crate::core::document::DocumentInput;
use crate::core::pipeline::{AudioResult, GenerationPipeline};
use crate::core::synth::SynthesisService;

pub use errors::{PlayerError, PlayerResult};
pub use highlight::ReadingPosition;
use highlight::{HighlightQueue, HighlightTrigger};
pub use prefetch::PrefetchController;
pub use session::{PlaybackSession, Status};
pub use timeline::{AudioOutput, AudioOutputFactory, Timeline};

/// Once the cursor is this far ahead of the clock, scheduling pauses.
const AHEAD_THRESHOLD: f64 = 4.0;

/// Sleep slice while ahead of real time; stop and pause are re-checked
/// every tick.
const THROTTLE_TICK: Duration = Duration::from_millis(200);

/// Sleep slice while letting the scheduled tail play out.
const DRAIN_TICK: Duration = Duration::from_millis(100);

struct Shared {
    session: Mutex<Option<Arc<PlaybackSession>>>,
    active_output: Mutex<Option<Arc<dyn AudioOutput>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    current_batch: AtomicUsize,
    status: watch::Sender<Status>,
    position: watch::Sender<Option<ReadingPosition>>,
}

/// Continuous text-to-speech playback engine for one document.
pub struct Player {
    document: Arc<DocumentInput>,
    service: Arc<dyn SynthesisService>,
    cache: Arc<AudioCache>,
    outputs: Arc<dyn AudioOutputFactory>,
    shared: Arc<Shared>,
}

impl Player {
    pub fn new(
        document: Arc<DocumentInput>,
        service: Arc<dyn SynthesisService>,
        cache: Arc<AudioCache>,
        outputs: Arc<dyn AudioOutputFactory>,
    ) -> Self {
        let (status, _) = watch::channel(Status::Idle);
        let (position, _) = watch::channel(None);
        Self {
            document,
            service,
            cache,
            outputs,
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                active_output: Mutex::new(None),
                driver: Mutex::new(None),
                current_batch: AtomicUsize::new(0),
                status,
                position,
            }),
        }
    }

    /// Starts playback from `page_index`, or resumes when paused.
    /// A no-op while already playing.
    pub fn play(&self, options: PlaybackOptions, page_index: usize) {
        {
            let guard = self.shared.session.lock();
            if let Some(session) = guard.as_ref()
                && !session.is_stopped()
                && self.shared.status.borrow().is_active()
            {
                if session.is_paused() {
                    if let Some(output) = self.shared.active_output.lock().as_ref() {
                        output.resume();
                    }
                    session.set_paused(false);
                    let _ = self.shared.status.send(Status::Playing {
                        batch: self.shared.current_batch.load(Ordering::Acquire),
                    });
                    info!("resumed playback");
                }
                return;
            }
        }

        let session = Arc::new(PlaybackSession::new());
        info!("starting playback session {}", session.id());
        *self.shared.session.lock() = Some(Arc::clone(&session));
        self.shared.current_batch.store(0, Ordering::Release);
        let _ = self.shared.status.send(Status::Buffering);
        let _ = self.shared.position.send(None);

        let driver = Driver {
            document: Arc::clone(&self.document),
            service: Arc::clone(&self.service),
            cache: Arc::clone(&self.cache),
            outputs: Arc::clone(&self.outputs),
            shared: Arc::clone(&self.shared),
            session,
            options,
            page_index,
        };
        *self.shared.driver.lock() = Some(tokio::spawn(driver.run()));
    }

    /// Suspends the output clock. Generation already in flight continues.
    pub fn pause(&self) {
        let guard = self.shared.session.lock();
        let Some(session) = guard.as_ref() else {
            return;
        };
        if session.is_stopped() || session.is_paused() || !self.shared.status.borrow().is_active()
        {
            return;
        }
        session.set_paused(true);
        if let Some(output) = self.shared.active_output.lock().as_ref() {
            output.suspend();
        }
        let _ = self.shared.status.send(Status::Paused);
        info!("paused playback");
    }

    /// Stops playback, invalidating the session: pending highlight events
    /// are discarded, the output is released, and any generation results
    /// that arrive later are dropped instead of being scheduled.
    pub async fn stop(&self) {
        let session = self.shared.session.lock().take();
        let Some(session) = session else {
            return;
        };
        info!("stopping playback session {}", session.id());
        session.stop();
        session.set_paused(false);

        if let Some(driver) = self.shared.driver.lock().take() {
            driver.abort();
        }
        if let Some(output) = self.shared.active_output.lock().take() {
            output.close();
        }
        let _ = self.shared.status.send(Status::Stopped);
        let _ = self.shared.position.send(None);

        // Clearing the service-side marker makes it refuse anything the
        // stopped session still has in flight.
        if let Err(e) = self.service.set_active_session("").await {
            warn!("failed to clear service session marker: {e}");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.status.borrow().is_active()
    }

    pub fn is_paused(&self) -> bool {
        matches!(*self.shared.status.borrow(), Status::Paused)
    }

    /// Global index of the segment currently highlighted, if any.
    pub fn current_segment_index(&self) -> Option<usize> {
        self.shared.position.borrow().as_ref().map(|p| p.segment_index)
    }

    pub fn status_label(&self) -> String {
        self.shared.status.borrow().to_string()
    }

    /// Watch observable of the playback status.
    pub fn status(&self) -> watch::Receiver<Status> {
        self.shared.status.subscribe()
    }

    /// Watch observable of the reading position under the highlight.
    pub fn position(&self) -> watch::Receiver<Option<ReadingPosition>> {
        self.shared.position.subscribe()
    }
}

/// One session's scheduling task.
struct Driver {
    document: Arc<DocumentInput>,
    service: Arc<dyn SynthesisService>,
    cache: Arc<AudioCache>,
    outputs: Arc<dyn AudioOutputFactory>,
    shared: Arc<Shared>,
    session: Arc<PlaybackSession>,
    options: PlaybackOptions,
    page_index: usize,
}

impl Driver {
    async fn run(self) {
        let start_index = self.document.start_index_for_page(self.page_index);
        let batches = Arc::new(build_batches(
            &self.document.segments,
            start_index,
            &self.options.batch_profile(),
        ));
        if batches.is_empty() {
            let _ = self.shared.status.send(Status::Completed);
            return;
        }
        info!(
            "scheduling {} batches from segment {}",
            batches.len(),
            start_index
        );

        if let Err(e) = self.service.set_active_session(self.session.id()).await {
            warn!("failed to announce session to synthesis service: {e}");
        }

        let output = match self.outputs.open() {
            Ok(output) => output,
            Err(e) => {
                error!("could not open audio output: {e}");
                let _ = self.shared.status.send(Status::Error(e.to_string()));
                return;
            }
        };
        *self.shared.active_output.lock() = Some(Arc::clone(&output));

        let queue = Arc::new(Mutex::new(HighlightQueue::new()));
        let poller = highlight::spawn_poller(
            Arc::clone(&queue),
            Arc::clone(&output),
            Arc::clone(&self.document),
            self.shared.position.clone(),
            self.session.stop_token(),
        );

        let mut pipeline = GenerationPipeline::new(
            batches,
            Arc::clone(&self.service),
            Arc::clone(&self.cache),
            &self.options,
            self.session.id().to_string(),
            self.session.stop_token(),
        );
        let mut prefetch = PrefetchController::new(self.options.buffer_profile());
        prefetch.prime(&mut pipeline);

        let mut timeline = Timeline::new(self.options.crossfade_secs());
        timeline.reset(output.now());

        let completed = self
            .schedule_all(&mut pipeline, &mut prefetch, &mut timeline, &output, &queue)
            .await;

        if completed {
            // Let the scheduled tail play out so its highlights land.
            self.drain(&output, &timeline).await;
        }
        self.session.stop();
        let _ = poller.await;

        let guard = self.shared.session.lock();
        let still_current = guard
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.session));
        if completed && still_current {
            if let Some(output) = self.shared.active_output.lock().take() {
                output.close();
            }
            let _ = self.shared.status.send(Status::Completed);
            let _ = self.shared.position.send(None);
            info!("playback completed");
        } else {
            // A stop replaced the session; release this session's output
            // without touching a successor's.
            output.close();
            let mut active = self.shared.active_output.lock();
            if active.as_ref().is_some_and(|o| Arc::ptr_eq(o, &output)) {
                *active = None;
            }
        }
    }

    /// Schedules every batch in document order. Returns `false` when the
    /// session was stopped along the way.
    async fn schedule_all(
        &self,
        pipeline: &mut GenerationPipeline,
        prefetch: &mut PrefetchController,
        timeline: &mut Timeline,
        output: &Arc<dyn AudioOutput>,
        queue: &Arc<Mutex<HighlightQueue>>,
    ) -> bool {
        let stop = self.session.stop_token();
        for index in 0..pipeline.len() {
            if self.session.is_stopped() {
                return false;
            }
            if !self.session.wait_while_paused().await {
                return false;
            }

            pipeline.ensure_issued(index);
            let result = tokio::select! {
                _ = stop.cancelled() => return false,
                result = pipeline.resolve(index) => result,
            };
            if self.session.is_stopped() {
                return false;
            }

            self.shared.current_batch.store(index, Ordering::Release);
            if !self.session.is_paused() {
                let _ = self.shared.status.send(Status::Playing { batch: index });
            }
            prefetch.on_batch_started(index, pipeline);

            match result {
                AudioResult::Skipped => {
                    // Images produce no audio: one highlight at the
                    // cursor, then a fixed silent pause.
                    let segment_index = pipeline.batch(index).segment_indices[0];
                    queue.lock().push(HighlightTrigger {
                        at: timeline.cursor(),
                        segment_index,
                    });
                    timeline.advance_pause(output.now(), IMAGE_PAUSE_SECS);
                }
                AudioResult::Audio(_) => {
                    let Some(buffer) = pipeline.decoded(index) else {
                        warn!("skipping undecodable batch {index}");
                        continue;
                    };
                    if buffer.samples.is_empty() {
                        warn!("skipping empty batch {index}");
                        continue;
                    }
                    let duration = buffer.duration();
                    let placement = timeline.place(output.now(), duration);
                    let mut faded = (*buffer).clone();
                    faded.apply_fades(placement.fade, placement.fade);
                    output.schedule(faded, placement.start);
                    queue.lock().extend(highlight::batch_triggers(
                        pipeline.batch(index),
                        placement.start,
                        duration,
                    ));
                }
                AudioResult::Failed => {
                    warn!("skipping batch {index} after generation failure");
                    continue;
                }
            }

            if !self.throttle(output, timeline).await {
                return false;
            }
        }
        true
    }

    /// Sleeps in short slices while the cursor is far ahead of real-time
    /// playback, re-checking stop and pause every slice.
    async fn throttle(&self, output: &Arc<dyn AudioOutput>, timeline: &Timeline) -> bool {
        let stop = self.session.stop_token();
        loop {
            if self.session.is_stopped() {
                return false;
            }
            if !self.session.wait_while_paused().await {
                return false;
            }
            if timeline.cursor() - output.now() <= AHEAD_THRESHOLD {
                return true;
            }
            tokio::select! {
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep(THROTTLE_TICK) => {}
            }
        }
    }

    async fn drain(&self, output: &Arc<dyn AudioOutput>, timeline: &Timeline) {
        let stop = self.session.stop_token();
        loop {
            if self.session.is_stopped() {
                return;
            }
            if !self.session.wait_while_paused().await {
                return;
            }
            if output.now() >= timeline.cursor() {
                return;
            }
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(DRAIN_TICK) => {}
            }
        }
    }
}
