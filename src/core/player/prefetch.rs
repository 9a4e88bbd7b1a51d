//! Prefetch control for the generation pipeline.
//!
//! Keeps a bounded number of batches in flight ahead of the one being
//! scheduled. The window starts small so the first sound arrives fast,
//! then widens once playback is underway to absorb synthesis-latency
//! spikes without stalling the timeline.

use crate::config::BufferProfile;
use crate::core::pipeline::GenerationPipeline;

pub struct PrefetchController {
    initial: usize,
    steady: usize,
    widened: bool,
}

impl PrefetchController {
    pub fn new(profile: BufferProfile) -> Self {
        Self {
            initial: profile.initial,
            steady: profile.steady,
            widened: false,
        }
    }

    /// Issues generation for the initial window, before playback starts.
    pub fn prime(&self, pipeline: &mut GenerationPipeline) {
        for index in 0..self.initial.min(pipeline.len()) {
            pipeline.ensure_issued(index);
        }
    }

    /// Called as batch `index` begins playing: widens the window to the
    /// steady size on the first call, then keeps it topped up.
    pub fn on_batch_started(&mut self, index: usize, pipeline: &mut GenerationPipeline) {
        if self.widened {
            pipeline.ensure_issued(index + self.steady);
            return;
        }
        self.widened = true;
        for ahead in 1..=self.steady {
            pipeline.ensure_issued(index + ahead);
        }
    }
}
