//! Highlight synchronization.
//!
//! A synthesized batch only has one known duration, so per-sentence
//! timing inside it is estimated from text weight: word count plus a
//! bonus for punctuation, after reserving a fixed base slice per
//! sentence. Triggers go into a time-sorted queue; a timer-driven poller
//! samples the output clock and fires whatever has come due, strictly in
//! time order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::batch::Batch;
use crate::core::document::DocumentInput;
use crate::core::player::timeline::AudioOutput;

/// Fixed offset added to every trigger time.
pub const HIGHLIGHT_LEAD_IN: f64 = 0.05;

/// Seconds reserved per sentence before weight distribution.
pub const SEGMENT_BASE_SECS: f64 = 0.12;

/// Weight bonus per sentence-terminal punctuation mark.
const TERMINAL_PUNCT_BONUS: f64 = 2.0;

/// Weight bonus per internal punctuation mark.
const INTERNAL_PUNCT_BONUS: f64 = 0.5;

/// Output-clock sampling interval of the poller.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A scheduled text-highlight event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighlightTrigger {
    /// Time on the output clock.
    pub at: f64,
    /// Global index of the segment to highlight.
    pub segment_index: usize,
}

/// What the UI highlights right now.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingPosition {
    pub segment_index: usize,
    pub page: Option<usize>,
    /// Chapter label when the page is a chapter start.
    pub chapter: Option<String>,
}

fn sentence_weight(sentence: &str) -> f64 {
    let words = sentence.split_whitespace().count().max(1) as f64;
    let terminal = sentence.chars().filter(|c| matches!(c, '.' | '!' | '?')).count() as f64;
    let internal = sentence.chars().filter(|c| matches!(c, ',' | ';' | ':')).count() as f64;
    words + terminal * TERMINAL_PUNCT_BONUS + internal * INTERNAL_PUNCT_BONUS
}

/// Distributes a batch's decoded duration across its sentences and emits
/// one trigger per member segment, in order.
pub fn batch_triggers(batch: &Batch, start: f64, duration: f64) -> Vec<HighlightTrigger> {
    let count = batch.segment_indices.len();
    if count == 0 {
        return Vec::new();
    }

    let weights: Vec<f64> = batch.sentences.iter().map(|s| sentence_weight(s)).collect();
    let total_weight: f64 = weights.iter().sum();
    let remainder = (duration - SEGMENT_BASE_SECS * count as f64).max(0.0);

    let mut triggers = Vec::with_capacity(count);
    let mut elapsed = 0.0;
    for (i, &segment_index) in batch.segment_indices.iter().enumerate() {
        triggers.push(HighlightTrigger {
            at: start + elapsed + HIGHLIGHT_LEAD_IN,
            segment_index,
        });
        let share = weights.get(i).copied().unwrap_or(1.0) / total_weight;
        elapsed += SEGMENT_BASE_SECS + remainder * share;
    }
    triggers
}

#[derive(Debug, PartialEq)]
struct QueuedTrigger(HighlightTrigger);

impl Eq for QueuedTrigger {}

impl Ord for QueuedTrigger {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .at
            .total_cmp(&other.0.at)
            .then(self.0.segment_index.cmp(&other.0.segment_index))
    }
}

impl PartialOrd for QueuedTrigger {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Globally time-sorted trigger queue. Firing consumes everything due,
/// so a passed trigger can never fire again or out of order.
#[derive(Default)]
pub struct HighlightQueue {
    heap: BinaryHeap<Reverse<QueuedTrigger>>,
}

impl HighlightQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, trigger: HighlightTrigger) {
        self.heap.push(Reverse(QueuedTrigger(trigger)));
    }

    pub fn extend(&mut self, triggers: impl IntoIterator<Item = HighlightTrigger>) {
        for trigger in triggers {
            self.push(trigger);
        }
    }

    /// Dequeues every trigger due at `now` and returns the latest one.
    pub fn pop_due(&mut self, now: f64) -> Option<HighlightTrigger> {
        let mut fired = None;
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.0.at > now {
                break;
            }
            fired = self.heap.pop().map(|Reverse(t)| t.0);
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Spawns the poller that drives the reading-position observable until
/// the session ends.
pub fn spawn_poller(
    queue: Arc<Mutex<HighlightQueue>>,
    output: Arc<dyn AudioOutput>,
    document: Arc<DocumentInput>,
    position: watch::Sender<Option<ReadingPosition>>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tick.tick() => {
                    let now = output.now();
                    let Some(trigger) = queue.lock().pop_due(now) else {
                        continue;
                    };
                    let page = document.page_of(trigger.segment_index);
                    let chapter = page
                        .and_then(|p| document.chapter_label(p))
                        .map(str::to_string);
                    debug!("highlighting segment {}", trigger.segment_index);
                    let _ = position.send(Some(ReadingPosition {
                        segment_index: trigger.segment_index,
                        page,
                        chapter,
                    }));
                }
            }
        }
    })
}
