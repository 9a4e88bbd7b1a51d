//! Generation pipeline: batch → cache/synthesis → decoded buffer.
//!
//! Generation requests run as spawned tasks so several batches can be in
//! flight at once; each batch's outcome comes back through its own
//! channel and is consumed by the scheduler in strict batch order. A
//! failed batch resolves to [`AudioResult::Failed`] rather than erroring,
//! so playback can continue past it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PlaybackOptions;
use crate::core::batch::{Batch, BatchKind};
use crate::core::cache::{AudioCache, Fingerprint};
use crate::core::decode::{self, AudioBuffer};
use crate::core::synth::{SynthesisRequest, SynthesisService};

/// Outcome of resolving one batch.
#[derive(Debug, Clone)]
pub enum AudioResult {
    /// Encoded audio, ready to decode.
    Audio(Bytes),
    /// Image batch; nothing was synthesized.
    Skipped,
    /// Synthesis failed; the scheduler skips this batch.
    Failed,
}

struct Slot {
    pending: Option<oneshot::Receiver<AudioResult>>,
    resolved: Option<AudioResult>,
    /// Memoized decode outcome; `Some(None)` records a decode failure.
    decoded: Option<Option<Arc<AudioBuffer>>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            pending: None,
            resolved: None,
            decoded: None,
        }
    }

    fn issued(&self) -> bool {
        self.pending.is_some() || self.resolved.is_some()
    }
}

/// Resolves batches to audio, read-through and write-through the cache.
pub struct GenerationPipeline {
    batches: Arc<Vec<Batch>>,
    slots: Vec<Slot>,
    service: Arc<dyn SynthesisService>,
    cache: Arc<AudioCache>,
    request_base: RequestBase,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct RequestBase {
    engine: crate::config::Engine,
    voice_path: Option<String>,
    speed: f32,
    session_id: String,
}

impl RequestBase {
    fn fingerprint(&self, text: &str) -> Fingerprint {
        Fingerprint::new(
            self.engine.id(),
            self.voice_path.as_deref(),
            self.speed,
            text,
        )
    }

    fn request(&self, text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            speed: self.speed,
            engine: self.engine,
            voice_path: self.voice_path.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

impl GenerationPipeline {
    pub fn new(
        batches: Arc<Vec<Batch>>,
        service: Arc<dyn SynthesisService>,
        cache: Arc<AudioCache>,
        options: &PlaybackOptions,
        session_id: String,
        cancel: CancellationToken,
    ) -> Self {
        let slots = (0..batches.len()).map(|_| Slot::empty()).collect();
        Self {
            batches,
            slots,
            service,
            cache,
            request_base: RequestBase {
                engine: options.engine,
                voice_path: options.voice_path.clone(),
                speed: options.effective_speed(),
                session_id,
            },
            cancel,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batch(&self, index: usize) -> &Batch {
        &self.batches[index]
    }

    /// Whether generation for the batch has been issued (or resolved).
    pub fn is_issued(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Slot::issued)
    }

    /// Issues generation for a batch if it has not been issued yet.
    /// Indices past the end are ignored, so prefetch can run off the tail.
    pub fn ensure_issued(&mut self, index: usize) {
        let Some(batch) = self.batches.get(index) else {
            return;
        };
        if self.slots[index].issued() {
            return;
        }

        if batch.kind == BatchKind::Image {
            self.slots[index].resolved = Some(AudioResult::Skipped);
            return;
        }

        let (tx, rx) = oneshot::channel();
        self.slots[index].pending = Some(rx);

        let fingerprint = self.request_base.fingerprint(&batch.text);
        let request = self.request_base.request(&batch.text);
        let service = Arc::clone(&self.service);
        let cache = Arc::clone(&self.cache);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = resolve_text(&*service, &cache, &fingerprint, &request, &cancel).await;
            let _ = tx.send(result);
        });
    }

    /// Awaits the batch's outcome, issuing generation first on a cold
    /// start. Repeated calls return the memoized result.
    pub async fn resolve(&mut self, index: usize) -> AudioResult {
        if let Some(result) = &self.slots[index].resolved {
            return result.clone();
        }

        self.ensure_issued(index);
        let result = match self.slots[index].pending.take() {
            Some(rx) => rx.await.unwrap_or(AudioResult::Failed),
            None => AudioResult::Failed,
        };
        self.slots[index].resolved = Some(result.clone());
        result
    }

    /// Decodes the batch's resolved audio, memoized so repeated access
    /// never re-decodes. Returns `None` for skipped, failed, or
    /// undecodable batches.
    pub fn decoded(&mut self, index: usize) -> Option<Arc<AudioBuffer>> {
        if let Some(memo) = &self.slots[index].decoded {
            return memo.clone();
        }

        let outcome = match &self.slots[index].resolved {
            Some(AudioResult::Audio(bytes)) => match decode::decode_wav(bytes) {
                Ok(buffer) => Some(Arc::new(buffer)),
                Err(e) => {
                    warn!("failed to decode batch {index}: {e}");
                    None
                }
            },
            _ => None,
        };

        self.slots[index].decoded = Some(outcome.clone());
        outcome
    }
}

async fn resolve_text(
    service: &dyn SynthesisService,
    cache: &AudioCache,
    fingerprint: &Fingerprint,
    request: &SynthesisRequest,
    cancel: &CancellationToken,
) -> AudioResult {
    if cancel.is_cancelled() {
        return AudioResult::Failed;
    }

    if let Some(bytes) = cache.get(fingerprint).await {
        debug!("cache hit for batch text ({} bytes)", bytes.len());
        return AudioResult::Audio(bytes);
    }

    if cancel.is_cancelled() {
        return AudioResult::Failed;
    }

    match service.synthesize(request).await {
        Ok(bytes) => {
            cache.put(fingerprint, bytes.clone()).await;
            AudioResult::Audio(bytes)
        }
        Err(e) => {
            warn!("synthesis failed: {e}");
            AudioResult::Failed
        }
    }
}
