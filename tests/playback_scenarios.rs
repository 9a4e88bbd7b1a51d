//! End-to-end playback scheduling scenarios.
//!
//! These tests drive a [`Player`] against a scripted synthesis service
//! and a mock audio output whose clock follows real time but freezes
//! while suspended, so pause/resume and stale-session behavior can be
//! observed without a device.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::timeout;

use narro::config::{CacheProfile, PlaybackOptions};
use narro::core::cache::AudioCache;
use narro::core::decode::AudioBuffer;
use narro::core::document::DocumentInput;
use narro::core::player::{
    AudioOutput, AudioOutputFactory, Player, PlayerResult, Status,
};
use narro::core::batch::Segment;
use narro::core::synth::{SynthResult, SynthesisError, SynthesisRequest, SynthesisService};

// ============================================================================
// Mock audio output
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Placement {
    start: f64,
    duration: f64,
}

struct Clock {
    started: Instant,
    paused_at: Option<Instant>,
    paused_total: Duration,
}

struct MockOutput {
    clock: Mutex<Clock>,
    placements: Mutex<Vec<Placement>>,
    closed: Mutex<bool>,
}

impl MockOutput {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            clock: Mutex::new(Clock {
                started: Instant::now(),
                paused_at: None,
                paused_total: Duration::ZERO,
            }),
            placements: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        })
    }

    fn placements(&self) -> Vec<Placement> {
        self.placements.lock().clone()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl AudioOutput for MockOutput {
    fn now(&self) -> f64 {
        let clock = self.clock.lock();
        let end = clock.paused_at.unwrap_or_else(Instant::now);
        (end - clock.started - clock.paused_total).as_secs_f64()
    }

    fn schedule(&self, buffer: AudioBuffer, start: f64) {
        self.placements.lock().push(Placement {
            start,
            duration: buffer.duration(),
        });
    }

    fn suspend(&self) {
        let mut clock = self.clock.lock();
        if clock.paused_at.is_none() {
            clock.paused_at = Some(Instant::now());
        }
    }

    fn resume(&self) {
        let mut clock = self.clock.lock();
        if let Some(paused_at) = clock.paused_at.take() {
            clock.paused_total += paused_at.elapsed();
        }
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }
}

/// Hands out a fresh output per session and keeps every one for
/// inspection.
struct MockOutputFactory {
    opened: Mutex<Vec<Arc<MockOutput>>>,
}

impl MockOutputFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: Mutex::new(Vec::new()),
        })
    }

    fn output(&self, index: usize) -> Arc<MockOutput> {
        Arc::clone(&self.opened.lock()[index])
    }
}

impl AudioOutputFactory for MockOutputFactory {
    fn open(&self) -> PlayerResult<Arc<dyn AudioOutput>> {
        let output = MockOutput::new();
        self.opened.lock().push(Arc::clone(&output));
        Ok(output)
    }
}

// ============================================================================
// Scripted synthesis service
// ============================================================================

struct ScriptedService {
    /// Texts that fail synthesis.
    fail_containing: Option<String>,
    /// Texts that resolve only after this delay.
    delay_containing: Option<(String, Duration)>,
    /// Audio returned for every successful request.
    audio: Bytes,
    /// Every session id the service was told about, in order.
    sessions: Mutex<Vec<String>>,
}

impl ScriptedService {
    fn new(audio_secs: f64) -> Arc<Self> {
        Arc::new(Self {
            fail_containing: None,
            delay_containing: None,
            audio: wav_of(audio_secs),
            sessions: Mutex::new(Vec::new()),
        })
    }

    fn sessions(&self) -> Vec<String> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl SynthesisService for ScriptedService {
    async fn synthesize(&self, request: &SynthesisRequest) -> SynthResult<Bytes> {
        if let Some((marker, delay)) = &self.delay_containing
            && request.text.contains(marker.as_str())
        {
            tokio::time::sleep(*delay).await;
        }
        if let Some(marker) = &self.fail_containing
            && request.text.contains(marker.as_str())
        {
            return Err(SynthesisError::Service {
                status: 500,
                body: "synthesis blew up".to_string(),
            });
        }
        Ok(self.audio.clone())
    }

    async fn set_active_session(&self, session_id: &str) -> SynthResult<()> {
        self.sessions.lock().push(session_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn wav_of(seconds: f64) -> Bytes {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = (seconds * 24000.0) as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            let t = i as f32 / 24000.0;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.3;
            writer.write_sample((sample * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    Bytes::from(cursor.into_inner())
}

/// A sentence long enough to close a standard-profile batch on its own,
/// so each segment becomes one batch.
fn long_sentence(tag: &str) -> String {
    let mut words: Vec<String> = (0..40).map(|i| format!("{tag}{i}")).collect();
    words.push(format!("{tag}."));
    words.join(" ")
}

fn document_of(segments: Vec<Segment>) -> Arc<DocumentInput> {
    let pages = vec![0; segments.len()];
    Arc::new(DocumentInput::new(segments, pages, Vec::new()))
}

fn player_with(
    document: Arc<DocumentInput>,
    service: Arc<ScriptedService>,
    outputs: Arc<MockOutputFactory>,
) -> Player {
    let cache = Arc::new(AudioCache::new(CacheProfile::standard(), None));
    Player::new(document, service, cache, outputs)
}

fn options_no_crossfade() -> PlaybackOptions {
    PlaybackOptions {
        crossfade_ms: 0,
        ..Default::default()
    }
}

async fn wait_for_status(player: &Player, wanted: Status) {
    let mut status = player.status();
    timeout(Duration::from_secs(15), async {
        loop {
            if *status.borrow_and_update() == wanted {
                return;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

async fn wait_for_output(outputs: &Arc<MockOutputFactory>, index: usize) -> Arc<MockOutput> {
    timeout(Duration::from_secs(15), async {
        loop {
            if outputs.opened.lock().len() > index {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for output {index} to open"));
    outputs.output(index)
}

async fn wait_for_placements(output: &Arc<MockOutput>, count: usize) {
    timeout(Duration::from_secs(15), async {
        loop {
            if output.placements().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {count} placements"));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn plays_all_batches_in_order_and_completes() {
    let document = document_of(vec![
        Segment::text(0, long_sentence("a")),
        Segment::text(1, long_sentence("b")),
        Segment::text(2, long_sentence("c")),
    ]);
    let service = ScriptedService::new(0.1);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service.clone(), outputs.clone());

    player.play(options_no_crossfade(), 0);
    wait_for_status(&player, Status::Completed).await;

    let output = outputs.output(0);
    let placements = output.placements();
    assert_eq!(placements.len(), 3);
    for pair in placements.windows(2) {
        assert!(pair[1].start > pair[0].start);
        // Gapless: each buffer starts exactly where the previous ends
        // when no crossfade is configured.
        assert!((pair[1].start - (pair[0].start + pair[0].duration)).abs() < 1e-6);
    }
    assert!(output.is_closed());
    assert!(!player.is_playing());
    // The service learned about exactly one session.
    assert_eq!(service.sessions().len(), 1);
}

#[tokio::test]
async fn image_batch_advances_cursor_by_the_fixed_pause() {
    let document = document_of(vec![
        Segment::text(0, long_sentence("a")),
        Segment::image(1, "figure-1"),
        Segment::text(2, long_sentence("b")),
    ]);
    let service = ScriptedService::new(0.1);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service, outputs.clone());

    let mut highlights = Vec::new();
    let mut position = player.position();

    player.play(options_no_crossfade(), 0);

    let collector = tokio::spawn(async move {
        while position.changed().await.is_ok() {
            if let Some(p) = position.borrow_and_update().clone() {
                highlights.push(p.segment_index);
            }
        }
        highlights
    });

    wait_for_status(&player, Status::Completed).await;

    let placements = outputs.output(0).placements();
    assert_eq!(placements.len(), 2, "images must not produce audio");
    let gap = placements[1].start - (placements[0].start + placements[0].duration);
    assert!(
        (gap - 2.0).abs() < 1e-6,
        "inter-image pause was {gap}, expected 2.0"
    );

    drop(player);
    let highlights = collector.await.unwrap();
    // The image segment got its own highlight between the two sentences.
    assert!(highlights.contains(&1));
    assert!(highlights.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn failed_batch_is_skipped_and_playback_continues() {
    let document = document_of(vec![
        Segment::text(0, long_sentence("a")),
        Segment::text(1, format!("{} badword", long_sentence("b"))),
        Segment::text(2, long_sentence("c")),
    ]);
    let service = Arc::new(ScriptedService {
        fail_containing: Some("badword".to_string()),
        delay_containing: None,
        audio: wav_of(0.1),
        sessions: Mutex::new(Vec::new()),
    });
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service, outputs.clone());

    player.play(options_no_crossfade(), 0);
    wait_for_status(&player, Status::Completed).await;

    // Batches 1 and 3 still played, in that order, with no error status.
    let placements = outputs.output(0).placements();
    assert_eq!(placements.len(), 2);
    assert!(placements[1].start > placements[0].start);
}

#[tokio::test]
async fn stop_discards_work_from_the_old_session() {
    let document = document_of(vec![
        Segment::text(0, long_sentence("a")),
        Segment::text(1, format!("{} slowpoke", long_sentence("b"))),
        Segment::text(2, long_sentence("c")),
    ]);
    let service = Arc::new(ScriptedService {
        fail_containing: None,
        delay_containing: Some(("slowpoke".to_string(), Duration::from_secs(1))),
        audio: wav_of(0.1),
        sessions: Mutex::new(Vec::new()),
    });
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service.clone(), outputs.clone());

    player.play(options_no_crossfade(), 0);
    let first_output = wait_for_output(&outputs, 0).await;
    wait_for_placements(&first_output, 1).await;

    player.stop().await;
    assert_eq!(player.status_label(), "Stopped");
    assert!(first_output.is_closed());
    assert_eq!(player.current_segment_index(), None);

    // A new session starts while the old one's slow batch is still in
    // flight server-side.
    player.play(options_no_crossfade(), 0);
    let second_output = wait_for_output(&outputs, 1).await;
    wait_for_placements(&second_output, 1).await;

    // Give the stale generation time to land, then verify it never
    // reached the old session's timeline.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(first_output.placements().len(), 1);

    // Session markers: first id, cleared on stop, second id.
    let sessions = service.sessions();
    assert_eq!(sessions.len(), 3);
    assert_eq!(sessions[1], "");
    assert_ne!(sessions[0], sessions[2]);

    player.stop().await;
}

#[tokio::test]
async fn pause_freezes_the_output_clock_and_resume_continues() {
    let document = document_of(vec![
        Segment::text(0, long_sentence("a")),
        Segment::text(1, long_sentence("b")),
        Segment::text(2, long_sentence("c")),
    ]);
    let service = ScriptedService::new(0.3);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service, outputs.clone());

    player.play(options_no_crossfade(), 0);
    let output = wait_for_output(&outputs, 0).await;
    wait_for_placements(&output, 1).await;

    player.pause();
    assert!(player.is_paused());
    assert!(player.is_playing());
    assert_eq!(player.status_label(), "Paused");

    let frozen = output.now();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(
        (output.now() - frozen).abs() < 1e-9,
        "clock advanced while paused"
    );

    // play() while paused resumes rather than starting a new session.
    player.play(options_no_crossfade(), 0);
    assert!(!player.is_paused());
    wait_for_status(&player, Status::Completed).await;
    assert_eq!(output.placements().len(), 3);
    assert_eq!(outputs.opened.lock().len(), 1);
}

#[tokio::test]
async fn play_while_playing_is_a_no_op() {
    let document = document_of(vec![Segment::text(0, long_sentence("a"))]);
    let service = ScriptedService::new(0.2);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service.clone(), outputs.clone());

    player.play(options_no_crossfade(), 0);
    player.play(options_no_crossfade(), 0);
    wait_for_status(&player, Status::Completed).await;

    assert_eq!(outputs.opened.lock().len(), 1);
    assert_eq!(service.sessions().len(), 1);
}

#[tokio::test]
async fn empty_document_completes_immediately() {
    let document = document_of(Vec::new());
    let service = ScriptedService::new(0.1);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service, outputs);

    player.play(options_no_crossfade(), 0);
    wait_for_status(&player, Status::Completed).await;
}

#[tokio::test]
async fn highlights_fire_in_segment_order_without_repeats() {
    // One batch holding three sentences: intra-batch timing comes from
    // the weight estimator, so highlights must still fire in order.
    let document = document_of(vec![
        Segment::text(0, "short one."),
        Segment::text(1, "the second sentence is a bit longer than that."),
        Segment::text(2, "and a third one to round the batch out nicely."),
    ]);
    let service = ScriptedService::new(0.8);
    let outputs = MockOutputFactory::new();
    let player = player_with(document, service, outputs);

    let mut position = player.position();
    player.play(options_no_crossfade(), 0);

    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while position.changed().await.is_ok() {
            if let Some(p) = position.borrow_and_update().clone() {
                seen.push(p.segment_index);
            }
        }
        seen
    });

    wait_for_status(&player, Status::Completed).await;
    drop(player);
    let seen = collector.await.unwrap();

    assert!(!seen.is_empty());
    assert!(
        seen.windows(2).all(|w| w[0] < w[1]),
        "highlights out of order or repeated: {seen:?}"
    );
}
