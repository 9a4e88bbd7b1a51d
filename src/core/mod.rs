pub mod batch;
pub mod cache;
pub mod decode;
pub mod document;
pub mod pipeline;
pub mod player;
pub mod synth;

// Re-export commonly used types for convenience
pub use batch::{Batch, BatchKind, ImageRef, Segment, SegmentContent, build_batches};
pub use cache::{AudioCache, Fingerprint, FsStore, PersistentStore, StoreError, StoreResult};
pub use decode::{AudioBuffer, DecodeError, DecodeResult, decode_wav};
pub use document::{DocumentInput, TocEntry};
pub use pipeline::{AudioResult, GenerationPipeline};
pub use player::{
    AudioOutput, AudioOutputFactory, Player, PlayerError, PlayerResult, ReadingPosition, Status,
};
pub use synth::{
    HttpSynthesisService, SynthResult, SynthesisError, SynthesisRequest, SynthesisService,
};
