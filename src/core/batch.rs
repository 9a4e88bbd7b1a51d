//! Segment and batch model, and the adaptive batcher.
//!
//! Segments arrive from the document parser in document order and are
//! merged into synthesis-sized batches. The first batches use small word
//! targets so audible output starts quickly; later batches grow to the
//! standard size to cut round trips. Image segments never merge with text.

use crate::config::BatchProfile;

/// Opaque handle to a pre-resolved embedded image. The engine never
/// inspects or substitutes its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef(pub String);

/// Content of one document segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentContent {
    /// One spoken sentence.
    Text(String),
    /// One inline image marker.
    Image(ImageRef),
}

/// One unit of source content with its stable position in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the document-wide sentence order.
    pub index: usize,
    pub content: SegmentContent,
}

impl Segment {
    pub fn text(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            content: SegmentContent::Text(text.into()),
        }
    }

    pub fn image(index: usize, image: impl Into<String>) -> Self {
        Self {
            index,
            content: SegmentContent::Image(ImageRef(image.into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Text,
    Image,
}

/// A contiguous run of segments merged into one synthesis request.
///
/// `segment_indices` are strictly increasing and contiguous in document
/// order. An image batch carries exactly one segment and no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub kind: BatchKind,
    /// Concatenated text sent to the synthesis service. Empty for images.
    pub text: String,
    /// Member sentences in order, used for highlight timing.
    pub sentences: Vec<String>,
    /// Global indices of the member segments.
    pub segment_indices: Vec<usize>,
}

impl Batch {
    fn from_accumulator(sentences: Vec<String>, indices: Vec<usize>) -> Self {
        Self {
            kind: BatchKind::Text,
            text: sentences.join(" "),
            sentences,
            segment_indices: indices,
        }
    }

    fn image(segment: &Segment) -> Self {
        Self {
            kind: BatchKind::Image,
            text: String::new(),
            sentences: Vec::new(),
            segment_indices: vec![segment.index],
        }
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

struct Accumulator {
    sentences: Vec<String>,
    indices: Vec<usize>,
    words: usize,
    chars: usize,
    /// Closed text batches so far; indexes the ramp.
    text_batches: usize,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            sentences: Vec::new(),
            indices: Vec::new(),
            words: 0,
            chars: 0,
            text_batches: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    fn push(&mut self, segment_index: usize, text: &str) {
        self.chars += text.len() + usize::from(!self.sentences.is_empty());
        self.words += word_count(text);
        self.sentences.push(text.to_string());
        self.indices.push(segment_index);
    }

    fn target(&self, profile: &BatchProfile) -> usize {
        profile
            .ramp
            .get(self.text_batches)
            .copied()
            .unwrap_or(profile.standard)
    }

    fn close_into(&mut self, batches: &mut Vec<Batch>) {
        if self.sentences.is_empty() {
            return;
        }
        batches.push(Batch::from_accumulator(
            std::mem::take(&mut self.sentences),
            std::mem::take(&mut self.indices),
        ));
        self.words = 0;
        self.chars = 0;
        self.text_batches += 1;
    }
}

/// Groups `segments[start_index..]` into ordered batches.
///
/// A text batch closes once its accumulated word count reaches the ramp
/// target for its position (then the standard target), or when appending
/// the next sentence would push it past the profile's character ceiling.
/// Image segments close any open accumulation and are emitted alone.
/// A trailing partial accumulation is flushed as a final batch.
pub fn build_batches(segments: &[Segment], start_index: usize, profile: &BatchProfile) -> Vec<Batch> {
    let mut batches = Vec::new();
    // Ramp position counts closed text batches only, so a leading image
    // cannot push the first audio batch onto the steady-state size.
    let mut acc = Accumulator::new();

    for segment in segments.iter().skip_while(|s| s.index < start_index) {
        match &segment.content {
            SegmentContent::Image(_) => {
                acc.close_into(&mut batches);
                batches.push(Batch::image(segment));
            }
            SegmentContent::Text(text) => {
                let incoming = text.len() + usize::from(!acc.is_empty());
                if !acc.is_empty() && acc.chars + incoming > profile.max_chars {
                    acc.close_into(&mut batches);
                }

                acc.push(segment.index, text);

                if acc.words >= acc.target(profile) {
                    acc.close_into(&mut batches);
                }
            }
        }
    }

    acc.close_into(&mut batches);
    batches
}
