//! # narro
//!
//! Continuous text-to-speech playback for long documents.
//!
//! Given a document already split into ordered segments (sentences and
//! inline image markers), `narro` produces uninterrupted spoken audio:
//! it merges segments into adaptively sized synthesis batches, resolves
//! them through a two-tier audio cache and an external voice service,
//! keeps a lookahead window of requests in flight, and places each
//! decoded buffer on the output timeline with crossfaded seams — while
//! emitting timed events that drive text highlighting in a UI.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use narro::config::{CacheProfile, PlaybackOptions};
//! use narro::core::cache::{AudioCache, FsStore};
//! use narro::core::document::DocumentInput;
//! use narro::core::player::Player;
//! use narro::core::synth::HttpSynthesisService;
//! # use narro::core::player::AudioOutputFactory;
//!
//! # async fn example(document: DocumentInput, outputs: Arc<dyn AudioOutputFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let service = Arc::new(HttpSynthesisService::new("http://127.0.0.1:8000")?);
//! let store = Arc::new(FsStore::new("/tmp/narro-cache".into()).await?);
//! let cache = Arc::new(AudioCache::new(CacheProfile::standard(), Some(store)));
//!
//! let player = Player::new(Arc::new(document), service, cache, outputs);
//! player.play(PlaybackOptions::default(), 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;

pub use config::{Engine, PlaybackOptions};
pub use core::*;
