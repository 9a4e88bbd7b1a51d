//! Synthesis boundary.
//!
//! The voice-generation service is external; this module defines the
//! request/response contract and the trait the pipeline drives. The
//! service is also told which playback session is active so it can refuse
//! work that belongs to a stopped one.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::Engine;

pub use http::HttpSynthesisService;

/// One synthesis request for a text batch.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Voice speed multiplier.
    pub speed: f32,
    pub engine: Engine,
    /// Speaker reference (primary engine) or voice model path (fast).
    pub voice_path: Option<String>,
    /// Session the request belongs to; the service drops requests from
    /// sessions that are no longer active.
    pub session_id: String,
}

/// Errors from the synthesis boundary.
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("network error: {0}")]
    Network(String),

    #[error("service error ({status}): {body}")]
    Service { status: u16, body: String },

    /// The service refused the request because its active session moved on.
    #[error("request belonged to a stale session")]
    StaleSession,

    #[error("service returned no audio")]
    EmptyAudio,
}

pub type SynthResult<T> = Result<T, SynthesisError>;

/// Boundary to the external voice-generation service.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Synthesizes one batch of text into encoded audio bytes.
    async fn synthesize(&self, request: &SynthesisRequest) -> SynthResult<Bytes>;

    /// Moves the service-side active-session marker. An empty id clears
    /// it, making the service refuse all in-flight work.
    async fn set_active_session(&self, session_id: &str) -> SynthResult<()>;
}
