//! HTTP implementation of the synthesis boundary.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{SynthResult, SynthesisError, SynthesisRequest, SynthesisService};
use crate::config::Engine;

/// Status the service uses to refuse requests from a stale session.
const STATUS_STALE_SESSION: u16 = 499;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Synthesis of a large batch on constrained hardware can take a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct WireRequest<'a> {
    text: &'a str,
    session_id: &'a str,
    engine: &'a str,
    speaker_wav: &'a str,
    piper_model_path: &'a str,
    language: &'a str,
    speed: f32,
}

#[derive(Serialize)]
struct WireSession<'a> {
    session_id: &'a str,
}

/// Client for the voice server's `/tts` and `/session` endpoints.
pub struct HttpSynthesisService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSynthesisService {
    pub fn new(base_url: impl Into<String>) -> SynthResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn wire_request<'a>(request: &'a SynthesisRequest) -> WireRequest<'a> {
        let voice = request.voice_path.as_deref();
        let (speaker_wav, piper_model_path) = match request.engine {
            Engine::Primary => (voice.unwrap_or("default_speaker.wav"), ""),
            Engine::Fast => ("default_speaker.wav", voice.unwrap_or("")),
        };
        WireRequest {
            text: &request.text,
            session_id: &request.session_id,
            engine: request.engine.id(),
            speaker_wav,
            piper_model_path,
            language: "en",
            speed: request.speed,
        }
    }
}

#[async_trait]
impl SynthesisService for HttpSynthesisService {
    async fn synthesize(&self, request: &SynthesisRequest) -> SynthResult<Bytes> {
        let response = self
            .client
            .post(format!("{}/tts", self.base_url))
            .json(&Self::wire_request(request))
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == STATUS_STALE_SESSION {
            return Err(SynthesisError::StaleSession);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SynthesisError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        debug!(
            "synthesized {} chars into {} bytes",
            request.text.len(),
            bytes.len()
        );
        Ok(bytes)
    }

    async fn set_active_session(&self, session_id: &str) -> SynthResult<()> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&WireSession { session_id })
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(SynthesisError::Service {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
