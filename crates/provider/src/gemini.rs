//! Gemini text-to-speech synthesizer
//!
//! Calls `generateContent` with the AUDIO response modality and a prebuilt
//! voice. The service answers with base64-encoded audio in the first
//! candidate part (raw 16-bit PCM for the preview TTS models).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use common::Secret;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{Result, SpeechRequest, SynthError, Synthesizer};

/// Default public endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Upstream bodies are truncated to this many characters in errors.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// reqwest-backed synthesizer for the Gemini API.
pub struct GeminiSynthesizer {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiSynthesizer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent",
            self.base_url.trim_end_matches('/')
        )
    }

    #[instrument(skip_all, fields(model = %request.model, voice = %request.voice, key = %key))]
    async fn call(&self, key: &Secret<String>, request: &SpeechRequest) -> Result<Bytes> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": request.text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": request.voice }
                    }
                }
            }
        });

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", key.expose().as_str())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SynthError::Http(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(SynthError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let audio = extract_audio(&text)?;
        debug!(bytes = audio.len(), "received audio payload");
        Ok(audio)
    }
}

impl Synthesizer for GeminiSynthesizer {
    fn id(&self) -> &str {
        "gemini"
    }

    fn synthesize<'a>(
        &'a self,
        key: &'a Secret<String>,
        request: &'a SpeechRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>> {
        Box::pin(self.call(key, request))
    }
}

/// Pull the base64 audio out of a `generateContent` response body.
fn extract_audio(body: &str) -> Result<Bytes> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| SynthError::Decode(format!("parsing response JSON: {e}")))?;

    let data = parsed
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .map(|d| d.data)
        .ok_or_else(|| SynthError::Decode("response contains no inline audio data".into()))?;

    let audio = STANDARD
        .decode(data.as_bytes())
        .map_err(|e| SynthError::Decode(format!("invalid base64 audio: {e}")))?;

    if audio.is_empty() {
        return Err(SynthError::Decode("inline audio data is empty".into()));
    }
    Ok(Bytes::from(audio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorClassification;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tokio::net::TcpListener;

    fn request() -> SpeechRequest {
        SpeechRequest {
            model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Puck".into(),
            text: "Say excitedly: hello".into(),
        }
    }

    /// Start a mock Gemini endpoint. Requests without the expected key get
    /// 400, requests for the "quota" key get 429, everything else gets PCM.
    async fn start_mock_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new().fallback(|request: Request<Body>| async move {
                let key = request
                    .headers()
                    .get("x-goog-api-key")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let path = request.uri().path().to_string();
                let body_bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
                    .await
                    .unwrap();
                let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

                if path != "/v1beta/models/gemini-2.5-flash-preview-tts:generateContent" {
                    return (StatusCode::NOT_FOUND, "unknown model".to_string());
                }
                match key.as_str() {
                    "quota-key-0000" => (
                        StatusCode::TOO_MANY_REQUESTS,
                        r#"{"error":{"status":"RESOURCE_EXHAUSTED","quotaId":"GenerateRequestsPerDayPerProjectPerModel"}}"#
                            .to_string(),
                    ),
                    "garbage-key-000" => (StatusCode::OK, r#"{"candidates":[]}"#.to_string()),
                    "valid-key-12345" => {
                        let voice = &body["generationConfig"]["speechConfig"]["voiceConfig"]
                            ["prebuiltVoiceConfig"]["voiceName"];
                        let text = &body["contents"][0]["parts"][0]["text"];
                        assert_eq!(voice, "Puck");
                        assert_eq!(text, "Say excitedly: hello");
                        let audio = STANDARD.encode([1u8, 0, 2, 0, 3, 0]);
                        (
                            StatusCode::OK,
                            serde_json::json!({
                                "candidates": [{
                                    "content": {
                                        "parts": [{
                                            "inlineData": {
                                                "mimeType": "audio/L16;codec=pcm;rate=24000",
                                                "data": audio
                                            }
                                        }]
                                    }
                                }]
                            })
                            .to_string(),
                        )
                    }
                    _ => (StatusCode::BAD_REQUEST, "API key not valid".to_string()),
                }
            });
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    fn synth(url: &str) -> GeminiSynthesizer {
        GeminiSynthesizer::new(reqwest::Client::new(), url, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn decodes_inline_audio() {
        let (url, _server) = start_mock_server().await;
        let audio = synth(&url)
            .synthesize(&Secret::from("valid-key-12345"), &request())
            .await
            .unwrap();
        assert_eq!(&audio[..], &[1u8, 0, 2, 0, 3, 0]);
    }

    #[tokio::test]
    async fn quota_response_classified_as_quota_exceeded() {
        let (url, _server) = start_mock_server().await;
        let err = synth(&url)
            .synthesize(&Secret::from("quota-key-0000"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthError::Status { status: 429, .. }));
        assert_eq!(err.classification(), ErrorClassification::QuotaExceeded);
    }

    #[tokio::test]
    async fn invalid_key_is_permanent() {
        let (url, _server) = start_mock_server().await;
        let err = synth(&url)
            .synthesize(&Secret::from("wrong-key-99999"), &request())
            .await
            .unwrap_err();
        assert_eq!(err.classification(), ErrorClassification::Permanent);
    }

    #[tokio::test]
    async fn missing_audio_is_decode_error() {
        let (url, _server) = start_mock_server().await;
        let err = synth(&url)
            .synthesize(&Secret::from("garbage-key-000"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthError::Decode(_)), "got: {err}");
        assert_eq!(err.classification(), ErrorClassification::Transient);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_transient_http_error() {
        let err = synth("http://127.0.0.1:1")
            .synthesize(&Secret::from("valid-key-12345"), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthError::Http(_)));
        assert_eq!(err.classification(), ErrorClassification::Transient);
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let s = synth("https://example.test/");
        assert_eq!(
            s.endpoint("m"),
            "https://example.test/v1beta/models/m:generateContent"
        );
    }

    #[test]
    fn extract_audio_rejects_bad_base64() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":"%%%"}}]}}]}"#;
        assert!(matches!(extract_audio(body), Err(SynthError::Decode(_))));
    }
}
