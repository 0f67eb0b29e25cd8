//! Speech-to-text adapter.
//!
//! Same degradation contract as translation: any failure yields an empty
//! transcript, which callers treat as "nothing was said".

use async_trait::async_trait;
use reqwest::{multipart, Client};
use tracing::warn;

use crate::{AppResult, GetField};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

/// Language hint sentinel: let the model detect the language itself.
pub use crate::lang::AUTO as AUTO_LANGUAGE;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Best-effort transcript of the audio blob, empty string on any failure.
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> String;
}

pub struct OpenAiTranscriber {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
        }
    }

    async fn request(&self, audio: Vec<u8>, language: &str) -> AppResult<String> {
        let part = multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("temperature", "0");
        if language != AUTO_LANGUAGE {
            form = form.text("language", language.to_owned());
        }

        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(format!(
                "transcription API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )
            .into());
        }

        let body: serde_json::Value = res.json().await?;
        body.get_str_field("text")
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, language: &str) -> String {
        match self.request(audio, language).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e.0, "transcription request failed");
                String::new()
            }
        }
    }
}
