//! Chat-completion backed translator.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::warn;

use crate::{lang, store::Translations, AppResult, GetField};

use super::{dedup_targets, identity_map, parse::extract_translations, Translator};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str = "You are a precise translator with expertise in phonetic and \
transliterated text. You can understand text written in roman script but meant to be read in \
other languages (like \"kya hal hai\" for Urdu or \"wo hen hao\" for Chinese). Always translate \
into the proper script of the target language.";

pub struct OpenAiTranslator {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiTranslator {
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

    async fn request(&self, prompt: &str) -> AppResult<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(format!(
                "translation API error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            )
            .into());
        }

        let body: serde_json::Value = res.json().await?;
        body.get_obj_field("choices")?
            .get(0)
            .ok_or("expected a completion choice")?
            .get_obj_field("message")?
            .get_str_field("content")
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, source: &str, targets: &[String]) -> Translations {
        let targets = dedup_targets(targets, source);
        if targets.is_empty() {
            return identity_map(text, source);
        }

        match self.request(&build_prompt(text, source, &targets)).await {
            Ok(response) if !response.trim().is_empty() => {
                extract_translations(&response, source, text, &targets)
            }
            Ok(_) => {
                warn!("translation model returned an empty completion");
                identity_map(text, source)
            }
            Err(e) => {
                warn!(error = %e.0, "translation request failed");
                identity_map(text, source)
            }
        }
    }
}

fn build_prompt(text: &str, source: &str, targets: &[String]) -> String {
    let target_list = targets
        .iter()
        .map(|code| match lang::display_name(code) {
            Some(name) => format!("{code} ({name})"),
            None => code.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let response_format = targets
        .iter()
        .map(|code| format!("{code}:\n[translation in proper script]"))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "TRANSLATION TASK\n\n\
         SOURCE TEXT ({source}):\n{text}\n\n\
         NOTE: the source text might be written phonetically or transliterated (like \"kaise ho\" \
         for Hindi/Urdu or \"ni hao\" for Chinese). Identify and understand such phonetic \
         writing in the source language.\n\n\
         TRANSLATE TO ONLY:\n{target_list}\n\n\
         INSTRUCTIONS:\n\
         1. Interpret phonetic spellings and informal transliterations correctly.\n\
         2. Keep the tone, formality, formatting, punctuation and emojis of the source.\n\
         3. Write each translation in the proper script of its language, not phonetically.\n\n\
         RESPONSE FORMAT:\n{source}:\n{text}\n\n{response_format}\n\n\
         IMPORTANT:\n\
         - Only translate to the requested languages\n\
         - Don't add explanations, notes, or any other languages"
    )
}
