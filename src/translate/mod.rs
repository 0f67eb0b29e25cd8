//! Translation service adapter.
//!
//! The contract is deliberately infallible: whatever goes wrong on the wire,
//! the caller gets a map back. Total failure degrades to the identity map
//! `{ source: text }`, which renders as a permanently untranslated bubble
//! rather than an error.

mod openai;
mod parse;

pub use openai::OpenAiTranslator;

use async_trait::async_trait;

use crate::store::Translations;

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into each target language. The returned map always
    /// carries the identity entry for the source language; requested targets
    /// the backend failed to produce are simply absent.
    async fn translate(&self, text: &str, source: &str, targets: &[String]) -> Translations;
}

/// Collapse duplicates and drop the source language before dispatch,
/// preserving the order targets were requested in.
pub fn dedup_targets(targets: &[String], source: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(targets.len());
    for target in targets {
        if target != source && !out.contains(target) {
            out.push(target.clone());
        }
    }
    out
}

pub(crate) fn identity_map(text: &str, source: &str) -> Translations {
    let mut map = Translations::new();
    map.insert(source.to_owned(), text.to_owned());
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_drops_duplicates_and_source() {
        let targets = vec!["en".to_owned(), "en".to_owned(), "es".to_owned()];
        assert_eq!(dedup_targets(&targets, "en"), vec!["es".to_owned()]);
    }

    #[test]
    fn dedup_keeps_request_order() {
        let targets = vec!["fr".to_owned(), "de".to_owned(), "fr".to_owned()];
        assert_eq!(dedup_targets(&targets, "en"), vec!["fr".to_owned(), "de".to_owned()]);
    }

    #[test]
    fn dedup_of_source_only_is_empty() {
        let targets = vec!["en".to_owned()];
        assert!(dedup_targets(&targets, "en").is_empty());
    }
}
