//! Parser for the free-form text the translation model returns.
//!
//! The response is expected as a sequence of blocks, each opened by a line
//! starting with a language token and a colon. Blocks for languages that were
//! not requested are discarded, the echo of the source block is skipped, and
//! block bodies are cleaned of quoting, bracketed placeholder text and the
//! trailing END sentinel some models append.

use crate::lang;
use crate::store::Translations;

use super::identity_map;

pub(crate) fn extract_translations(
    response: &str,
    source: &str,
    original: &str,
    targets: &[String],
) -> Translations {
    let mut out = identity_map(original, source);
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in response.lines() {
        if let Some((token, rest)) = split_header(line) {
            if let Some((code, body)) = current.take() {
                insert_block(&mut out, code, body);
            }
            // A header for an unrequested language still terminates the
            // previous block; its own body is dropped.
            current = resolve_target(token, source, targets).map(|code| {
                let mut body = Vec::new();
                if !rest.trim().is_empty() {
                    body.push(rest);
                }
                (code, body)
            });
        } else if let Some((_, body)) = &mut current {
            body.push(line);
        }
    }
    if let Some((code, body)) = current {
        insert_block(&mut out, code, body);
    }

    out
}

fn insert_block(out: &mut Translations, code: String, body: Vec<&str>) {
    let content = clean_body(&body.join("\n"));
    if !content.is_empty() {
        out.insert(code, content);
    }
}

/// A header is a line that starts with an alphabetic token directly followed
/// by a colon, e.g. `es:` or `Spanish: hola`.
fn split_header(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let (head, rest) = line.split_at(idx);
    if head.is_empty() || !head.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((head, &rest[1..]))
}

/// Map a header token onto a requested target code. The source language
/// resolves to `None` so its echo block is skipped, as is anything that was
/// never asked for.
fn resolve_target(token: &str, source: &str, targets: &[String]) -> Option<String> {
    let code = lang::resolve(token)
        .map(str::to_owned)
        .or_else(|| targets.iter().find(|t| t.eq_ignore_ascii_case(token)).cloned())?;
    if code == source || !targets.contains(&code) {
        return None;
    }
    Some(code)
}

fn clean_body(raw: &str) -> String {
    let mut text = raw.trim().to_owned();

    // Matching quote pair around the whole block.
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim().to_owned();
        }
    }

    text = strip_placeholders(&text);

    let lower = text.to_ascii_lowercase();
    if let Some(stripped) = lower.strip_suffix("end") {
        if stripped.is_empty() || stripped.ends_with(char::is_whitespace) {
            text.truncate(stripped.len());
        }
    }

    collapse_spaces(text.trim())
}

/// Remove `[translation ...]` template fragments the model sometimes leaves in
/// from the requested response format.
fn strip_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('[') {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);
        match tail.find(']') {
            Some(end) if tail[1..end].trim().to_ascii_lowercase().starts_with("translation") => {
                rest = &tail[end + 1..];
            }
            _ => {
                out.push('[');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of spaces and tabs, leaving newlines alone.
fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_blank = false;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            if !in_blank {
                out.push(' ');
            }
            in_blank = true;
        } else {
            in_blank = false;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn parses_blocks_for_requested_languages() {
        let response = "es:\nhola\n\nen:\nhello\n\nfr:\nbonjour";
        let map = extract_translations(response, "es", "hola", &targets(&["en", "fr"]));
        assert_eq!(map.get("en").map(String::as_str), Some("hello"));
        assert_eq!(map.get("fr").map(String::as_str), Some("bonjour"));
        assert_eq!(map.get("es").map(String::as_str), Some("hola"));
    }

    #[test]
    fn source_entry_is_the_original_not_the_echo() {
        let response = "es:\nHOLA REWRITTEN\n\nen:\nhello";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert_eq!(map.get("es").map(String::as_str), Some("hola"));
    }

    #[test]
    fn unrequested_languages_are_discarded() {
        let response = "en:\nhello\n\nde:\nhallo";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert!(!map.contains_key("de"));
        assert_eq!(map.get("en").map(String::as_str), Some("hello"));
    }

    #[test]
    fn display_name_headers_resolve_to_codes() {
        let response = "English: hello there\nFrench: bonjour";
        let map = extract_translations(response, "es", "hola", &targets(&["en", "fr"]));
        assert_eq!(map.get("en").map(String::as_str), Some("hello there"));
        assert_eq!(map.get("fr").map(String::as_str), Some("bonjour"));
    }

    #[test]
    fn quotes_placeholders_and_sentinels_are_cleaned() {
        let response = "en:\n\"hello   world [translation in proper script] END\"";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert_eq!(map.get("en").map(String::as_str), Some("hello world"));
    }

    #[test]
    fn unrelated_brackets_survive_cleanup() {
        let response = "en:\nhello [sic] world";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert_eq!(map.get("en").map(String::as_str), Some("hello [sic] world"));
    }

    #[test]
    fn garbage_degrades_to_identity_only() {
        let map = extract_translations("no structure at all", "es", "hola", &targets(&["en"]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("es").map(String::as_str), Some("hola"));
    }

    #[test]
    fn empty_block_body_is_not_inserted() {
        let response = "en:\n[translation in proper script]";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert!(!map.contains_key("en"));
    }

    #[test]
    fn words_ending_in_end_are_left_alone() {
        let response = "en:\nmy friend";
        let map = extract_translations(response, "es", "amigo", &targets(&["en"]));
        assert_eq!(map.get("en").map(String::as_str), Some("my friend"));
    }

    #[test]
    fn multiline_bodies_keep_their_newlines() {
        let response = "en:\nline one\nline two";
        let map = extract_translations(response, "es", "hola", &targets(&["en"]));
        assert_eq!(map.get("en").map(String::as_str), Some("line one\nline two"));
    }
}
