//! The fixed table of languages a participant may pick.
//!
//! Doubles as the filter for translation fan-out targets and as the lookup the
//! response parser uses to resolve `lang:` block headers.

/// Language hint meaning "let the transcriber detect it".
pub const AUTO: &str = "auto";

pub const SUPPORTED_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("nl", "Dutch"),
    ("ru", "Russian"),
    ("tr", "Turkish"),
    ("ar", "Arabic"),
    ("hi", "Hindi"),
    ("ur", "Urdu"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
];

pub fn is_supported(code: &str) -> bool {
    SUPPORTED_LANGUAGES.iter().any(|(c, _)| *c == code)
}

pub fn display_name(code: &str) -> Option<&'static str> {
    SUPPORTED_LANGUAGES.iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Resolve a header token from a model response to a supported code.
/// Accepts either the code or the English display name, case-insensitively.
pub fn resolve(token: &str) -> Option<&'static str> {
    let token = token.trim();
    SUPPORTED_LANGUAGES.iter()
        .find(|(code, name)| token.eq_ignore_ascii_case(code) || token.eq_ignore_ascii_case(name))
        .map(|(code, _)| *code)
}
