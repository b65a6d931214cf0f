//! Two-stage translation around the English-only answer pipeline.
//!
//! 1. [`Translator::detect`] asks the translation model for the question's
//!    language and an English rendering. The reply is parsed by
//!    [`parse_detection`]; a reply that cannot be parsed falls back to
//!    `("english", original)`.
//! 2. [`Translator::translate_out`] renders the English answer back into
//!    the user's language. [`needs_translation`] decides whether that
//!    happens: only for Indian languages and Hinglish, and only when the
//!    answer actually came back in English.

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{ChatMessage, ChatModel, LlmError};

pub const ENGLISH: &str = "english";

/// Languages whose answers are translated back. Names as the detector
/// reports them, plus ISO 639-1 codes.
const INDIAN_LANGUAGES: &[&str] = &[
    "hindi", "hinglish", "bengali", "bangla", "tamil", "telugu", "marathi", "gujarati",
    "kannada", "malayalam", "punjabi", "odia", "oriya", "assamese", "urdu", "sanskrit",
    "konkani", "maithili", "nepali", "sindhi", "kashmiri", "manipuri", "bodo", "dogri",
    "santali", "hi", "bn", "ta", "te", "mr", "gu", "kn", "ml", "pa", "or", "as", "ur",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Lower-case language name, e.g. `hindi` or `hinglish`.
    pub language: String,
    /// The question in English.
    pub translation: String,
}

impl Detection {
    pub fn english(original: &str) -> Self {
        Self {
            language: ENGLISH.to_string(),
            translation: original.to_string(),
        }
    }

    pub fn is_english(&self) -> bool {
        self.language == ENGLISH
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation model reply has neither a language nor a translation: {0:?}")]
    Unparseable(String),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Deserialize)]
struct DetectionReply {
    language: Option<String>,
    translation: Option<String>,
}

/// Parse a detection reply.
///
/// Accepts a JSON object `{"language": ..., "translation": ...}` (possibly
/// wrapped in prose or a code fence) or the line form
/// `LANGUAGE_CODE: <lang>` / `TRANSLATION: <text>`. A missing language
/// defaults to English and a missing translation to `original`.
pub fn parse_detection(reply: &str, original: &str) -> Result<Detection, TranslateError> {
    let (language, translation) = match parse_json_reply(reply) {
        Some(parsed) => parsed,
        None => parse_line_reply(reply),
    };

    if language.is_none() && translation.is_none() {
        return Err(TranslateError::Unparseable(reply.to_string()));
    }

    Ok(Detection {
        language: language
            .map(|l| normalize_language(&l))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| ENGLISH.to_string()),
        translation: translation
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| original.to_string()),
    })
}

fn parse_json_reply(reply: &str) -> Option<(Option<String>, Option<String>)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: DetectionReply = serde_json::from_str(&reply[start..=end]).ok()?;
    if parsed.language.is_none() && parsed.translation.is_none() {
        return None;
    }
    Some((parsed.language, parsed.translation))
}

fn parse_line_reply(reply: &str) -> (Option<String>, Option<String>) {
    let mut language = None;
    let mut translation = None;
    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("LANGUAGE_CODE:") {
            language = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("TRANSLATION:") {
            translation = Some(rest.trim().to_string());
        }
    }
    (language, translation)
}

fn normalize_language(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '.')
        .trim()
        .to_lowercase()
}

pub fn is_indian_language(language: &str) -> bool {
    INDIAN_LANGUAGES.contains(&normalize_language(language).as_str())
}

/// Rough check that `text` reads as English: at least 90% of its letters
/// are ASCII. Approximate: any Latin-script text (French, Spanish,
/// romanised Hinglish) passes too, so it only separates Latin script from
/// Devanagari and other Indic scripts.
pub fn looks_english(text: &str) -> bool {
    let mut letters = 0usize;
    let mut ascii = 0usize;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if c.is_ascii() {
            ascii += 1;
        }
    }
    letters > 0 && ascii * 10 >= letters * 9
}

/// Translate-out rule: non-English question, English answer, and a target
/// language that is Indian or Hinglish.
pub fn needs_translation(language: &str, answer: &str) -> bool {
    language != ENGLISH && is_indian_language(language) && looks_english(answer)
}

fn detection_prompt(input: &str) -> String {
    format!(
        "You are a translator and language detector. Detect the language of the user question \
         below and translate it into English. Reply with only a JSON object of the form \
         {{\"language\": \"<language name in lower case; use hinglish for Hindi written in Latin \
         script mixed with English>\", \"translation\": \"<English translation of the question>\"}}.\n\n\
         User question: {input}"
    )
}

fn translate_out_prompt(answer: &str, language: &str) -> String {
    let target = if language == "hinglish" {
        "Hinglish (Hindi written in Latin script, mixed with English)".to_string()
    } else {
        language.to_string()
    };
    format!(
        "You are a translator. Translate the following answer into {target}. \
         Do not add explanations, output only the translated answer:\n\n{answer}\n"
    )
}

pub struct Translator {
    model: Arc<dyn ChatModel>,
}

impl Translator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Detect the language of `input` and translate it to English.
    ///
    /// A model failure is returned as an error; an unusable reply falls back
    /// to treating the input as English.
    pub async fn detect(&self, input: &str) -> Result<Detection, LlmError> {
        let reply = self
            .model
            .complete(&[ChatMessage::user(detection_prompt(input))])
            .await?;

        match parse_detection(&reply, input) {
            Ok(detection) => {
                tracing::debug!("detected language: {}", detection.language);
                Ok(detection)
            }
            Err(e) => {
                tracing::warn!("{e}; assuming English");
                Ok(Detection::english(input))
            }
        }
    }

    /// Translate an English answer into `language`.
    pub async fn translate_out(&self, answer: &str, language: &str) -> Result<String, LlmError> {
        let reply = self
            .model
            .complete(&[ChatMessage::user(translate_out_prompt(answer, language))])
            .await?;
        Ok(reply.trim().to_string())
    }
}
