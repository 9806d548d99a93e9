//! Language detection for incoming messages.
//!
//! Best effort: anything the detector can't place, isn't sure about, or
//! places outside the supported set, is treated as English. Short messages
//! rarely carry enough signal, so unreliable guesses are discarded.

use tracing::debug;
use whatlang::Lang;

/// Fallback language code.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Languages the bot will answer in (ISO 639-1).
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh", "ja", "hu", "ko", "hi",
];

/// Detect the language of `text`, returning a code from [`SUPPORTED_LANGUAGES`].
pub fn detect_language(text: &str) -> &'static str {
    let Some(info) = whatlang::detect(text) else {
        debug!("Language detection failed, defaulting to {}", DEFAULT_LANGUAGE);
        return DEFAULT_LANGUAGE;
    };

    if !info.is_reliable() {
        debug!(
            "Unreliable guess {:?} (confidence {:.2}), defaulting to {}",
            info.lang(),
            info.confidence(),
            DEFAULT_LANGUAGE
        );
        return DEFAULT_LANGUAGE;
    }

    let code = iso_639_1(info.lang()).unwrap_or(DEFAULT_LANGUAGE);
    debug!(
        "Detected {:?} (confidence {:.2}) -> {}",
        info.lang(),
        info.confidence(),
        code
    );
    code
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    let code = match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Pol => "pl",
        Lang::Tur => "tr",
        Lang::Rus => "ru",
        Lang::Nld => "nl",
        Lang::Ces => "cs",
        Lang::Ara => "ar",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Hun => "hu",
        Lang::Kor => "ko",
        Lang::Hin => "hi",
        _ => return None,
    };
    Some(code)
}
