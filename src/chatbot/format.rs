//! Post-processing of raw model output into something Telegram accepts.
//!
//! Conversational replies are split into messages under the size limit,
//! preferring sentence boundaries. Code replies are unwrapped from their
//! markdown fences and named after the request.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Telegram caps messages at 4096; stay a little under.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// A sentence boundary at or before this character is too early to cut at.
pub const MIN_SPLIT_OFFSET: usize = 100;

/// Keywords kept in a generated filename.
pub const MAX_FILENAME_KEYWORDS: usize = 4;

/// Words dropped when naming a code file after the request.
pub const FILENAME_STOPWORDS: &[&str] = &[
    "a", "an", "the", "me", "to", "for", "please", "of", "in", "on", "and", "or", "with", "that",
    "this", "can", "could", "would", "you", "i", "my", "it", "is", "some", "want", "need", "how",
    "do", "from", "into", "using", "by", "at", "be", "should", "will",
];

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[\w+#.\-]*\s*$").expect("fence pattern"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,6}\s").expect("heading pattern"));

/// Byte offset of the `n`th char, or `s.len()` if shorter.
fn char_to_byte(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Split `text` into parts of at most `limit` characters.
///
/// Text that already fits comes back untouched. Longer text is cut at the
/// last `.`, `!` or `?` inside each window when that lies past
/// [`MIN_SPLIT_OFFSET`], otherwise hard-cut at the limit. Whitespace at the
/// cut points is trimmed and empty parts are dropped.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let window_end = char_to_byte(rest, limit);
        let window = &rest[..window_end];

        let boundary = window
            .char_indices()
            .enumerate()
            .filter(|(_, (_, c))| matches!(c, '.' | '!' | '?'))
            .last();

        let split_at = match boundary {
            Some((char_pos, (byte_pos, _))) if char_pos > MIN_SPLIT_OFFSET => byte_pos + 1,
            _ => window_end,
        };

        let part = rest[..split_at].trim();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        rest = rest[split_at..].trim();
    }

    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

/// Remove code fences everywhere and markdown headings outside of code.
pub fn strip_code_fences(reply: &str) -> String {
    let mut in_fence = false;
    let mut kept = Vec::new();

    for line in reply.lines() {
        if FENCE_RE.is_match(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && HEADING_RE.is_match(line) {
            continue;
        }
        kept.push(line);
    }

    kept.join("\n").trim().to_string()
}

/// Prose before the first fence, if the reply has a fence and any prose.
pub fn leading_prose(reply: &str) -> Option<String> {
    let mut prose = Vec::new();
    let mut saw_fence = false;
    for line in reply.lines() {
        if FENCE_RE.is_match(line) {
            saw_fence = true;
            break;
        }
        if !HEADING_RE.is_match(line) {
            prose.push(line);
        }
    }
    if !saw_fence {
        return None;
    }

    let text = prose.join("\n").trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

/// Keywords of a request for use in a filename. Accents are folded to
/// their base letter; anything else outside ASCII is dropped.
pub fn filename_keywords(request: &str) -> Vec<String> {
    request
        .split_whitespace()
        .map(|w| {
            w.nfkd()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|w| !w.is_empty() && !FILENAME_STOPWORDS.contains(&w.as_str()))
        .take(MAX_FILENAME_KEYWORDS)
        .collect()
}

/// Filename for a code reply, e.g. `saro_write_script_parse_logs.txt`.
pub fn code_filename(request: &str, prefix: &str) -> String {
    let keywords = filename_keywords(request);
    if keywords.is_empty() {
        return format!("{prefix}_code.txt");
    }
    format!("{prefix}_{}.txt", keywords.join("_"))
}

/// A code reply ready to be sent as a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifact {
    pub filename: String,
    pub content: String,
    /// Short text sent alongside the file.
    pub summary: String,
}

/// Build the document and its summary from the model's reply.
pub fn extract_code(request: &str, reply: &str, prefix: &str, fallback_summary: &str, limit: usize) -> CodeArtifact {
    let content = strip_code_fences(reply);
    let summary = leading_prose(reply)
        .map(|p| {
            let end = char_to_byte(&p, limit);
            p[..end].to_string()
        })
        .unwrap_or_else(|| fallback_summary.to_string());

    CodeArtifact {
        filename: code_filename(request, prefix),
        content,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_short_text_passes_through() {
        let text = "  hello there.  ";
        assert_eq!(split_message(text, 50), vec![text.to_string()]);

        let exact = "a".repeat(4000);
        assert_eq!(split_message(&exact, MAX_MESSAGE_LENGTH), vec![exact.clone()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(split_message("", MAX_MESSAGE_LENGTH).is_empty());
    }

    #[test]
    fn test_long_text_splits_at_sentence() {
        let sentence = "This is a fairly ordinary sentence that goes on a bit. ";
        let text = sentence.repeat(200);
        let parts = split_message(&text, MAX_MESSAGE_LENGTH);

        assert!(parts.len() > 1);
        for part in &parts {
            assert!(!part.is_empty());
            assert!(part.chars().count() <= MAX_MESSAGE_LENGTH);
        }
        for part in &parts[..parts.len() - 1] {
            assert!(part.ends_with('.'), "part should end at a sentence: {:?}", &part[part.len() - 20..]);
        }
        assert_eq!(squash(&parts.concat()), squash(&text));
    }

    #[test]
    fn test_hard_cut_without_punctuation() {
        let text = "x".repeat(9000);
        let parts = split_message(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 4000);
        assert_eq!(parts[1].len(), 4000);
        assert_eq!(parts[2].len(), 1000);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_early_boundary_is_ignored() {
        // Only punctuation sits at offset 50, before the minimum offset.
        let mut text = "y".repeat(50);
        text.push('.');
        text.push_str(&"z".repeat(400));
        let parts = split_message(&text, 200);
        assert_eq!(parts[0].chars().count(), 200);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_boundary_past_minimum_offset_is_used() {
        let mut text = "y".repeat(150);
        text.push('!');
        text.push_str(&"z".repeat(400));
        let parts = split_message(&text, 200);
        assert_eq!(parts[0], format!("{}!", "y".repeat(150)));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let text = "ñ".repeat(450);
        let parts = split_message(&text, 200);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 200));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_whitespace_only_window_dropped() {
        let mut text = " ".repeat(250);
        text.push_str("tail");
        let parts = split_message(&text, 200);
        assert_eq!(parts, vec!["tail".to_string()]);
    }

    #[test]
    fn test_strip_fences_and_headings() {
        let reply = "## Solution\nHere you go:\n```python\n# a comment\nprint('hi')\n```\n";
        let stripped = strip_code_fences(reply);
        assert_eq!(stripped, "Here you go:\n# a comment\nprint('hi')");
    }

    #[test]
    fn test_strip_without_fences() {
        assert_eq!(strip_code_fences("fn main() {}\n"), "fn main() {}");
    }

    #[test]
    fn test_leading_prose() {
        assert_eq!(
            leading_prose("Sure thing.\n```rust\nfn main() {}\n```"),
            Some("Sure thing.".to_string())
        );
        assert_eq!(leading_prose("```rust\nfn main() {}\n```"), None);
        assert_eq!(leading_prose("no fences at all"), None);
    }

    #[test]
    fn test_filename_from_request() {
        assert_eq!(
            filename_keywords("write me a script to parse logs please"),
            vec!["write", "script", "parse", "logs"]
        );
        assert_eq!(
            code_filename("write me a script to parse logs please", "saro"),
            "saro_write_script_parse_logs.txt"
        );
    }

    #[test]
    fn test_filename_keeps_four_keywords() {
        assert_eq!(
            code_filename("Generate a Function, sorting huge lists quickly!", "saro"),
            "saro_generate_function_sorting_huge.txt"
        );
    }

    #[test]
    fn test_filename_folds_accents_to_ascii() {
        assert_eq!(code_filename("créer une fonction", "saro"), "saro_creer_une_fonction.txt");
        assert_eq!(code_filename("écris un script", "saro"), "saro_ecris_un_script.txt");
        assert_eq!(
            code_filename("créer une fonction résumé", "saro"),
            "saro_creer_une_fonction_resume.txt"
        );
        assert_eq!(code_filename("???", "saro"), "saro_code.txt");
    }

    #[test]
    fn test_extract_code() {
        let artifact = extract_code(
            "write a function to add numbers",
            "Easy.\n```rust\nfn add(a: i32, b: i32) -> i32 { a + b }\n```",
            "saro",
            "Here's your code.",
            MAX_MESSAGE_LENGTH,
        );
        assert_eq!(artifact.filename, "saro_write_function_add_numbers.txt");
        assert_eq!(artifact.summary, "Easy.");
        assert_eq!(artifact.content, "Easy.\nfn add(a: i32, b: i32) -> i32 { a + b }");
    }

    #[test]
    fn test_extract_code_fallback_summary() {
        let artifact = extract_code("code", "```\nx = 1\n```", "saro", "Here's your code.", MAX_MESSAGE_LENGTH);
        assert_eq!(artifact.summary, "Here's your code.");
        assert_eq!(artifact.content, "x = 1");
    }
}
