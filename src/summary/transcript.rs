//! Transcript preparation and response parsing

use once_cell::sync::Lazy;
use regex::Regex;

/// ANSI escape sequences: CSI, OSC (BEL or ST terminated), charset selection,
/// single-char escapes and stray ESC bytes
static ANSI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[0-9;?]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[()][A-Za-z0-9]",
        r"|\x1b[=>MNOPc78]",
        r"|\x1b",
    ))
    .expect("ANSI pattern is valid")
});

/// Fenced code block, optionally tagged `json`
static FENCED_JSON_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("fence pattern is valid"));

/// Remove ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ANSI_REGEX.replace_all(text, "").into_owned()
}

/// Build the text sent for summarization
///
/// Chunks are joined with newlines, escape sequences and carriage returns are
/// removed, and only the last `max_chars` characters are kept.
pub fn build_transcript<S: AsRef<str>>(chunks: &[S], max_chars: usize) -> String {
    let joined = chunks
        .iter()
        .map(|chunk| chunk.as_ref())
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = strip_ansi(&joined).replace('\r', "");
    tail_chars(&cleaned, max_chars).to_string()
}

/// The last `max_chars` characters of `text`
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((start, _)) => &text[start..],
        None => "",
    }
}

/// JSON payload of a model reply: the first fenced block, else the whole text
pub fn extract_json(text: &str) -> &str {
    FENCED_JSON_REGEX
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_sequences() {
        let text = "\x1b[1;32mgreen\x1b[0m \x1b]0;title\x07plain\x1b(B \x1b[?25lcursor\x1b=";
        assert_eq!(strip_ansi(text), "green plain cursor");
    }

    #[test]
    fn test_strip_osc_with_string_terminator() {
        assert_eq!(strip_ansi("a\x1b]8;;http://x\x1b\\b"), "ab");
    }

    #[test]
    fn test_build_transcript_joins_and_cleans() {
        let chunks = ["\x1b[31mline one\x1b[0m\r", "line two\r\n"];
        assert_eq!(build_transcript(&chunks, 1000), "line one\nline two\n");
    }

    #[test]
    fn test_build_transcript_keeps_tail() {
        let chunks = ["abcdef", "ghij"];
        assert_eq!(build_transcript(&chunks, 4), "ghij");
        assert_eq!(build_transcript(&chunks, 6), "f\nghij");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let chunks = ["日本語テキスト"];
        assert_eq!(build_transcript(&chunks, 3), "キスト");
        assert_eq!(build_transcript(&chunks, 0), "");
    }

    #[test]
    fn test_extract_json_from_fenced_block() {
        let reply = "Here you go:\n```json\n{\"title\": \"A\"}\n```\nDone.";
        assert_eq!(extract_json(reply), "{\"title\": \"A\"}");

        let untagged = "```\n{\"summary\": \"B\"}\n```";
        assert_eq!(extract_json(untagged), "{\"summary\": \"B\"}");
    }

    #[test]
    fn test_extract_json_plain_text() {
        assert_eq!(extract_json("  {\"title\": \"x\"}\n"), "{\"title\": \"x\"}");
    }
}
