//! Streaming sentence boundary detection for LLM token chunks.
//!
//! Feeds raw text as it streams in and emits complete sentences as soon as
//! they can be safely delimited, without waiting for the whole response.

const MAX_BUFFER_SIZE: usize = 2000;
const OVERFLOW_SEARCH_WINDOW: usize = 200;

const ABBREVIATIONS: &[&str] = &[
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "Sr.", "Jr.", "U.S.", "U.K.", "U.S.A.", "E.U.", "etc.",
    "vs.", "e.g.", "i.e.", "Inc.", "Ltd.", "Corp.", "St.", "Ave.", "Blvd.", "Rd.", "Dept.", "Gov.",
    "a.m.", "p.m.", "A.M.", "P.M.",
];

const DOMAIN_SUFFIXES: &[&str] = &[".com", ".org", ".net", ".edu", ".gov", ".io", ".ai", ".co"];
const FILE_EXTENSIONS: &[&str] = &[".txt", ".pdf", ".doc", ".jpg", ".png", ".py", ".js", ".ts"];
const FORCE_BREAK_CHARS: &[char] = &[' ', '.', '!', '?', ',', ';'];

/// Buffers streaming text and yields complete sentences as boundaries are
/// recognized. Deliberately conservative: a `.` that might be an
/// abbreviation, decimal, or part of a URL is never treated as a boundary.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns any complete sentences it produced.
    pub fn add_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let (mut sentences, remainder) = extract_sentences(&self.buffer);
        self.buffer = remainder;

        while self.buffer.chars().count() > MAX_BUFFER_SIZE {
            let (forced, remainder) = force_break(&self.buffer);
            sentences.push(forced);
            self.buffer = remainder;
        }

        sentences
    }

    /// Returns the trailing buffered text as a single sentence, if any.
    pub fn flush(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        let trimmed = remaining.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

fn extract_sentences(buffer: &str) -> (Vec<String>, String) {
    let chars: Vec<char> = buffer.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let boundary_end = if c == '!' || c == '?' {
            Some(i + 1)
        } else if c == '.' {
            if is_abbreviation_before(&chars, i) || is_decimal(&chars, i) || is_url_or_path(&chars, i)
            {
                None
            } else {
                followed_by_sentence_start(&chars, i)
            }
        } else {
            None
        };

        if let Some(end) = boundary_end {
            let sentence: String = chars[start..end].iter().collect();
            let trimmed = sentence.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    let remainder: String = chars[start..].iter().collect();
    (sentences, remainder)
}

fn followed_by_sentence_start(chars: &[char], dot_idx: usize) -> Option<usize> {
    match chars.get(dot_idx + 1) {
        Some('\n') => Some(dot_idx + 1),
        Some(' ') => match chars.get(dot_idx + 2) {
            Some(c) if c.is_uppercase() => Some(dot_idx + 1),
            _ => None,
        },
        _ => None,
    }
}

fn is_abbreviation_before(chars: &[char], dot_idx: usize) -> bool {
    let window_start = dot_idx.saturating_sub(9);
    let window: String = chars[window_start..=dot_idx].iter().collect();

    for abbr in ABBREVIATIONS {
        if let Some(stripped_len) = window.len().checked_sub(abbr.len()) {
            if window.ends_with(abbr) {
                let before_is_boundary = stripped_len == 0
                    || !window[..stripped_len]
                        .chars()
                        .last()
                        .map(|c| c.is_alphanumeric())
                        .unwrap_or(false);
                if before_is_boundary {
                    return true;
                }
            }
        }
    }

    if dot_idx >= 1 && chars[dot_idx - 1].is_ascii_uppercase() {
        let preceded_by_boundary = dot_idx == 1 || chars[dot_idx - 2] == ' ';
        if preceded_by_boundary {
            return true;
        }
    }

    false
}

fn is_decimal(chars: &[char], dot_idx: usize) -> bool {
    let before = dot_idx.checked_sub(1).and_then(|i| chars.get(i));
    let after = chars.get(dot_idx + 1);
    matches!((before, after), (Some(b), Some(a)) if b.is_ascii_digit() && a.is_ascii_digit())
}

fn is_url_or_path(chars: &[char], dot_idx: usize) -> bool {
    let before_start = dot_idx.saturating_sub(20);
    let before: String = chars[before_start..dot_idx].iter().collect::<String>().to_lowercase();
    let after_end = (dot_idx + 21).min(chars.len());
    let after: String = chars[dot_idx..after_end].iter().collect();

    if before.contains("http://") || before.contains("https://") || before.contains("www.") || before.contains("://")
    {
        return true;
    }

    if DOMAIN_SUFFIXES.iter().any(|s| after.starts_with(s)) {
        return true;
    }

    let has_slash = before.contains('/') || before.contains('\\');
    if has_slash && FILE_EXTENSIONS.iter().any(|e| after.starts_with(e)) {
        return true;
    }

    false
}

fn force_break(buffer: &str) -> (String, String) {
    let chars: Vec<char> = buffer.chars().collect();
    let window_start = chars.len().saturating_sub(OVERFLOW_SEARCH_WINDOW);

    let break_at = chars[window_start..]
        .iter()
        .rposition(|c| FORCE_BREAK_CHARS.contains(c))
        .map(|p| window_start + p + 1);

    let split_at = break_at.unwrap_or(MAX_BUFFER_SIZE.min(chars.len()));
    let sentence: String = chars[..split_at].iter().collect::<String>().trim().to_string();
    let remainder: String = chars[split_at..].iter().collect();
    (sentence, remainder)
}

/// Strips TTS-unfriendly punctuation: collapses ellipses to a comma,
/// removes sentence-final periods that aren't decimals, and trims trailing
/// punctuation. Returns `None` if nothing speakable remains.
pub fn clean_for_speech(sentence: &str, lowercase: bool) -> Option<String> {
    let replaced = sentence.replace("...", ",");

    let chars: Vec<char> = replaced.chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == '.' {
            let next_is_digit = chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false);
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            if next_is_digit && prev_is_digit {
                out.push(c);
            }
            continue;
        }
        out.push(c);
    }

    let trimmed = out
        .trim_end_matches(|c: char| matches!(c, '!' | '?' | ',' | ';' | ':'))
        .trim();

    if trimmed.is_empty() {
        return None;
    }

    Some(if lowercase {
        trimmed.to_lowercase()
    } else {
        trimmed.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviation_is_not_a_boundary() {
        let mut seg = SentenceSegmenter::new();
        let sentences = seg.add_chunk("Dr. Smith arrived. ");
        assert_eq!(sentences, vec!["Dr. Smith arrived.".to_string()]);
    }

    #[test]
    fn decimal_is_not_a_boundary() {
        let mut seg = SentenceSegmenter::new();
        let sentences = seg.add_chunk("Pi is 3.14 approximately. ");
        assert_eq!(sentences, vec!["Pi is 3.14 approximately.".to_string()]);
    }

    #[test]
    fn url_is_not_a_boundary() {
        let mut seg = SentenceSegmenter::new();
        let sentences = seg.add_chunk("Visit https://example.com for info. ");
        assert_eq!(sentences, vec!["Visit https://example.com for info.".to_string()]);
    }

    #[test]
    fn exclamation_and_question_always_break() {
        let mut seg = SentenceSegmenter::new();
        let sentences = seg.add_chunk("Really?! Yes!");
        assert_eq!(sentences, vec!["Really?!".to_string(), "Yes!".to_string()]);
    }

    #[test]
    fn incomplete_sentence_is_deferred() {
        let mut seg = SentenceSegmenter::new();
        let sentences = seg.add_chunk("This is unfinished");
        assert!(sentences.is_empty());
        let flushed = seg.flush();
        assert_eq!(flushed, Some("This is unfinished".to_string()));
    }

    #[test]
    fn overflow_forces_a_break() {
        let mut seg = SentenceSegmenter::new();
        let long_chunk = "a".repeat(2100);
        let sentences = seg.add_chunk(&long_chunk);
        assert_eq!(sentences.len(), 1);
        assert!(sentences[0].len() <= 2000);
        let remainder = seg.flush();
        assert!(remainder.is_some());
    }

    #[test]
    fn clean_for_speech_handles_ellipsis() {
        assert_eq!(clean_for_speech("Well... fine.", false), Some("Well, fine".to_string()));
    }

    #[test]
    fn clean_for_speech_keeps_decimals() {
        assert_eq!(clean_for_speech("It costs 3.50.", false), Some("It costs 3.50".to_string()));
    }

    #[test]
    fn clean_for_speech_drops_empty_result() {
        assert_eq!(clean_for_speech("...", false), None);
    }
}
