//! Compound-request detection and connector splitting
//!
//! Connectors inside double quotes are ignored, so `send "do this then that"`
//! stays one request. "and" only separates steps when an action verb follows
//! it; "emails from sarah and bob" is a single request. A later clause that
//! only rephrases the question ("..., then what about friday?") folds into
//! the clause before it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// Verbs that can open a step after a bare "and"
const STEP_VERBS: &str = "reply|respond|answer|forward|archive|delete|remove|trash|send|email|mark|create|schedule|book|add|complete|finish|cancel|move|reschedule|rename|update|remind|read|open|show|list|find|search|count|tell";

static STRONG_CONNECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:and then|then|after that|afterwards|followed by|once that's done|once done|and also)\b")
        .expect("Invalid regex")
});

static AND_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\band\s+(?:please\s+)?(?P<verb>(?:{STEP_VERBS}))\b"))
        .expect("Invalid regex")
});

/// Splits on strong connectors, optionally preceded by a comma, and on "and <verb>"
static SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\s*[,;]?\s*\b(?:(?:and then|then|after that|afterwards|followed by|once that's done|once done|and also)\b\s*,?\s*|and\s+(?:please\s+)?(?P<verb>(?:{STEP_VERBS}))\b)"
    ))
    .expect("Invalid regex")
});

static REPHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:what|how) about\b").expect("Invalid regex")
});

static ANAPHORA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:it|that|them|this|those|these|the result|the results|him|her|its)\b")
        .expect("Invalid regex")
});

static FOLLOW_UP_VERB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:please\s+)?(?:reply|respond|answer|forward)\b").expect("Invalid regex")
});

/// Strength of sequential phrasing in a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSignal {
    /// An explicit connector such as "then" or "after that"
    Strong,
    /// "and" followed by an action verb; may be one operation
    Weak,
    None,
}

/// Byte ranges inside double quotes (straight or curly)
fn quoted_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    for (idx, ch) in text.char_indices() {
        match (ch, open) {
            ('"', None) | ('\u{201c}', None) => open = Some(idx),
            ('"', Some(start)) | ('\u{201d}', Some(start)) => {
                ranges.push(start..idx + ch.len_utf8());
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        ranges.push(start..text.len());
    }
    ranges
}

fn inside_quotes(ranges: &[Range<usize>], position: usize) -> bool {
    ranges.iter().any(|r| r.contains(&position))
}

/// Look for sequential connectors outside quotes
///
/// Connectors only count when they leave at least two real clauses.
pub fn sequence_signal(text: &str) -> SequenceSignal {
    if REPHRASE.is_match(text) {
        return SequenceSignal::None;
    }

    let quotes = quoted_ranges(text);
    let signal = if STRONG_CONNECTOR
        .find_iter(text)
        .any(|m| !inside_quotes(&quotes, m.start()))
    {
        SequenceSignal::Strong
    } else if AND_VERB
        .find_iter(text)
        .any(|m| !inside_quotes(&quotes, m.start()))
    {
        SequenceSignal::Weak
    } else {
        return SequenceSignal::None;
    };

    if split_segments(text).len() < 2 {
        return SequenceSignal::None;
    }
    signal
}

/// A split segment and whether it leans on the segment before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub refers_back: bool,
}

/// Split a request into ordered segments on connectors outside quotes
pub fn split_segments(text: &str) -> Vec<Segment> {
    let quotes = quoted_ranges(text);
    let mut pieces: Vec<&str> = Vec::new();
    let mut cursor = 0;

    for captures in SPLIT.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        if whole.start() < cursor || inside_quotes(&quotes, whole.start() + 1) {
            continue;
        }
        pieces.push(&text[cursor..whole.start()]);
        // "and reply ..." keeps the verb in the next segment
        cursor = captures.name("verb").map_or(whole.end(), |v| v.start());
    }
    pieces.push(&text[cursor..]);

    let mut segments: Vec<Segment> = Vec::new();
    for piece in pieces {
        let piece = piece.trim().trim_matches(|c: char| c == ',' || c == ';').trim();
        if !piece.chars().any(char::is_alphanumeric) {
            continue;
        }
        if REPHRASE.is_match(piece) {
            if let Some(previous) = segments.last_mut() {
                previous.text = format!("{}, {piece}", previous.text);
                continue;
            }
        }
        let refers_back =
            !segments.is_empty() && (ANAPHORA.is_match(piece) || FOLLOW_UP_VERB.is_match(piece));
        segments.push(Segment {
            text: piece.to_string(),
            refers_back,
        });
    }
    segments
}
