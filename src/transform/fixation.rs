//! Pure word segmentation: tokenizing text, sizing fixation prefixes and
//! choosing which words carry emphasis.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::MAX_FIXATION_PARTS;
use crate::prefs::Preferences;

/// Letters/digits containing at least one letter; inner apostrophes join
/// contractions (`don't`, `l'homme`).
fn word_regex() -> &'static Regex {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    WORD_RE.get_or_init(|| {
        Regex::new(r"[\p{L}\p{Nd}\p{M}]*\p{L}[\p{L}\p{Nd}\p{M}]*(?:['\u{2019}][\p{L}\p{M}]+)*")
            .expect("word pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Word,
    /// Whitespace, punctuation, numbers: copied through untouched.
    Separator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset into the source text.
    pub start: usize,
}

/// Splits `text` into alternating words and separators. Concatenating the
/// token texts reproduces the input exactly.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    for found in word_regex().find_iter(text) {
        if found.start() > cursor {
            tokens.push(Token {
                kind: TokenKind::Separator,
                text: &text[cursor..found.start()],
                start: cursor,
            });
        }
        tokens.push(Token {
            kind: TokenKind::Word,
            text: found.as_str(),
            start: found.start(),
        });
        cursor = found.end();
    }
    if cursor < text.len() {
        tokens.push(Token {
            kind: TokenKind::Separator,
            text: &text[cursor..],
            start: cursor,
        });
    }
    tokens
}

/// Number of leading characters that form the fixation point of a word of
/// `char_len` characters: `ceil(len / (MAX_FIXATION_PARTS + 1 - strength))`,
/// at least one character and never more than the word.
pub fn fixation_length(char_len: usize, strength: u8) -> usize {
    if char_len == 0 {
        return 0;
    }
    let strength = strength.clamp(1, MAX_FIXATION_PARTS);
    let parts = usize::from(MAX_FIXATION_PARTS + 1 - strength);
    char_len.div_ceil(parts).clamp(1, char_len)
}

/// Whether the `word_index`-th word (0-based) starts a saccade bucket.
pub fn is_bucket_start(word_index: usize, interval: u8) -> bool {
    word_index % (usize::from(interval) + 1) == 0
}

/// One word of a transformed text node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordSpan {
    /// Byte range of the word in the original text.
    pub start: usize,
    pub end: usize,
    /// Byte length of the fixation prefix.
    pub fixation_bytes: usize,
    pub emphasized: bool,
}

impl WordSpan {
    pub fn fixation_end(&self) -> usize {
        self.start + self.fixation_bytes
    }
}

/// Fixation boundaries for every word of `text` under `prefs`.
/// `first_index` is the running position of the first word in its block,
/// so buckets continue across inline markup.
pub fn plan_words(text: &str, prefs: &Preferences, first_index: usize) -> Vec<WordSpan> {
    tokenize(text)
        .into_iter()
        .filter(|token| token.kind == TokenKind::Word)
        .enumerate()
        .map(|(offset, token)| {
            let index = first_index + offset;
            let chars = token.text.chars().count();
            let prefix_chars = fixation_length(chars, prefs.fixation_strength);
            let fixation_bytes = token
                .text
                .char_indices()
                .nth(prefix_chars)
                .map(|(offset, _)| offset)
                .unwrap_or(token.text.len());
            WordSpan {
                start: token.start,
                end: token.start + token.text.len(),
                fixation_bytes,
                emphasized: is_bucket_start(index, prefs.saccades_interval),
            }
        })
        .collect()
}
