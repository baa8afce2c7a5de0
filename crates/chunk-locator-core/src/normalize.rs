//! Aggressive text normalization with a map back to source offsets.
//!
//! Rewritten chunks often differ from the reference text only in
//! typography: curly vs. straight quotes, dash variants, soft hyphens,
//! words hyphenated across a line break, or whitespace runs. Normalizing
//! both sides removes those differences while [`NormalizedText`] keeps,
//! for every normalized byte, the byte range it came from so a match can
//! be projected back onto the original text.

/// Normalized text plus its mapping to the source.
#[derive(Debug, Clone, Default)]
pub struct NormalizedText {
    text: String,
    /// For each byte of `text`: `[start, end)` of the source char it came from.
    origin: Vec<(usize, usize)>,
}

const QUOTES: &[char] = &[
    '"', '\'', '`', '\u{00B4}', '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}', '\u{201C}',
    '\u{201D}', '\u{201E}', '\u{201F}',
];

fn is_dash(c: char) -> bool {
    matches!(c, '-' | '\u{2010}'..='\u{2015}' | '\u{2212}')
}

fn is_tight_punct(c: char) -> bool {
    matches!(c, ',' | '.' | '!' | '?' | ';' | ':')
}

impl NormalizedText {
    pub fn new(source: &str) -> Self {
        let mut out = Self::default();
        // Source range of the first whitespace char of a pending run.
        let mut pending_space: Option<(usize, usize)> = None;
        // Set when the last pushed char was a dash from the source.
        let mut last_was_dash = false;
        // Swallowing the whitespace after a line-break hyphen.
        let mut joining = false;

        for (b, c) in source.char_indices() {
            let range = (b, b + c.len_utf8());
            if c == '\u{00AD}' {
                continue;
            }
            if c.is_whitespace() {
                if last_was_dash {
                    // "sug-\ngests" → "suggests"
                    out.pop();
                    last_was_dash = false;
                    joining = true;
                    pending_space = None;
                    continue;
                }
                if joining {
                    continue;
                }
                if pending_space.is_none() && !out.text.is_empty() {
                    pending_space = Some(range);
                }
                continue;
            }

            joining = false;
            let folded = if QUOTES.contains(&c) {
                '\''
            } else if is_dash(c) {
                '-'
            } else {
                c
            };

            if let Some(space) = pending_space.take() {
                if !is_tight_punct(folded) {
                    out.push(' ', space);
                }
            }
            for lower in folded.to_lowercase() {
                out.push(lower, range);
            }
            last_was_dash = folded == '-';
        }
        out
    }

    fn push(&mut self, c: char, origin: (usize, usize)) {
        self.text.push(c);
        for _ in 0..c.len_utf8() {
            self.origin.push(origin);
        }
    }

    fn pop(&mut self) {
        if let Some(c) = self.text.pop() {
            let keep = self.origin.len() - c.len_utf8();
            self.origin.truncate(keep);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Map a `[start, end)` range of the normalized text back to source
    /// byte offsets.
    pub fn source_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if start >= end || end > self.origin.len() {
            return None;
        }
        Some((self.origin[start].0, self.origin[end - 1].1))
    }

    /// First normalized position at or after source byte `source_from`.
    pub fn position_of_source(&self, source_from: usize) -> usize {
        self.origin.partition_point(|&(s, _)| s < source_from)
    }

    /// Find `needle` (already normalized) at or after source byte
    /// `source_from`, returning the matched source range.
    pub fn find_from(&self, needle: &NormalizedText, source_from: usize) -> Option<(usize, usize)> {
        if needle.is_empty() {
            return None;
        }
        let mut from = self.position_of_source(source_from);
        while from < self.text.len() && !self.text.is_char_boundary(from) {
            from += 1;
        }
        let pos = self.text.get(from..)?.find(needle.as_str())? + from;
        self.source_range(pos, pos + needle.text.len())
    }
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
