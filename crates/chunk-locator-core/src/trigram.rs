//! Character-trigram similarity and sliding-window search.
//!
//! [`similarity`] is the Jaccard coefficient over two strings' trigram
//! sets. [`slide_search`] scores every `len(needle)`-character window of a
//! haystack at a fixed stride and returns the best one. [`TrigramIndex`]
//! is built once per reference text and carries the char/byte offset table
//! plus the text's full trigram set, so callers can search by character
//! position and reject hopeless needles without scanning.
//!
//! All offsets returned to callers are byte offsets on `char` boundaries.

use std::collections::HashSet;

use serde::Deserialize;

/// Three consecutive characters. Strings shorter than three characters
/// produce a single padded gram so they still compare.
pub type Gram = [char; 3];

const PAD: char = '\0';

/// Stride and early-exit knobs for [`slide_search`].
#[derive(Debug, Clone, Deserialize)]
pub struct SlideParams {
    /// Default stride as a fraction of the needle length.
    #[serde(default = "default_stride_pct")]
    pub stride_pct: f64,
    /// Stride used when the default would scan more than `max_windows`.
    #[serde(default = "default_wide_stride_pct")]
    pub wide_stride_pct: f64,
    #[serde(default = "default_max_windows")]
    pub max_windows: usize,
    /// Stop scanning once a window scores above this.
    #[serde(default = "default_early_exit")]
    pub early_exit: f64,
}

fn default_stride_pct() -> f64 {
    0.10
}
fn default_wide_stride_pct() -> f64 {
    0.20
}
fn default_max_windows() -> usize {
    100
}
fn default_early_exit() -> f64 {
    0.95
}

impl Default for SlideParams {
    fn default() -> Self {
        Self {
            stride_pct: default_stride_pct(),
            wide_stride_pct: default_wide_stride_pct(),
            max_windows: default_max_windows(),
            early_exit: default_early_exit(),
        }
    }
}

/// Collect the trigram set of a character slice.
pub fn gram_set(chars: &[char]) -> HashSet<Gram> {
    match chars.len() {
        0 => HashSet::new(),
        1 => HashSet::from([[chars[0], PAD, PAD]]),
        2 => HashSet::from([[chars[0], chars[1], PAD]]),
        _ => chars.windows(3).map(|w| [w[0], w[1], w[2]]).collect(),
    }
}

/// Jaccard coefficient `|a ∩ b| / |a ∪ b|`; `0.0` when either set is empty.
pub fn jaccard(a: &HashSet<Gram>, b: &HashSet<Gram>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let inter = small.iter().filter(|g| large.contains(*g)).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Trigram Jaccard similarity of two strings.
///
/// ```rust
/// use chunk_locator_core::trigram::similarity;
///
/// assert_eq!(similarity("night", "night"), 1.0);
/// assert_eq!(similarity("", "night"), 0.0);
/// assert!(similarity("night", "nacht") < 0.5);
/// ```
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    jaccard(&gram_set(&a), &gram_set(&b))
}

/// Stride for scanning `haystack_len` characters with a `needle_len`
/// window: `stride_pct` of the needle, widened to `wide_stride_pct` when
/// that would exceed `max_windows` windows. Never zero.
pub fn stride_for(needle_len: usize, haystack_len: usize, params: &SlideParams) -> usize {
    let narrow = ((needle_len as f64 * params.stride_pct).round() as usize).max(1);
    let windows = haystack_len.saturating_sub(needle_len) / narrow + 1;
    if windows > params.max_windows {
        ((needle_len as f64 * params.wide_stride_pct).round() as usize).max(1)
    } else {
        narrow
    }
}

/// Slide over `hay` in character units. Returns `(char_offset, score)`.
fn slide_chars(
    needle: &[char],
    hay: &[char],
    stride: usize,
    early_exit: f64,
) -> Option<(usize, f64)> {
    if needle.is_empty() || hay.is_empty() {
        return None;
    }
    let needle_grams = gram_set(needle);
    if hay.len() <= needle.len() {
        return Some((0, jaccard(&needle_grams, &gram_set(hay))));
    }

    let last = hay.len() - needle.len();
    let mut best = (0, -1.0);
    let mut pos = 0;
    loop {
        let score = jaccard(&needle_grams, &gram_set(&hay[pos..pos + needle.len()]));
        if score > best.1 {
            best = (pos, score);
        }
        if score > early_exit || pos == last {
            break;
        }
        // The final window is always scored so the tail is never skipped.
        pos = (pos + stride.max(1)).min(last);
    }
    Some(best)
}

/// Find the `haystack` window most similar to `needle`.
///
/// Windows are `len(needle)` characters wide. `stride` defaults to
/// [`stride_for`] with default [`SlideParams`]. Returns the byte offset of
/// the best window and its score; `(0, 0.0)` for empty input.
pub fn slide_search(needle: &str, haystack: &str, stride: Option<usize>) -> (usize, f64) {
    let needle_chars: Vec<char> = needle.chars().collect();
    let hay_chars: Vec<char> = haystack.chars().collect();
    let params = SlideParams::default();
    let stride =
        stride.unwrap_or_else(|| stride_for(needle_chars.len(), hay_chars.len(), &params));

    match slide_chars(&needle_chars, &hay_chars, stride, params.early_exit) {
        Some((char_pos, score)) => {
            let byte_pos = haystack
                .char_indices()
                .nth(char_pos)
                .map(|(b, _)| b)
                .unwrap_or(0);
            (byte_pos, score)
        }
        None => (0, 0.0),
    }
}

/// Best-scoring window found by [`TrigramIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMatch {
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Trigram index over one reference text.
#[derive(Debug, Clone)]
pub struct TrigramIndex {
    text: String,
    chars: Vec<char>,
    /// Byte offset of each char, plus a trailing `text.len()` sentinel.
    offsets: Vec<usize>,
    grams: HashSet<Gram>,
}

impl TrigramIndex {
    pub fn build(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (b, c) in text.char_indices() {
            chars.push(c);
            offsets.push(b);
        }
        offsets.push(text.len());
        let grams = gram_set(&chars);
        Self {
            text: text.to_string(),
            chars,
            offsets,
            grams,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len_bytes(&self) -> usize {
        self.text.len()
    }

    pub fn len_chars(&self) -> usize {
        self.chars.len()
    }

    /// Byte offset of the `char_idx`-th char, clamped to the text end.
    pub fn byte_offset(&self, char_idx: usize) -> usize {
        self.offsets[char_idx.min(self.chars.len())]
    }

    /// Index of the char containing `byte`, clamped to the char count.
    pub fn char_index(&self, byte: usize) -> usize {
        match self.offsets.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        }
    }

    /// Largest char boundary `<= byte`.
    pub fn floor_boundary(&self, byte: usize) -> usize {
        self.byte_offset(self.char_index(byte.min(self.text.len())))
    }

    /// Smallest char boundary `>= byte`.
    pub fn ceil_boundary(&self, byte: usize) -> usize {
        let byte = byte.min(self.text.len());
        let floor = self.floor_boundary(byte);
        if floor == byte {
            byte
        } else {
            self.byte_offset(self.char_index(byte) + 1)
        }
    }

    /// Boundary one char after `byte` (clamped to the text end).
    pub fn next_boundary(&self, byte: usize) -> usize {
        self.byte_offset(self.char_index(self.floor_boundary(byte)) + 1)
    }

    /// Boundary one char before `byte` (clamped to zero).
    pub fn prev_boundary(&self, byte: usize) -> usize {
        let idx = self.char_index(self.ceil_boundary(byte));
        self.byte_offset(idx.saturating_sub(1))
    }

    /// Byte end of a span starting at `start` and spanning `char_len` chars.
    pub fn advance(&self, start: usize, char_len: usize) -> usize {
        self.byte_offset(self.char_index(self.floor_boundary(start)) + char_len)
    }

    /// Upper bound on the similarity any window can reach against `needle`.
    ///
    /// Every window's grams are a subset of the text's grams, so a window
    /// can share at most `|needle ∩ text|` grams with the needle.
    pub fn max_possible_similarity(&self, needle: &str) -> f64 {
        let chars: Vec<char> = needle.chars().collect();
        let needle_grams = gram_set(&chars);
        if needle_grams.is_empty() {
            return 0.0;
        }
        let shared = needle_grams.iter().filter(|g| self.grams.contains(*g)).count();
        shared as f64 / needle_grams.len() as f64
    }

    /// Slide `needle` over the byte range `[from, to)` of the text.
    pub fn search(
        &self,
        needle: &str,
        from: usize,
        to: usize,
        params: &SlideParams,
    ) -> Option<WindowMatch> {
        let needle_chars: Vec<char> = needle.chars().collect();
        if needle_chars.is_empty() {
            return None;
        }
        let lo = self.char_index(self.floor_boundary(from));
        let hi = self.char_index(self.ceil_boundary(to)).max(lo);
        let hay = &self.chars[lo..hi];
        let stride = stride_for(needle_chars.len(), hay.len(), params);
        let (pos, score) = slide_chars(&needle_chars, hay, stride, params.early_exit)?;

        let start_char = lo + pos;
        let end_char = (start_char + needle_chars.len()).min(hi);
        Some(WindowMatch {
            start: self.byte_offset(start_char),
            end: self.byte_offset(end_char),
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        assert!((similarity("the quick brown fox", "the quick brown fox") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_empty() {
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_similarity_disjoint() {
        assert_eq!(similarity("aaaa", "zzzz"), 0.0);
    }

    #[test]
    fn test_similarity_short_strings() {
        assert_eq!(similarity("ab", "ab"), 1.0);
        assert_eq!(similarity("a", "b"), 0.0);
    }

    #[test]
    fn test_similarity_symmetric() {
        let a = "jumps over the lazy dog";
        let b = "jumped over a lazy dog";
        assert!((similarity(a, b) - similarity(b, a)).abs() < 1e-12);
    }

    #[test]
    fn test_stride_narrow_and_wide() {
        let params = SlideParams::default();
        // 100-char needle over 500 chars → stride 10 → 41 windows.
        assert_eq!(stride_for(100, 500, &params), 10);
        // 100-char needle over 50_000 chars → too many windows → 20.
        assert_eq!(stride_for(100, 50_000, &params), 20);
        assert_eq!(stride_for(3, 10, &params), 1);
    }

    #[test]
    fn test_slide_search_finds_window() {
        let hay = "lorem ipsum dolor sit amet, the quick brown fox jumps, consectetur";
        let (offset, score) = slide_search("the quick brown fox", hay, Some(1));
        assert_eq!(&hay[offset..offset + 19], "the quick brown fox");
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_slide_search_empty() {
        assert_eq!(slide_search("", "abc", None), (0, 0.0));
        assert_eq!(slide_search("abc", "", None), (0, 0.0));
    }

    #[test]
    fn test_slide_search_multibyte_offsets() {
        let hay = "ééé naïve café au lait";
        let (offset, _) = slide_search("café", hay, Some(1));
        assert!(hay.is_char_boundary(offset));
        assert!(hay[offset..].starts_with("café"));
    }

    #[test]
    fn test_index_boundaries() {
        let index = TrigramIndex::build("aé b");
        // a=0, é=1..3, ' '=3, b=4
        assert_eq!(index.len_chars(), 4);
        assert_eq!(index.floor_boundary(2), 1);
        assert_eq!(index.ceil_boundary(2), 3);
        assert_eq!(index.next_boundary(1), 3);
        assert_eq!(index.prev_boundary(3), 1);
        assert_eq!(index.prev_boundary(0), 0);
        assert_eq!(index.advance(1, 2), 4);
        assert_eq!(index.advance(1, 99), 5);
    }

    #[test]
    fn test_index_search_range() {
        let text = "alpha beta gamma. alpha beta gamma.";
        let index = TrigramIndex::build(text);
        let params = SlideParams::default();
        let m = index.search("alpha beta", 10, text.len(), &params).unwrap();
        assert_eq!(m.start, 18);
        assert_eq!(&text[m.start..m.end], "alpha beta");
    }

    #[test]
    fn test_max_possible_similarity() {
        let index = TrigramIndex::build("the quick brown fox");
        assert!((index.max_possible_similarity("quick") - 1.0).abs() < 1e-9);
        assert_eq!(index.max_possible_similarity("zzzzz"), 0.0);
    }
}
