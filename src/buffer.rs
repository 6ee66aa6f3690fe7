//! Reconstruction buffer for the in-flight reply
//!
//! Fragments accumulate here. The accumulated text is only published when a
//! fragment carries a boundary character, which coalesces updates to roughly
//! one per word or clause.

/// True if the fragment contains punctuation, a newline, or whitespace
pub fn is_flush_boundary(fragment: &str) -> bool {
    fragment
        .chars()
        .any(|c| matches!(c, '.' | ',' | '!' | '?' | ';' | '\n') || c.is_whitespace())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionBuffer {
    accumulated: String,
    /// Length of `accumulated` at the last publish
    published_len: usize,
}

impl ReconstructionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.published_len = 0;
    }

    /// Append a fragment; returns the full text when it should be published
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.accumulated.push_str(fragment);
        if is_flush_boundary(fragment) {
            self.published_len = self.accumulated.len();
            Some(self.accumulated.clone())
        } else {
            None
        }
    }

    /// Close out the reply and clear the accumulator
    ///
    /// With `flush` unset nothing is returned, so text after the last
    /// boundary never becomes visible. With `flush` set, any unpublished
    /// tail is returned as the final text.
    pub fn finish(&mut self, flush: bool) -> Option<String> {
        let tail_pending = self.accumulated.len() != self.published_len;
        let text = std::mem::take(&mut self.accumulated);
        self.published_len = 0;
        (flush && tail_pending).then_some(text)
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn has_unpublished(&self) -> bool {
        self.accumulated.len() != self.published_len
    }
}
