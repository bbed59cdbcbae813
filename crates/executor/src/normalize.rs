//! Terminal-style rendering of raw process output.
//!
//! A carriage return rewinds to the start of the current line, so progress
//! bars that redraw themselves collapse to their last frame. A trailing
//! carriage return is held back: the line it would clear stays visible until
//! more output arrives.

/// Render `raw` the way a terminal would show it.
pub fn normalize(raw: &str) -> String {
    let mut normalizer = OutputNormalizer::new();
    normalizer.push(raw);
    normalizer.rendered()
}

/// Incremental form of [`normalize`] for output that arrives in chunks.
///
/// After any sequence of `push` calls, `rendered()` equals `normalize` of the
/// concatenated chunks.
#[derive(Debug, Default, Clone)]
pub struct OutputNormalizer {
    committed: String,
    line: String,
    pending_cr: bool,
}

impl OutputNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            if self.pending_cr {
                self.line.clear();
                self.pending_cr = false;
            }
            match ch {
                '\r' => self.pending_cr = true,
                '\n' => {
                    self.committed.push_str(&self.line);
                    self.committed.push('\n');
                    self.line.clear();
                }
                _ => self.line.push(ch),
            }
        }
    }

    pub fn rendered(&self) -> String {
        let mut out = String::with_capacity(self.committed.len() + self.line.len());
        out.push_str(&self.committed);
        out.push_str(&self.line);
        out
    }
}
