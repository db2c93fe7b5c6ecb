//! Fixed-size overlapping window splitter.
//!
//! Chapter prose is chunked into character windows (default 1000 chars with
//! 150 overlap) before embedding. Windows are cut on char boundaries; the
//! final window may be shorter.

use feuilleton::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput(format!(
                "chunk_size must be > 0, got {}",
                self.chunk_size
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidInput(format!(
                "Got a larger chunk overlap ({}) than chunk size ({}), should be smaller.",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Split `text` into overlapping windows. Empty and whitespace-only
    /// windows are dropped.
    pub fn split(&self, text: &str) -> Result<Vec<String>> {
        self.validate()?;
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Ok(Vec::new());
        }
        let step = self.chunk_size - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            if !window.trim().is_empty() {
                chunks.push(window);
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
        Ok(chunks)
    }
}
