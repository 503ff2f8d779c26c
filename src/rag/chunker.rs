/// Text segment produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based position in the document
    pub index: usize,
    /// Trimmed text of the window
    pub text: String,
    /// Character offset of the window start
    pub start: usize,
    /// Character offset after the window end
    pub end: usize,
}

/// Character-window chunker with overlap and word-boundary snapping.
///
/// Each window is at most `size` characters. When a window would end before
/// the text does, its end is pulled back to the last space at or before the
/// cut, provided that space lies after the window start. The next window
/// begins at `max(start + size - overlap, end)`, so progress is guaranteed
/// even when snapping shrinks a window below the overlap width.
#[derive(Debug, Clone)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a new chunker; `overlap` is clamped below `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split text into overlapping, non-empty, trimmed segments.
    pub fn chunk(&self, text: &str) -> Vec<Segment> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut segments = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + self.size).min(len);

            if end < len {
                if let Some(space) = (start + 1..=end).rev().find(|&i| chars[i] == ' ') {
                    end = space;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                segments.push(Segment {
                    index: segments.len(),
                    text: trimmed.to_string(),
                    start,
                    end,
                });
            }

            start = (start + self.size - self.overlap).max(end);
        }

        segments
    }
}
