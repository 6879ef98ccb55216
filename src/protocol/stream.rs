//! Incremental marker decoding across successive log reads.

use std::borrow::Cow;

use super::markers::{parse_markers_with_ends, split_trailing_fragment, Marker};

/// A marker together with where it ends in the chunk that completed it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedMarker {
    /// Decoded marker.
    pub marker: Marker,
    /// Bytes of the fed chunk up to and including the closing `]`.
    pub end: usize,
}

/// Stateful wrapper around [`parse_markers`](super::markers::parse_markers) for chunked input.
///
/// Bytes that cannot be interpreted yet (an incomplete UTF-8 sequence or a
/// marker cut off mid-way) are held back and prepended to the next chunk, so
/// feeding a log in arbitrary pieces yields the same markers as parsing it
/// in one pass.
#[derive(Debug, Default)]
pub struct MarkerStream {
    pending: Vec<u8>,
}

impl MarkerStream {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes and return the markers they complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Marker> {
        self.feed_located(chunk)
            .into_iter()
            .map(|located| located.marker)
            .collect()
    }

    /// [`feed`](Self::feed), also reporting where each marker ends in `chunk`.
    pub fn feed_located(&mut self, chunk: &[u8]) -> Vec<LocatedMarker> {
        let carried = self.pending.len();
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let boundary = utf8_boundary(&buf);
        let complete = &buf[..boundary];
        let text = String::from_utf8_lossy(complete);
        let (head, _fragment) = split_trailing_fragment(&text);

        let to_bytes = |idx: usize| match &text {
            Cow::Borrowed(_) => idx,
            Cow::Owned(_) => lossy_to_byte_index(complete, idx),
        };
        let markers = parse_markers_with_ends(head)
            .into_iter()
            .map(|(marker, end)| LocatedMarker {
                marker,
                end: to_bytes(end).saturating_sub(carried),
            })
            .collect();
        self.pending = buf[to_bytes(head.len())..].to_vec();
        markers
    }

    /// Number of bytes held back for the next chunk.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any held-back bytes (e.g., after the log was truncated).
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Index where a trailing, incomplete UTF-8 sequence begins (or `bytes.len()`).
fn utf8_boundary(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let idx = len - back;
        let byte = bytes[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // Continuation byte; keep looking for the lead byte.
            continue;
        }
        let expected = match byte {
            b if b & 0b1000_0000 == 0 => 1,
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return len,
        };
        return if back < expected { idx } else { len };
    }
    len
}

/// Map an index into `String::from_utf8_lossy(bytes)` back to `bytes`.
///
/// Each maximal invalid sequence decodes to one U+FFFD; an index inside
/// that replacement maps to the end of the sequence.
fn lossy_to_byte_index(bytes: &[u8], text_idx: usize) -> usize {
    let mut text_pos = 0;
    let mut byte_pos = 0;
    for chunk in bytes.utf8_chunks() {
        let valid = chunk.valid().len();
        if text_idx <= text_pos + valid {
            return byte_pos + (text_idx - text_pos);
        }
        text_pos += valid;
        byte_pos += valid;

        let invalid = chunk.invalid().len();
        if invalid > 0 {
            text_pos += char::REPLACEMENT_CHARACTER.len_utf8();
            byte_pos += invalid;
            if text_idx <= text_pos {
                return byte_pos;
            }
        }
    }
    bytes.len()
}
