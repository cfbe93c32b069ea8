//! Parser for the embed-files progress stream.
//!
//! The backend answers an embed request with a plain-text body made of
//! newline-terminated status lines followed by one trailing JSON object:
//!
//! ```text
//! PROGRESS: 1/340
//! PROGRESS: 2/340
//! ...
//! {"status":"success","message":"Embedding complete"}
//! ```
//!
//! Chunk boundaries are arbitrary, so the parser carries both an undecoded
//! UTF-8 tail and an unterminated text fragment between reads. The sequence
//! of published events must not depend on how the bytes were grouped.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

static COUNTS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)/(\d+)").unwrap());

const PROGRESS_PREFIX: &str = "PROGRESS:";

/// One fully parsed progress line. Both counts come from the same line;
/// they are never derived independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub completed: u64,
    pub total: u64,
}

impl ProgressEvent {
    /// Fraction of work done, for the progress bar. A `0/0` line is a legal
    /// "nothing to do" report and renders as zero rather than NaN.
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f32 / self.total as f32 * 100.0
        }
    }
}

/// Classification of one complete line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Progress(ProgressEvent),
    Filler,
}

/// Recognizes `PROGRESS:<text><int>/<int><text>`. Anything else, including
/// a `PROGRESS:` line with no counts, is inert filler.
pub fn classify(line: &str) -> Line {
    let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) else {
        return Line::Filler;
    };
    let Some(caps) = COUNTS_RE.captures(rest) else {
        return Line::Filler;
    };
    match (caps[1].parse(), caps[2].parse()) {
        (Ok(completed), Ok(total)) => Line::Progress(ProgressEvent { completed, total }),
        // Counts too large for u64; treat like any other malformed line.
        _ => Line::Filler,
    }
}

/// Terminal payload of the stream. Structurally open: the backend may add
/// fields, and a tail that fails to parse degrades to the empty outcome.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct EmbedOutcome {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Carry-over state for one embed submission. Owned by that submission for
/// its duration and dropped when the stream ends or errors.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    /// Bytes that did not decode to a complete UTF-8 scalar yet.
    tail: Vec<u8>,
    /// Decoded text not yet terminated by a newline. At end of stream this
    /// is the terminal JSON payload (or empty).
    fragment: String,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of bytes, publishing every progress event contained
    /// in the complete lines it closes, in arrival order.
    pub fn push<F>(&mut self, bytes: &[u8], publish: &mut F)
    where
        F: FnMut(ProgressEvent),
    {
        self.decode(bytes);

        while let Some(pos) = self.fragment.find('\n') {
            let line: String = self.fragment.drain(..=pos).collect();
            if let Line::Progress(event) = classify(line.trim_end_matches(['\n', '\r'])) {
                publish(event);
            }
        }
    }

    /// Consumes the buffer at end of stream and parses whatever text is left
    /// as the terminal JSON object. Best effort: a malformed or truncated
    /// tail yields the empty outcome, not an error.
    pub fn finish(mut self) -> EmbedOutcome {
        if !self.tail.is_empty() {
            let tail = std::mem::take(&mut self.tail);
            self.fragment.push_str(&String::from_utf8_lossy(&tail));
        }
        serde_json::from_str(self.fragment.trim()).unwrap_or_default()
    }

    /// Appends `bytes` to the undecoded tail and moves every complete UTF-8
    /// scalar into the text fragment. A multi-byte scalar split across
    /// chunks stays in the tail until its remaining bytes arrive; invalid
    /// sequences decode to U+FFFD so a corrupt byte cannot wedge the parse.
    fn decode(&mut self, bytes: &[u8]) {
        self.tail.extend_from_slice(bytes);

        loop {
            match std::str::from_utf8(&self.tail) {
                Ok(text) => {
                    self.fragment.push_str(text);
                    self.tail.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // Safe split: the first `valid` bytes are known UTF-8.
                    self.fragment
                        .push_str(std::str::from_utf8(&self.tail[..valid]).unwrap_or(""));
                    match err.error_len() {
                        None => {
                            // Incomplete scalar at the end; keep it for the
                            // next chunk.
                            self.tail.drain(..valid);
                            return;
                        }
                        Some(bad) => {
                            self.fragment.push('\u{FFFD}');
                            self.tail.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(chunks: &[&[u8]]) -> (Vec<ProgressEvent>, EmbedOutcome) {
        let mut buffer = StreamBuffer::new();
        let mut events = Vec::new();
        for chunk in chunks {
            buffer.push(chunk, &mut |e| events.push(e));
        }
        (events, buffer.finish())
    }

    #[test]
    fn publishes_events_in_order_with_terminal_result() {
        let (events, outcome) = collect(&[
            b"PROGRESS: 1/10\nPROGRESS: 5/10\nPROGRESS: 10/10\n{\"message\":\"done\"}",
        ]);
        assert_eq!(
            events,
            vec![
                ProgressEvent { completed: 1, total: 10 },
                ProgressEvent { completed: 5, total: 10 },
                ProgressEvent { completed: 10, total: 10 },
            ]
        );
        assert_eq!(outcome.message, "done");
    }

    #[test]
    fn chunking_does_not_change_published_events() {
        let input: &[u8] = b"noise\nPROGRESS: 1/3\nPROGRESS: embedding chunk 2/3 ok\nPROGRESS: 3/3\n{\"message\":\"Embedding complete\"}";
        let (whole, outcome_whole) = collect(&[input]);

        // Byte-at-a-time.
        let singles: Vec<&[u8]> = input.chunks(1).collect();
        let (one_by_one, outcome_single) = collect(&singles);
        assert_eq!(whole, one_by_one);
        assert_eq!(outcome_whole, outcome_single);

        // Every two-way split.
        for cut in 0..=input.len() {
            let (events, outcome) = collect(&[&input[..cut], &input[cut..]]);
            assert_eq!(events, whole, "split at byte {cut}");
            assert_eq!(outcome, outcome_whole, "split at byte {cut}");
        }
    }

    #[test]
    fn line_split_mid_keyword_yields_one_event() {
        let (events, _) = collect(&[b"PROGR", b"ESS: 3/10\n"]);
        assert_eq!(events, vec![ProgressEvent { completed: 3, total: 10 }]);
    }

    #[test]
    fn truncated_terminal_json_degrades_to_empty_outcome() {
        let (events, outcome) = collect(&[b"PROGRESS: 2/2\n{\"mess"]);
        assert_eq!(events.len(), 1);
        assert_eq!(outcome, EmbedOutcome::default());
    }

    #[test]
    fn stream_with_no_progress_lines() {
        let (events, outcome) = collect(&[b"{\"status\":\"error\",\"message\":\"No valid files found\"}"]);
        assert!(events.is_empty());
        assert_eq!(outcome.status.as_deref(), Some("error"));
        assert_eq!(outcome.message, "No valid files found");
    }

    #[test]
    fn empty_stream_yields_empty_outcome() {
        let (events, outcome) = collect(&[]);
        assert!(events.is_empty());
        assert_eq!(outcome, EmbedOutcome::default());
    }

    #[test]
    fn filler_lines_are_ignored_not_errors() {
        let (events, _) = collect(&[b"warming up\nPROGRESS: no counts here\nPROGRESS: 1/1\n"]);
        assert_eq!(events, vec![ProgressEvent { completed: 1, total: 1 }]);
    }

    #[test]
    fn multibyte_scalar_split_across_chunks() {
        let text = "PROGRESS: päivitys 4/9\n".as_bytes();
        // Split inside the two-byte "ä".
        let cut = text.iter().position(|&b| b > 0x7f).unwrap() + 1;
        let (events, _) = collect(&[&text[..cut], &text[cut..]]);
        assert_eq!(events, vec![ProgressEvent { completed: 4, total: 9 }]);
    }

    #[test]
    fn zero_over_zero_is_legal_and_renders_zero_percent() {
        let (events, _) = collect(&[b"PROGRESS: 0/0\n"]);
        assert_eq!(events, vec![ProgressEvent { completed: 0, total: 0 }]);
        assert_eq!(events[0].percent(), 0.0);
    }

    #[test]
    fn counts_beyond_total_pass_through_unclamped() {
        // The backend owns the invariant; the client reports what it saw.
        let (events, _) = collect(&[b"PROGRESS: 12/10\n"]);
        assert_eq!(events, vec![ProgressEvent { completed: 12, total: 10 }]);
        assert!(events[0].percent() > 100.0);
    }

    #[test]
    fn classify_requires_progress_prefix() {
        assert_eq!(classify("progress: 1/2"), Line::Filler);
        assert_eq!(
            classify("PROGRESS: embedding chunk 12/340"),
            Line::Progress(ProgressEvent { completed: 12, total: 340 })
        );
    }
}
