//! Append-only, capped log storage for one tab.
//!
//! The tail poller only ever appends; existing entries are never reordered
//! or rewritten under the reader, and render keys stay stable across trims.

use std::collections::VecDeque;

use k8s_openapi::serde_json;

/// Classified once at ingestion, never re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    Plain,
    Json,
}

/// A trimmed line that parses as a JSON object or array is `Json`; bare
/// scalars such as `42` stay `Plain`.
pub fn detect_format(line: &str) -> LineFormat {
    let trimmed = line.trim();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        LineFormat::Json
    } else {
        LineFormat::Plain
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Monotonic render key, assigned at ingestion and never reused. The
    /// array index shifts under trimming; this does not.
    pub sequence: u64,
    /// Verbatim line as fetched; no field extraction.
    pub raw_line: String,
    /// UI-local expansion flag for pretty-printed JSON entries.
    pub is_expanded: bool,
    pub format: LineFormat,
}

/// Follow mode for one tab. Ingestion never changes this; only an explicit
/// user scroll does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowState {
    Following,
    Paused,
}

impl FollowState {
    /// Scrolling away from the bottom pauses; scrolling back resumes.
    pub fn on_user_scroll(self, at_bottom: bool) -> FollowState {
        if at_bottom {
            FollowState::Following
        } else {
            FollowState::Paused
        }
    }
}

/// Bounded log storage. Sequences are 1-based and survive trimming.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
    cap: usize,
}

impl LogBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: 1,
            cap,
        }
    }

    /// Appends a chunk of raw lines, assigning sequences and classifying
    /// formats, then trims the oldest entries down to the cap.
    /// Returns how many entries were appended.
    pub fn append_lines<I>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut appended = 0;
        for raw_line in lines {
            let format = detect_format(&raw_line);
            self.entries.push_back(LogEntry {
                sequence: self.next_sequence,
                raw_line,
                is_expanded: false,
                format,
            });
            self.next_sequence += 1;
            appended += 1;
        }
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
        appended
    }

    /// Highest sequence handed out so far; the tail poller's chunk cursor.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.entries.front().map(|e| e.sequence)
    }

    /// Records the UI-local expansion flag on a retained entry.
    /// Returns false if the entry was already trimmed away.
    pub fn set_expanded(&mut self, sequence: u64, expanded: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.sequence == sequence) {
            Some(entry) => {
                entry.is_expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy in sequence order. Never mutates the buffer.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_trims_oldest_first() {
        let mut buffer = LogBuffer::new(5000);
        for i in 0..5001 {
            buffer.append_lines([format!("line {i}")]);
        }
        assert_eq!(buffer.len(), 5000);
        assert_eq!(buffer.first_sequence(), Some(2));
        assert_eq!(buffer.last_sequence(), 5001);
    }

    #[test]
    fn test_batch_append_respects_cap() {
        let mut buffer = LogBuffer::new(3);
        let appended = buffer.append_lines((0..10).map(|i| format!("line {i}")));
        assert_eq!(appended, 10);
        assert_eq!(buffer.len(), 3);
        let seqs: Vec<u64> = buffer.snapshot().iter().map(|e| e.sequence).collect();
        // The cap keeps the most recent sequences.
        assert_eq!(seqs, vec![8, 9, 10]);
    }

    #[test]
    fn test_sequences_are_never_reused() {
        let mut buffer = LogBuffer::new(2);
        buffer.append_lines(["a".to_string(), "b".to_string(), "c".to_string()]);
        buffer.append_lines(["d".to_string()]);
        let seqs: Vec<u64> = buffer.snapshot().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[test]
    fn test_snapshot_is_ordered_and_non_mutating() {
        let mut buffer = LogBuffer::new(100);
        buffer.append_lines(["a".to_string(), "b".to_string()]);
        let first = buffer.snapshot();
        let second = buffer.snapshot();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_format_detected_once_at_ingestion() {
        let mut buffer = LogBuffer::new(10);
        buffer.append_lines([
            r#"{"level":"info","msg":"started"}"#.to_string(),
            r#"  ["a", 1]  "#.to_string(),
            "plain text line".to_string(),
            "42".to_string(),
            r#"{"truncated": "#.to_string(),
        ]);
        let formats: Vec<LineFormat> = buffer.snapshot().iter().map(|e| e.format).collect();
        assert_eq!(
            formats,
            vec![
                LineFormat::Json,
                LineFormat::Json,
                LineFormat::Plain,
                LineFormat::Plain,
                LineFormat::Plain,
            ]
        );
    }

    #[test]
    fn test_set_expanded_on_trimmed_entry_fails() {
        let mut buffer = LogBuffer::new(2);
        buffer.append_lines(["a".to_string(), "b".to_string(), "c".to_string()]);
        assert!(!buffer.set_expanded(1, true));
        assert!(buffer.set_expanded(3, true));
        let snap = buffer.snapshot();
        assert!(snap.iter().find(|e| e.sequence == 3).unwrap().is_expanded);
    }

    #[test]
    fn test_follow_transitions() {
        let state = FollowState::Following;
        // Appends never pause; only an explicit scroll away does.
        let state = state.on_user_scroll(false);
        assert_eq!(state, FollowState::Paused);
        let state = state.on_user_scroll(false);
        assert_eq!(state, FollowState::Paused);
        let state = state.on_user_scroll(true);
        assert_eq!(state, FollowState::Following);
    }
}
