//! Output buffering for the process panes.
//!
//! This module provides `OutputBuffer`, the bounded per-role line store together
//! with its scroll position, and the text sanitization applied to every captured
//! line before it is stored.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

/// A fixed-capacity ring buffer of output lines with a scroll offset.
///
/// The offset is the index of the first visible line. While `follow` is set the
/// offset tracks the bottom of the buffer as lines arrive.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    max_lines: usize,
    lines: VecDeque<String>,
    scroll: usize,
    follow: bool,
}

impl OutputBuffer {
    /// Creates a new `OutputBuffer` with the specified maximum capacity.
    pub fn new(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            max_lines,
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            scroll: 0,
            follow: true,
        }
    }

    /// Appends a line, keeping the pane pinned to the bottom if it was there.
    ///
    /// Returns `true` if an old line was dropped to make room.
    pub fn push(&mut self, line: String, view: usize) -> bool {
        let mut dropped = false;
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            dropped = true;
        }
        if self.follow {
            self.scroll = self.max_scroll(view);
        } else if dropped && self.scroll > 0 {
            // keep the reader on the same line after eviction
            self.scroll -= 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.scroll = 0;
        self.follow = true;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn is_following(&self) -> bool {
        self.follow
    }

    pub fn max_scroll(&self, view: usize) -> usize {
        self.lines.len().saturating_sub(view.max(1))
    }

    pub fn scroll_up(&mut self, amount: usize, view: usize) {
        let max_scroll = self.max_scroll(view);
        let current = self.current(view);
        self.scroll = current.saturating_sub(amount).min(max_scroll);
        self.follow = self.scroll == max_scroll;
    }

    pub fn scroll_down(&mut self, amount: usize, view: usize) {
        let max_scroll = self.max_scroll(view);
        let next = (self.current(view) + amount).min(max_scroll);
        self.scroll = next;
        self.follow = next == max_scroll;
    }

    pub fn scroll_to_top(&mut self, view: usize) {
        self.scroll = 0;
        self.follow = self.max_scroll(view) == 0;
    }

    pub fn scroll_to_bottom(&mut self, view: usize) {
        self.scroll = self.max_scroll(view);
        self.follow = true;
    }

    /// Re-applies the offset bounds after the view height changed.
    pub fn clamp(&mut self, view: usize) {
        let max_scroll = self.max_scroll(view);
        if self.follow {
            self.scroll = max_scroll;
        } else {
            self.scroll = self.scroll.min(max_scroll);
        }
    }

    /// The lines visible in a view of `view` rows.
    pub fn visible(&self, view: usize) -> impl Iterator<Item = &String> {
        let start = self.current(view);
        self.lines.iter().skip(start).take(view)
    }

    fn current(&self, view: usize) -> usize {
        let max_scroll = self.max_scroll(view);
        if self.follow {
            max_scroll
        } else {
            self.scroll.min(max_scroll)
        }
    }
}

/// Prepares a captured line for display: drops ANSI escape codes, keeps only the
/// last carriage-return segment and expands tabs.
pub fn sanitize_line(text: &str) -> String {
    let text = text.trim_end_matches('\r');
    let last = text.rsplit('\r').next().unwrap_or("");
    let expanded = last.replace('\t', "    ");
    let stripped = strip(expanded.as_bytes());
    String::from_utf8_lossy(&stripped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: usize, max: usize, view: usize) -> OutputBuffer {
        let mut buffer = OutputBuffer::new(max);
        for i in 0..count {
            buffer.push(format!("line {}", i), view);
        }
        buffer
    }

    #[test]
    fn buffer_keeps_only_most_recent_lines() {
        let mut buffer = OutputBuffer::new(3);
        for text in ["a", "b", "c", "d", "e"] {
            buffer.push(text.to_string(), 10);
        }
        assert_eq!(buffer.len(), 3);
        let lines = buffer.iter().cloned().collect::<Vec<_>>();
        assert_eq!(lines, vec!["c", "d", "e"]);
    }

    #[test]
    fn push_reports_drop() {
        let mut buffer = OutputBuffer::new(1);
        assert!(!buffer.push("x".into(), 1));
        assert!(buffer.push("y".into(), 1));
    }

    #[test]
    fn follow_tracks_bottom() {
        let buffer = filled(100, 2000, 20);
        assert!(buffer.is_following());
        assert_eq!(buffer.scroll(), 80);
    }

    #[test]
    fn page_up_from_bottom_moves_back_one_step() {
        let mut buffer = filled(100, 2000, 20);
        buffer.scroll_up(5, 20);
        assert_eq!(buffer.scroll(), 75);
        assert!(!buffer.is_following());
    }

    #[test]
    fn scroll_up_clamps_at_zero() {
        let mut buffer = filled(10, 2000, 4);
        buffer.scroll_up(50, 4);
        assert_eq!(buffer.scroll(), 0);
    }

    #[test]
    fn scroll_down_to_bottom_resumes_follow() {
        let mut buffer = filled(30, 2000, 10);
        buffer.scroll_up(5, 10);
        buffer.scroll_down(100, 10);
        assert_eq!(buffer.scroll(), 20);
        assert!(buffer.is_following());
    }

    #[test]
    fn manual_scroll_survives_new_output() {
        let mut buffer = filled(30, 2000, 10);
        buffer.scroll_up(5, 10);
        buffer.push("new".into(), 10);
        assert_eq!(buffer.scroll(), 15);
        let first = buffer.visible(10).next().cloned();
        assert_eq!(first.as_deref(), Some("line 15"));
    }

    #[test]
    fn eviction_keeps_reader_on_same_line() {
        let mut buffer = filled(10, 10, 4);
        buffer.scroll_up(3, 4);
        assert_eq!(buffer.scroll(), 3);
        buffer.push("overflow".into(), 4);
        assert_eq!(buffer.scroll(), 2);
        assert_eq!(buffer.visible(4).next().map(String::as_str), Some("line 3"));
    }

    #[test]
    fn clear_resets_offset() {
        let mut buffer = filled(30, 2000, 10);
        buffer.scroll_to_top(10);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.scroll(), 0);
        assert!(buffer.is_following());
    }

    #[test]
    fn clamp_after_resize() {
        let mut buffer = filled(30, 2000, 10);
        buffer.scroll_down(0, 10);
        buffer.scroll_up(2, 10);
        assert_eq!(buffer.scroll(), 18);
        buffer.clamp(25);
        assert_eq!(buffer.scroll(), 5);
    }

    #[test]
    fn sanitize_strips_ansi_and_carriage_returns() {
        assert_eq!(sanitize_line("\u{1b}[31mred\u{1b}[0m"), "red");
        assert_eq!(sanitize_line("10%\r50%\r100%"), "100%");
        assert_eq!(sanitize_line("a\tb"), "a    b");
        assert_eq!(sanitize_line("windows\r"), "windows");
    }
}
