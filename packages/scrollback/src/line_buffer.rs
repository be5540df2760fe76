use std::collections::HashMap;

use crate::ansi::scrub_ansi;

/// Per-stream transformer from raw terminal byte chunks to clean display
/// lines.
///
/// Bytes accumulate per stream until a `\n` completes a line, so chunk
/// boundaries (including ones that split a multi-byte UTF-8 character) do
/// not affect the emitted line set. Each completed segment is cleaned:
/// a trailing `\r` (CRLF artifact) is dropped, carriage-return overwrites
/// collapse to the text after the last embedded `\r` (progress bars and
/// spinners redraw in place), and non-SGR control sequences are stripped.
///
/// The caller owns the idle-flush timer: whenever a partial remains after a
/// [`feed`](Self::feed), arm a debounce and call [`flush`](Self::flush) when
/// it fires. That flush is a responsiveness heuristic - a very slow writer
/// can have one logical line emitted as two events.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partials: HashMap<String, Vec<u8>>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk for `stream`, returning every line it completed.
    /// Empty lines are never returned.
    pub fn feed(&mut self, stream: &str, chunk: &[u8]) -> Vec<String> {
        let partial = self.partials.entry(stream.to_string()).or_default();
        partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            let segment: Vec<u8> = partial.drain(..=pos).collect();
            if let Some(line) = clean_segment(&segment[..segment.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Emit the pending partial for `stream` through the same cleanup
    /// pipeline, clearing it. Returns `None` when there is nothing to emit.
    pub fn flush(&mut self, stream: &str) -> Option<String> {
        let partial = self.partials.get_mut(stream)?;
        if partial.is_empty() {
            return None;
        }
        let segment = std::mem::take(partial);
        clean_segment(&segment)
    }

    /// Whether `stream` has unterminated text waiting for more input.
    pub fn has_partial(&self, stream: &str) -> bool {
        self.partials.get(stream).is_some_and(|p| !p.is_empty())
    }

    /// Drop all accumulated state.
    pub fn clear(&mut self) {
        self.partials.clear();
    }
}

/// Cleanup pipeline for one `\n`-terminated (or flushed) segment.
fn clean_segment(segment: &[u8]) -> Option<String> {
    let mut text = String::from_utf8_lossy(segment).into_owned();

    // CRLF artifact
    if text.ends_with('\r') {
        text.pop();
    }

    // Carriage-return overwrite: only the text after the last \r survives
    // the redraw.
    let visible = match text.rfind('\r') {
        Some(pos) => &text[pos + 1..],
        None => text.as_str(),
    };

    let cleaned = scrub_ansi(visible);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}
