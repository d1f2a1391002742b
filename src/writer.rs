//! Frame accumulation and the atomic terminal flush.
//!
//! A frame is the complete multi-line snapshot of one tick. Flushing it
//! moves the cursor up over the erasable region of the previous frame,
//! erases to the end of the screen, and writes the new lines in one queued
//! burst, so concurrent counter updates can never interleave into the
//! output. Lines a frame marks as frozen are left behind: they are not
//! counted into the erasable region of the next flush.

use crossterm::cursor::MoveUp;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use std::io::{Result, Write};
use unicode_width::UnicodeWidthChar;

/// One tick's worth of output, split into physical lines.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    lines: Vec<String>,
    frozen: usize,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a bar's rendered output. Embedded newlines produce extra
    /// physical lines; every physical line is clipped to `width` columns
    /// so terminal wrapping can never skew the line accounting.
    pub(crate) fn push(&mut self, rendered: &str, width: usize) {
        for part in rendered.split('\n') {
            self.lines.push(clip(part, width));
        }
    }

    /// As [`push`](Self::push), but the lines stay on screen after this
    /// flush. Frozen lines must be pushed before any live line.
    pub(crate) fn push_frozen(&mut self, rendered: &str, width: usize) {
        let before = self.lines.len();
        self.push(rendered, width);
        self.frozen += self.lines.len() - before;
    }
}

pub(crate) struct FrameWriter<W: Write> {
    out: W,
    erasable: u16,
}

impl<W: Write> FrameWriter<W> {
    pub(crate) fn new(out: W) -> Self {
        FrameWriter { out, erasable: 0 }
    }

    /// Replace the previous frame's erasable region with `frame`.
    pub(crate) fn flush_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.erasable > 0 {
            self.out.queue(MoveUp(self.erasable))?;
            self.out.queue(Clear(ClearType::FromCursorDown))?;
        }
        for line in &frame.lines {
            self.out.queue(Print(line))?;
            self.out.queue(Print("\n"))?;
        }
        self.out.flush()?;

        let live = frame.lines.len().saturating_sub(frame.frozen);
        self.erasable = u16::try_from(live).unwrap_or(u16::MAX);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &W {
        &self.out
    }
}

/// Truncate to at most `width` display columns.
fn clip(s: &str, width: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out
}
