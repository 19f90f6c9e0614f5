//! Newline framing over a raw byte stream.
//!
//! The framer buffers bytes until a `\n` shows up and hands back the text in
//! front of it. It never holds more than `max_line` bytes of an unfinished
//! line: past that the buffer is thrown away and everything up to the next
//! newline is skipped. Invalid UTF-8 also throws the buffer away; the next
//! newline realigns the stream.

const NEWLINE: u8 = b'\n';

/// What the framer made of the bytes it was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, trimmed, non-empty line without its terminator.
    Line(String),
    /// A complete line longer than the cap. Dropped.
    Oversized { len: usize },
    /// No newline within the cap. Buffer cleared.
    Overflow { buffered: usize },
    /// Bytes that are not UTF-8. Buffer cleared.
    Corrupt { discarded: usize },
}

#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_line: usize,
    /// Prefix of `buf` already known to be valid UTF-8.
    checked: usize,
    /// Skipping the rest of a line that overflowed.
    skipping: bool,
}

impl LineFramer {
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
            checked: 0,
            skipping: false,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed freshly read bytes, returning every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        let bytes = if self.skipping {
            match bytes.iter().position(|b| *b == NEWLINE) {
                Some(pos) => {
                    self.skipping = false;
                    &bytes[pos + 1..]
                }
                None => return frames,
            }
        } else {
            bytes
        };

        self.buf.extend_from_slice(bytes);

        if let Err(err) = std::str::from_utf8(&self.buf[self.checked..]) {
            // error_len() is None for a sequence cut off at the end of the
            // buffer; the rest of it is still in flight.
            match err.error_len() {
                Some(_) => {
                    frames.push(Frame::Corrupt {
                        discarded: self.buf.len(),
                    });
                    self.reset();
                    return frames;
                }
                None => self.checked += err.valid_up_to(),
            }
        } else {
            self.checked = self.buf.len();
        }

        while let Some(pos) = self.buf.iter().position(|b| *b == NEWLINE) {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.pop();
            self.checked = self.checked.saturating_sub(line.len() + 1);

            if line.len() > self.max_line {
                frames.push(Frame::Oversized { len: line.len() });
                continue;
            }

            // Only complete UTF-8 sequences can precede a newline byte.
            let text = String::from_utf8_lossy(&line);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                frames.push(Frame::Line(trimmed.to_string()));
            }
        }

        if self.buf.len() > self.max_line {
            frames.push(Frame::Overflow {
                buffered: self.buf.len(),
            });
            self.reset();
            self.skipping = true;
        }

        frames
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.checked = 0;
    }
}
