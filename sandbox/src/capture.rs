//! Byte-capped capture buffers for the step's stdout and stderr.

/// Capped text buffer. Writes past the cap truncate on a UTF-8 boundary and
/// report the overflow; the caller decides whether that is fatal (`print`)
/// or merely lossy (executor-side traceback writes).
#[derive(Debug)]
pub struct Capture {
    buf: String,
    cap: usize,
    overflowed: bool,
}

impl Capture {
    #[must_use]
    pub fn with_cap(cap: usize) -> Self {
        Self {
            buf: String::new(),
            cap,
            overflowed: false,
        }
    }

    /// Append text. Returns `false` when the cap was hit; the buffer keeps
    /// the prefix that fit.
    pub fn write(&mut self, text: &str) -> bool {
        if self.overflowed {
            return false;
        }
        let room = self.cap.saturating_sub(self.buf.len());
        if text.len() <= room {
            self.buf.push_str(text);
            return true;
        }
        let mut cut = room;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&text[..cut]);
        self.overflowed = true;
        false
    }

    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.buf
    }
}
