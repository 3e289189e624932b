//! Turn-scoped buffer of tagged output lines.

use std::fmt;

/// One buffered message, rendered as `[tag] message`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub tag: String,
    pub message: String,
}

impl fmt::Display for OutputEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.tag, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    entries: Vec<OutputEntry>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tag: impl Into<String>, message: impl Into<String>) {
        self.entries.push(OutputEntry {
            tag: tag.into(),
            message: message.into(),
        });
    }

    /// Drain the buffer into newline-joined `[tag] message` lines
    ///
    /// The buffer is always empty afterwards, so flushing twice in a row
    /// yields an empty string the second time.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.entries)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn entries(&self) -> &[OutputEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
