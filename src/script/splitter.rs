//! Line-by-line statement splitting.
//!
//! Feeds script lines through a small state machine that recognises comment
//! lines, `@DELIMITER` directives and delimiter-terminated statements.

use crate::error::{Result, ScriptError};
use regex::Regex;
use std::sync::OnceLock;

/// Delimiter used when none is configured.
pub const DEFAULT_DELIMITER: &str = ";";

/// Separator appended after every buffered line.
pub const LINE_SEPARATOR: &str = "\n";

fn delimiter_directive() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*((--)|(//))?\s*(//)?\s*@DELIMITER\s+(\S+)")
            .expect("delimiter directive pattern is valid")
    })
}

/// Splits raw script text into lines.
///
/// Only `\n` terminates a line, so a preceding `\r` stays part of the line.
/// A trailing empty segment after the final newline is dropped.
pub fn script_lines(script: &str) -> impl Iterator<Item = &str> {
    script.strip_suffix('\n').unwrap_or(script).split('\n')
}

/// Something the splitter recognised on a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitEvent {
    /// A comment line (trimmed), including delimiter directives.
    Comment(String),
    /// A complete statement, delimiter stripped and trimmed.
    Statement(String),
}

/// Statement-splitting state machine.
#[derive(Debug, Clone)]
pub struct StatementSplitter {
    delimiter: String,
    full_line_delimiter: bool,
    buffer: String,
}

impl StatementSplitter {
    /// Creates a splitter with the starting delimiter.
    pub fn new(delimiter: impl Into<String>, full_line_delimiter: bool) -> Self {
        Self {
            delimiter: delimiter.into(),
            full_line_delimiter,
            buffer: String::new(),
        }
    }

    /// The delimiter currently in effect.
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Text buffered for the statement being assembled.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feeds one line.
    pub fn push_line(&mut self, line: &str) -> Option<SplitEvent> {
        let trimmed = line.trim();

        if is_comment(trimmed) {
            if let Some(token) = delimiter_directive()
                .captures(trimmed)
                .and_then(|caps| caps.get(5))
            {
                self.delimiter = token.as_str().to_string();
            }
            return Some(SplitEvent::Comment(trimmed.to_string()));
        }

        if self.ready_to_execute(trimmed) {
            let end = line.rfind(self.delimiter.as_str()).unwrap_or(line.len());
            self.buffer.push_str(&line[..end]);
            self.buffer.push_str(LINE_SEPARATOR);
            let command = self.buffer.trim().to_string();
            self.buffer.clear();
            return Some(SplitEvent::Statement(command));
        }

        if !trimmed.is_empty() {
            self.buffer.push_str(line);
            self.buffer.push_str(LINE_SEPARATOR);
        }

        None
    }

    /// Ends the script. Fails if a statement is still waiting for its delimiter.
    pub fn finish(&self) -> Result<()> {
        let leftover = self.buffer.trim();
        if leftover.is_empty() {
            Ok(())
        } else {
            Err(ScriptError::terminator_missing(&self.delimiter, leftover))
        }
    }

    fn ready_to_execute(&self, trimmed: &str) -> bool {
        if self.full_line_delimiter {
            trimmed == self.delimiter
        } else {
            trimmed.contains(self.delimiter.as_str())
        }
    }
}

impl Default for StatementSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, false)
    }
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("--")
}
