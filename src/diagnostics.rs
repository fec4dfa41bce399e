//! Diagnostic rendering.
//!
//! Every diagnostic prints as
//!
//! ```text
//! Error: <file>(<line>,<col>): <message>
//! <offending source line>
//!        ^
//! ```
//!
//! with the column marked by a caret, or a dash run when the span covers a
//! range within one line. The source file is read on demand for the
//! excerpt; if reading fails the excerpt is silently omitted.

use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::span::Span;

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(path: impl Into<PathBuf>, span: Span, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            span,
            message: message.into(),
        }
    }

    /// Render the diagnostic, including the source excerpt when the file
    /// can be read and the span carries a position.
    pub fn render(&self) -> String {
        let mut text = String::new();
        let _ = writeln!(
            text,
            "Error: {}({},{}): {}",
            self.path.display(),
            self.span.start_line,
            self.span.start_column,
            self.message
        );
        if let Some(excerpt) = self.excerpt() {
            text.push_str(&excerpt);
        }
        text
    }

    fn excerpt(&self) -> Option<String> {
        if self.span.is_unknown() {
            return None;
        }
        let source = fs::read_to_string(&self.path).ok()?;
        let line = source.lines().nth(self.span.start_line - 1)?;

        let mut text = String::new();
        let _ = writeln!(text, "{}", line);

        let start = self.span.start_column.max(1);
        let end = if self.span.end_line == self.span.start_line {
            self.span.end_column.max(start)
        } else {
            line.chars().count() + 1
        };
        for _ in 1..start {
            text.push(' ');
        }
        if end - start <= 1 {
            text.push('^');
        } else {
            for _ in start..end {
                text.push('-');
            }
        }
        text.push('\n');
        Some(text)
    }

    /// Print to the standard error stream.
    pub fn report(&self) {
        let _ = std::io::stderr().write_all(self.render().as_bytes());
    }
}

/// Convenience used by the error helpers.
pub fn report(path: &Path, span: Span, message: &str) {
    Diagnostic::new(path, span, message).report();
}
