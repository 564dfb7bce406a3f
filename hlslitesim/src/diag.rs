// diag.rs — Unified diagnostics model
//
// Shared diagnostic type for the IR front end (lex, parse, lower) and the
// post-instrumentation check. Runtime violations use `sim::SimError`.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// Lexer or parser rejected the input.
    pub const E0001: DiagCode = DiagCode("E0001");
    /// Reference to an undefined local value.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Branch or phi refers to an undefined block label.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Local value defined more than once.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Block label defined more than once.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Reference to an undefined metadata node.
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Function defined or declared more than once.
    pub const E0106: DiagCode = DiagCode("E0106");
    /// Function body has no blocks, or a block has no terminator.
    pub const E0107: DiagCode = DiagCode("E0107");
    /// Metadata node number defined more than once.
    pub const E0108: DiagCode = DiagCode("E0108");
    /// Instrumented function does not trace each block exactly once.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// Call to a function that is neither defined nor declared.
    pub const W0201: DiagCode = DiagCode("W0201");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by the IR front end.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message)
    }

    pub fn warning(span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render with a `line:col` prefix computed from `source`.
    pub fn render(&self, source: &str) -> String {
        let (line, col) = line_col(source, self.span.start());
        format!("{}:{}: {}", line, col, self)
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map(|i| offset - i).unwrap_or(offset + 1);
    (line, col)
}

pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span::new((), 0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::warning(dummy_span(), "call to unknown function '@f'")
            .with_code(codes::W0201)
            .with_hint("add a `declare` for it");
        assert_eq!(
            format!("{d}"),
            "warning[W0201]: call to unknown function '@f'\n  hint: add a `declare` for it"
        );
    }

    #[test]
    fn line_col_counts_from_one() {
        let src = "ab\ncd\nef";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 4), (2, 2));
        assert_eq!(line_col(src, 6), (3, 1));
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let w = Diagnostic::warning(dummy_span(), "w");
        assert!(!has_errors(&[w.clone()]));
        let e = Diagnostic::error(dummy_span(), "e");
        assert!(has_errors(&[w, e]));
    }
}
