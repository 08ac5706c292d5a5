//! User-facing compile errors.
//!
//! Errors are collected per method by the kit assembler so one run can
//! report several independent problems; each carries the span needed to
//! point back into the source.

use std::fmt;
use std::ops::Range;

use ariadne::{Color, Label, Report, ReportKind};

use crate::trees::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// An operator with no defined lowering for the operand's type.
    InvalidOperation { message: String, span: Span },
    /// Assignment to a read-only or non-addressable target.
    NotAssignable { message: String, span: Span },
    /// `break`/`continue` with no valid enclosing construct.
    InvalidTransfer { message: String, span: Span },
    /// Switch case range too sparse for a jump table.
    SparseSwitch {
        cases: usize,
        min: i32,
        max: i32,
        span: Span,
    },
    /// A `goto` whose label does not exist in the method.
    UnresolvedLabel { label: String, span: Span },
    InvalidCast { from: String, to: String, span: Span },
}

impl CompileError {
    pub fn span(&self) -> Span {
        match self {
            CompileError::InvalidOperation { span, .. }
            | CompileError::NotAssignable { span, .. }
            | CompileError::InvalidTransfer { span, .. }
            | CompileError::SparseSwitch { span, .. }
            | CompileError::UnresolvedLabel { span, .. }
            | CompileError::InvalidCast { span, .. } => *span,
        }
    }

    pub fn message(&self) -> String {
        match self {
            CompileError::InvalidOperation { message, .. }
            | CompileError::NotAssignable { message, .. }
            | CompileError::InvalidTransfer { message, .. } => message.clone(),
            CompileError::SparseSwitch {
                cases, min, max, ..
            } => format!(
                "switch cases too sparse: only {} cases from {} to {}; use if/else",
                cases, min, max
            ),
            CompileError::UnresolvedLabel { label, .. } => {
                format!("unknown goto label: {}", label)
            }
            CompileError::InvalidCast { from, to, .. } => {
                format!("invalid cast: {} -> {}", from, to)
            }
        }
    }

    /// Builds a terminal report against the owning file.
    pub fn report<'a>(&self, path: &'a str) -> Report<'a, (&'a str, Range<usize>)> {
        let span = self.span();
        Report::build(ReportKind::Error, (path, span.start..span.end))
            .with_message(self.message())
            .with_label(
                Label::new((path, span.start..span.end))
                    .with_message("here")
                    .with_color(Color::Red),
            )
            .finish()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [line {}]", self.message(), self.span().line)
    }
}

impl std::error::Error for CompileError {}
