//! Parser-origin error type and `ariadne`-backed diagnostic reporting.
//!
//! Every error in SynthCorona originates from the parser (see spec §7):
//! runtime faults like a `Divide` by a zero-length operand are the caller's
//! problem, not something this crate catches.

use ariadne::{Color, Label, Report, ReportKind, Source};
use std::fmt;
use std::path::PathBuf;

/// A single parse-time fault, carrying the source line and the parse
/// context active when it was raised (e.g. `"INS: bass"`).
#[derive(Debug, Clone)]
pub struct ScError {
    pub kind: ScErrorKind,
    pub line: usize,
    pub context: String,
    /// Import chain, innermost last, annotated as the error propagates
    /// upward through `IMP` directives.
    pub import_chain: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ScErrorKind {
    /// Unbalanced `[`, `{`, `(` grouping.
    ExpectedClose(char),
    /// Unbalanced meta tag: `<...` with no `>`.
    MissingMetaClose,
    /// `popModule` was asked to parse whitespace or an empty string.
    EmptyModule,
    /// Reference to an instrument name that doesn't exist.
    InvalidInstrument(String),
    /// Reference to a pitch/tone name that doesn't exist.
    InvalidPitch(String),
    /// Reference to a sequence name that doesn't exist.
    InvalidSequence(String),
    /// A sequence-line cell character that isn't space, `-`, or a known
    /// single-letter instrument name.
    UnrecognizedInstrumentCell(char),
    /// `Cross` was applied to an operator with no named A/B operands.
    InvalidCrossOperator,
    /// Any other malformed construct (bad CFG line, bad number, etc.)
    Malformed(String),
    /// The `.sc` file couldn't be opened.
    Io(String),
}

impl ScError {
    pub fn new(kind: ScErrorKind, line: usize, context: impl Into<String>) -> Self {
        ScError {
            kind,
            line,
            context: context.into(),
            import_chain: Vec::new(),
        }
    }

    /// Annotate with an import path as the error unwinds through `IMP`.
    pub fn with_import(mut self, path: PathBuf) -> Self {
        self.import_chain.push(path);
        self
    }

    pub fn message(&self) -> String {
        match &self.kind {
            ScErrorKind::ExpectedClose(c) => format!("Expected '{c}'."),
            ScErrorKind::MissingMetaClose => "Missing '>' in meta tag.".to_string(),
            ScErrorKind::EmptyModule => format!("Empty module at {}.", self.context),
            ScErrorKind::InvalidInstrument(name) => format!("Invalid inst: {name}"),
            ScErrorKind::InvalidPitch(name) => format!("Invalid Pitch: {name}"),
            ScErrorKind::InvalidSequence(name) => format!("Invalid Sequence: {name}"),
            ScErrorKind::UnrecognizedInstrumentCell(c) => {
                format!("Unrecognized Instrument in sequence line: {c}")
            }
            ScErrorKind::InvalidCrossOperator => "Invalid Operator for Cross module.".to_string(),
            ScErrorKind::Malformed(msg) => msg.clone(),
            ScErrorKind::Io(msg) => msg.clone(),
        }
    }

    /// Render this error as a human-facing diagnostic via `ariadne`, given
    /// the originating file's path and full text.
    pub fn report(&self, filename: &str, source: &str) -> String {
        let line_start = source
            .lines()
            .take(self.line.saturating_sub(1))
            .map(|l| l.len() + 1)
            .sum::<usize>();
        let line_len = source.lines().nth(self.line.saturating_sub(1)).map(|l| l.len()).unwrap_or(0);
        let span = line_start..(line_start + line_len.max(1));

        let mut buf = Vec::new();
        let build = Report::build(ReportKind::Error, (filename, span.clone()))
            .with_message(format!("{} (line {})", self.message(), self.line))
            .with_label(
                Label::new((filename, span))
                    .with_message(self.context.clone())
                    .with_color(Color::Red),
            )
            .finish();
        let _ = build.write((filename, Source::from(source)), &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl fmt::Display for ScError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Line: {}", self.message(), self.line)?;
        for p in self.import_chain.iter().rev() {
            write!(f, " (imported from {})", p.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for ScError {}
