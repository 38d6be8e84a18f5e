// File: src/errors.rs
//
// Error handling and reporting for the engine. Every error surfaced to the
// host carries a single source position and a human-readable message (see
// spec §7); this module also renders a pretty, source-quoting diagnostic in
// the same style the rest of the toolchain uses for its own eprintln output.

use crate::position::SourcePos;
use colored::Colorize;
use std::fmt;

/// The kinds of error the pipeline can raise (spec §7).
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    LexError,
    ParseError,
    SemanticError,
    CodegenError,
    RuntimeError,
    ActorCrash,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ErrorKind::LexError => "Lex Error",
            ErrorKind::ParseError => "Parse Error",
            ErrorKind::SemanticError => "Semantic Error",
            ErrorKind::CodegenError => "Codegen Error",
            ErrorKind::RuntimeError => "Runtime Error",
            ErrorKind::ActorCrash => "Actor Crash",
        };
        write!(f, "{}", s)
    }
}

/// A structured, positioned error. This is the single error type returned
/// from every stage of the pipeline (`evaluate`, `blocking_exec`, ...).
#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: SourcePos,
    pub source_line: Option<String>,
    pub call_stack: Vec<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: SourcePos) -> Self {
        EngineError {
            kind,
            message: message.into(),
            position,
            source_line: None,
            call_stack: Vec::new(),
        }
    }

    pub fn lex(message: impl Into<String>, position: SourcePos) -> Self {
        Self::new(ErrorKind::LexError, message, position)
    }

    pub fn parse(message: impl Into<String>, position: SourcePos) -> Self {
        Self::new(ErrorKind::ParseError, message, position)
    }

    pub fn semantic(message: impl Into<String>, position: SourcePos) -> Self {
        Self::new(ErrorKind::SemanticError, message, position)
    }

    pub fn codegen(message: impl Into<String>, position: SourcePos) -> Self {
        Self::new(ErrorKind::CodegenError, message, position)
    }

    pub fn runtime(message: impl Into<String>, position: SourcePos) -> Self {
        Self::new(ErrorKind::RuntimeError, message, position)
    }

    /// Re-tags a runtime error that escaped an actor's message handler.
    pub fn actor_crash(inner: EngineError) -> Self {
        EngineError { kind: ErrorKind::ActorCrash, ..inner }
    }

    pub fn with_source_line(mut self, line: impl Into<String>) -> Self {
        self.source_line = Some(line.into());
        self
    }

    pub fn with_call_stack(mut self, stack: Vec<String>) -> Self {
        self.call_stack = stack;
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: {}", self.kind.to_string().red().bold(), self.message.bold())?;
        writeln!(f, "{}", format!("  --> {}", self.position).bright_blue())?;

        if let Some(ref source) = self.source_line {
            let col = self.position.column;
            writeln!(f, "   {}", "|".bright_blue())?;
            writeln!(
                f,
                "{} {} {}",
                format!("{:3}", self.position.line).bright_blue(),
                "|".bright_blue(),
                source
            )?;
            writeln!(
                f,
                "   {} {}{}",
                "|".bright_blue(),
                " ".repeat(col.saturating_sub(1)),
                "^".red().bold()
            )?;
        }

        for frame in &self.call_stack {
            writeln!(f, "   {} at {}", "=".bright_cyan(), frame)?;
        }

        Ok(())
    }
}

impl std::error::Error for EngineError {}

/// Levenshtein distance between two strings, used for "did you mean?"
/// suggestions on unknown globals and unknown fields.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let s1: Vec<char> = s1.chars().collect();
    let s2: Vec<char> = s2.chars().collect();
    let (len1, len2) = (s1.len(), s2.len());

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0usize; len2 + 1]; len1 + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for i in 1..=len1 {
        for j in 1..=len2 {
            let cost = if s1[i - 1] == s2[j - 1] { 0 } else { 1 };
            matrix[i][j] = (matrix[i - 1][j] + 1)
                .min(matrix[i][j - 1] + 1)
                .min(matrix[i - 1][j - 1] + cost);
        }
    }

    matrix[len1][len2]
}

/// Finds the closest match within `distance <= 3`, preferring the nearest.
pub fn find_closest_match<'a>(target: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (c, levenshtein_distance(target, c)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c.as_str())
}
