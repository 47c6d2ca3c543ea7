//! Stage-tagged error collection
//!
//! Every pipeline stage appends to a shared `Diagnostics` sink instead of
//! failing on the first problem it finds, so a single compiler invocation
//! can report every lexical/parse/semantic/codegen error it can find (see
//! spec.md invariant 6) up to a bounded limit.

use std::fmt;
use std::path::PathBuf;

pub const MAX_DIAGNOSTICS: usize = 100;

/// Two-letter family + stage digit, e.g. `EC04`, `EP02`, `EF01`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid character, unterminated string, malformed number.
    Lexical,
    /// Unexpected token, unclosed brace, missing separator.
    Parse,
    /// Undefined symbol, duplicate decl, type mismatch, non-exhaustive match, etc.
    Semantic,
    /// Internal inconsistency during lowering / register allocation / assembly.
    Compilation,
    /// Source not found, permission denied, disk-full on write.
    Io,
}

impl ErrorCode {
    pub fn code(&self, stage: u8) -> String {
        let family = match self {
            ErrorCode::Lexical => "EL",
            ErrorCode::Parse => "EP",
            ErrorCode::Semantic => "ES",
            ErrorCode::Compilation => "EC",
            ErrorCode::Io => "EF",
        };
        format!("{family}{stage:02}")
    }

    /// Process exit code per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::Lexical | ErrorCode::Parse => 1,
            ErrorCode::Semantic => 2,
            ErrorCode::Compilation => 3,
            ErrorCode::Io => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn new(file: PathBuf, line: usize, col: usize) -> Self {
        Location { file, line, col }
    }

    pub fn synthetic() -> Self {
        Location {
            file: PathBuf::from("<generated>"),
            line: 0,
            col: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.col)
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub stage: u8,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ERROR {} at {}: {}",
            self.code.code(self.stage),
            self.location,
            self.message
        )?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  Hint: {hint}")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics across a whole compilation, bounded so a
/// pathological input cannot produce unbounded output.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
    truncated: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn push(&mut self, code: ErrorCode, stage: u8, location: Location, message: impl Into<String>) {
        self.push_with_hint(code, stage, location, message, None)
    }

    pub fn push_with_hint(
        &mut self,
        code: ErrorCode,
        stage: u8,
        location: Location,
        message: impl Into<String>,
        hint: Option<String>,
    ) {
        if self.truncated {
            return;
        }
        if self.items.len() >= MAX_DIAGNOSTICS {
            self.truncated = true;
            self.items.push(Diagnostic {
                code: ErrorCode::Compilation,
                stage,
                location: Location::synthetic(),
                message: "max errors exceeded".to_string(),
                hint: None,
            });
            return;
        }
        self.items.push(Diagnostic {
            code,
            stage,
            location,
            message: message.into(),
            hint,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Highest-severity exit code among everything collected; 0 if empty.
    pub fn exit_code(&self) -> i32 {
        self.items.iter().map(|d| d.code.exit_code()).max().unwrap_or(0)
    }

    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
