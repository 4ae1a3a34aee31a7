use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Every failure the toolchain knows how to name.
///
/// Some of these are only ever reported as [`Diagnostic`]s (stack simulation
/// problems, hash mismatches, unresolved labels in lenient mode); the rest
/// abort the current file.
#[derive(Debug, Error)]
pub enum Ed9Error {
    #[error("not a #scp script (magic {0:02X?})")]
    NotAScript([u8; 4]),

    #[error("truncated section: {what} at 0x{offset:X} needs {needed} bytes, file has {len}")]
    TruncatedSection {
        what: &'static str,
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("bad tagged word 0x{0:08X}")]
    BadTagWord(u64),

    #[error("invalid UTF-8 in string pool at 0x{0:X}")]
    BadEncoding(usize),

    #[error("hash mismatch for function {name}: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    HashMismatch {
        name: String,
        stored: u32,
        computed: u32,
    },

    #[error("stack underflow at 0x{0:X}")]
    StackUnderflow(u32),

    #[error("stack index {index} out of range at 0x{addr:X} (depth {depth})")]
    StackIndexOutOfRange { addr: u32, index: i32, depth: usize },

    #[error("duplicate label {0}")]
    DuplicateLabel(String),

    #[error("unresolved label {0}")]
    UnresolvedLabel(String),

    #[error("unknown command {0}")]
    UnknownCommand(String),

    #[error("emitted script does not parse back: {0}")]
    EmittedInvalid(String),

    #[error("function {0} already has a body")]
    FunctionAlreadyEmitted(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("no current function; call set_current_function first")]
    NoCurrentFunction,

    #[error("syntax error at line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("bad argument for {call}: {reason}")]
    BadArgument { call: String, reason: String },

    #[error("patch at 0x{offset:X} is outside the written range (len 0x{len:X})")]
    OutOfRange { offset: usize, len: usize },

    #[error("layout overflow: {0}")]
    LayoutOverflow(String),

    #[error("{len} byte(s) at 0x{offset:X} after the function body are never decoded")]
    UndecodedBytes { offset: usize, len: usize },

    #[error("call at 0x{0:X}: return-address slot is not an undefined PUSH")]
    UnrecognizedCall(u32),

    #[error("bad command table: {0}")]
    CommandTable(#[from] serde_yaml::Error),

    #[error("bad string map: {0}")]
    StringMap(#[from] serde_json::Error),

    #[error("bad pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("bad XLIFF document: {0}")]
    Xliff(String),

    #[error("decrypt hook failed: {0}")]
    Decrypt(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Ed9Error>;

/// Where in a file an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Offset(u64),
    Line(usize),
    Unknown,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Offset(off) => write!(f, "0x{:X}", off),
            Position::Line(line) => write!(f, "line {}", line),
            Position::Unknown => write!(f, "?"),
        }
    }
}

/// An [`Ed9Error`] tied to the file it came from.
#[derive(Debug, Error)]
#[error("{}: {at}: {source}", .path.display())]
pub struct Located {
    pub path: PathBuf,
    pub at: Position,
    #[source]
    pub source: Ed9Error,
}

impl Located {
    pub fn new(path: impl Into<PathBuf>, at: Position, source: Ed9Error) -> Self {
        Self {
            path: path.into(),
            at,
            source,
        }
    }
}

impl Ed9Error {
    /// The position carried by the error itself, if it has one.
    pub fn position(&self) -> Position {
        match self {
            Ed9Error::Syntax { line, .. } => Position::Line(*line),
            Ed9Error::TruncatedSection { offset, .. }
            | Ed9Error::OutOfRange { offset, .. }
            | Ed9Error::UndecodedBytes { offset, .. } => {
                Position::Offset(*offset as u64)
            }
            Ed9Error::BadEncoding(offset) => Position::Offset(*offset as u64),
            Ed9Error::StackUnderflow(addr) | Ed9Error::UnrecognizedCall(addr) => {
                Position::Offset(*addr as u64)
            }
            _ => Position::Unknown,
        }
    }

    /// Short category used in batch logs.
    pub fn category(&self) -> &'static str {
        match self {
            Ed9Error::NotAScript(_) => "NotAScript",
            Ed9Error::TruncatedSection { .. } => "TruncatedSection",
            Ed9Error::UnknownOpcode(_) => "UnknownOpcode",
            Ed9Error::BadTagWord(_) => "BadTagWord",
            Ed9Error::BadEncoding(_) => "BadEncoding",
            Ed9Error::HashMismatch { .. } => "HashMismatch",
            Ed9Error::StackUnderflow(_) => "StackUnderflow",
            Ed9Error::StackIndexOutOfRange { .. } => "StackIndexOutOfRange",
            Ed9Error::DuplicateLabel(_) => "DuplicateLabel",
            Ed9Error::UnresolvedLabel(_) => "UnresolvedLabel",
            Ed9Error::UnknownCommand(_) => "UnknownCommand",
            Ed9Error::EmittedInvalid(_) => "EmittedInvalid",
            Ed9Error::FunctionAlreadyEmitted(_) => "FunctionAlreadyEmitted",
            Ed9Error::UnknownFunction(_) => "UnknownFunction",
            Ed9Error::NoCurrentFunction => "NoCurrentFunction",
            Ed9Error::Syntax { .. } => "Syntax",
            Ed9Error::BadArgument { .. } => "BadArgument",
            Ed9Error::OutOfRange { .. } => "OutOfRange",
            Ed9Error::LayoutOverflow(_) => "LayoutOverflow",
            Ed9Error::UndecodedBytes { .. } => "UndecodedBytes",
            Ed9Error::UnrecognizedCall(_) => "UnrecognizedCall",
            Ed9Error::CommandTable(_) => "CommandTable",
            Ed9Error::StringMap(_) => "StringMap",
            Ed9Error::Pattern(_) => "Pattern",
            Ed9Error::Xliff(_) => "Xliff",
            Ed9Error::Decrypt(_) => "Decrypt",
            Ed9Error::IoFailure(_) => "IOFailure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A non-fatal problem recorded while processing one file.
#[derive(Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub at: Position,
    pub error: Ed9Error,
}

impl Diagnostic {
    pub fn warning(at: Position, error: Ed9Error) -> Self {
        Self {
            severity: Severity::Warning,
            at,
            error,
        }
    }

    pub fn error(at: Position, error: Ed9Error) -> Self {
        Self {
            severity: Severity::Error,
            at,
            error,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", sev, self.at, self.error)
    }
}

/// Accumulates diagnostics for one file and mirrors them to the log.
#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, at: Position, error: Ed9Error) {
        log::warn!("{}: {}", at, error);
        self.items.push(Diagnostic::warning(at, error));
    }

    pub fn error(&mut self, at: Position, error: Ed9Error) {
        log::error!("{}: {}", at, error);
        self.items.push(Diagnostic::error(at, error));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
