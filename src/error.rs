//! Error types for compilation, encoding/decoding and schema loading.

use serde_json::Value;
use thiserror::Error;

/// Failures raised while resolving and compiling schema definitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Compile error: {name} is already defined")]
    DuplicateDefinition { name: String },

    #[error("Compile error: {name} is not defined")]
    UndefinedType { name: String },

    #[error("sizeof can't be used for unbounded type {name}")]
    UnboundedSizeof { name: String },

    #[error("{op}: {expected} arguments expected; {found} received")]
    Arity { op: String, expected: usize, found: usize },

    #[error("expression result length must be 1, got {len}")]
    ResultShape { len: usize },

    #[error("operator {op} does not exist")]
    UnknownOperator { op: String },

    #[error("{op} expects {expected}")]
    TypeError { op: String, expected: &'static str },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("{name} expects {expected} generic arguments; {found} received")]
    GenericArity { name: String, expected: usize, found: usize },

    #[error("{name} contains itself by value and can never be encoded")]
    RecursiveType { name: String },

    #[error("compilation nested deeper than {limit} blocks while compiling {name}")]
    RecursionLimit { name: String, limit: usize },

    #[error("unsupported string encoding {0:?}")]
    UnsupportedEncoding(String),

    #[error("cannot parse type {text:?}: {message}")]
    Syntax { text: String, message: String },
}

/// Failures raised by a compiled type's `encode` / `decode`.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unknown enum value {0}")]
    UnknownVariant(Value),

    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("missing field {0}")]
    MissingField(String),

    #[error("expected {expected} elements, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("{value} does not fit in {ty}")]
    OutOfRange { value: String, ty: &'static str },

    #[error("unexpected end of input: needed {needed} bytes at offset {offset}")]
    UnexpectedEof { needed: usize, offset: usize },

    #[error("encoded size {size} exceeds padded size {limit}")]
    PaddingOverflow { size: usize, limit: usize },

    #[error("invalid utf-8/utf-16 string data")]
    InvalidUtf8,

    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("constant mismatch: expected {expected}, got {found}")]
    ConstMismatch { expected: Value, found: Value },

    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),

    #[error("type slot {0} was never compiled")]
    Unresolved(usize),

    #[error("at {path}: {source}")]
    At { path: String, source: Box<CodecError> },
}

impl CodecError {
    /// Prefix the error location with one path segment (`key` or index).
    pub fn within(self, segment: impl std::fmt::Display) -> Self {
        match self {
            CodecError::At { path, source } => CodecError::At {
                path: format!("/{segment}{path}"),
                source,
            },
            other => CodecError::At {
                path: format!("/{segment}"),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with location wrappers removed.
    pub fn root_cause(&self) -> &CodecError {
        match self {
            CodecError::At { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Schema JSON that does not deserialize into definitions.
#[derive(Error, Debug)]
#[error("at JSON path {path} → {message}")]
pub struct LoadError {
    pub path: String,
    pub message: String,
}

pub type CompileResult<T> = std::result::Result<T, CompileError>;
pub type CodecResult<T> = std::result::Result<T, CodecError>;
