use thiserror::Error;

/// Errors raised while turning source text into values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Input ended inside a list or after a quote.
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected ')' at offset {pos}")]
    UnexpectedClose { pos: usize },

    #[error("unterminated string starting at offset {pos}")]
    UnterminatedString { pos: usize },

    /// A `.` outside the second-to-last position of a list.
    #[error("misplaced '.' at offset {pos}")]
    MisplacedDot { pos: usize },

    /// Lists or quotes nested past the reader's limit.
    #[error("nesting too deep at offset {pos}")]
    TooDeep { pos: usize },

    #[error("integer literal '{text}' at offset {pos} does not fit in a fixnum")]
    FixnumOverflow { pos: usize, text: String },
}

/// Errors that can occur in the interpreter at the Rust level.
///
/// None of these terminate the process: the host decides whether the
/// session continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LispError {
    /// A symbol was evaluated with no binding in scope.
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),

    /// `setq` on a symbol that has no existing binding.
    #[error("setq of unbound symbol '{0}'")]
    UnboundAssignment(String),

    /// Application of something that is neither a primitive nor a closure.
    /// Carries the printed form of the offending value.
    #[error("cannot apply {0}")]
    BadApplication(String),

    #[error("wrong number of arguments: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// A collection could not free a single slot.
    #[error("out of memory: all {capacity} slots are live")]
    OutOfMemory { capacity: usize },

    /// Evaluation nested deeper than the configured limit.
    #[error("recursion depth limit of {0} exceeded")]
    DepthExceeded(usize),

    /// A special form with the wrong shape, e.g. `(quote)` or `(lambda (x))`.
    #[error("malformed {0} form")]
    MalformedForm(&'static str),

    /// A primitive received an argument of the wrong kind.
    #[error("type error: {0}")]
    TypeError(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("fixnum overflow in '{0}'")]
    FixnumOverflow(&'static str),

    #[error("read error: {0}")]
    Read(#[from] ReadError),

    /// Misuse of the heap API (should not happen in correct code).
    #[error("internal error: {0}")]
    Internal(String),
}

pub type LispResult<T> = Result<T, LispError>;
