use std::path::PathBuf;
use thiserror::Error;

/// Hard evaluation failures. Everything here aborts the enclosing
/// evaluation; an ordinary `false` from a test function is not an error and
/// travels as [`Visit::False`] instead.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Raised by the `error()` built-in.
    #[error("{0}")]
    Aborted(String),

    #[error("circular inclusion of {}", .0.display())]
    CircularInclude(PathBuf),

    #[error("function call depth exceeds {0}")]
    RecursionLimit(usize),

    #[error("ever-loop ran for more than {0} iterations")]
    LoopLimit(usize),

    #[error("cannot write {}: {source}", .path.display())]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of visiting a block or statement. Control-flow signals travel
/// through the `Ok` side so `?` stays reserved for real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    True,
    False,
    /// `break()` — unwinds to the innermost loop.
    Break,
    /// `next()` — skips to the next loop iteration.
    Next,
    /// `return()` — unwinds to the enclosing function (or file).
    Returned,
}

impl Visit {
    pub fn is_true(self) -> bool {
        self == Visit::True
    }

    /// Collapse to a plain bool; control-flow signals count as true so the
    /// statement chain that produced them is not treated as failed.
    pub fn as_bool(self) -> bool {
        self != Visit::False
    }
}

pub type VisitResult = Result<Visit, EvalError>;
