//! Diagnostics and the accumulating result type used throughout the evaluator.
//!
//! All execution errors contain the source position in the query of the field that failed
//! to resolve, together with the field path. Unlike a plain `Result`, [`PResult`] can carry
//! *both* a value and accumulated problems at once (`PResult::Both`), mirroring the
//! `Ior`-with-accumulation semantics a field-level GraphQL executor needs: one field's
//! failure must not discard its siblings' successfully-resolved values.

use std::fmt;

/// A single source location, `(line, column)`, both 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// A structured, user-facing error produced during evaluation or completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    pub message: String,
    pub locations: Vec<Location>,
    pub path: Vec<String>,
}

impl Problem {
    pub fn new(message: impl Into<String>) -> Self {
        Problem {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    pub fn push_path_segment(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.path.is_empty() {
            write!(f, " (at {})", self.path.join("."))?;
        }
        Ok(())
    }
}

impl From<EngineError> for Problem {
    fn from(e: EngineError) -> Self {
        Problem::new(e.to_string())
    }
}

/// The closed set of failure kinds the evaluator itself can raise.
///
/// Backend-specific failures (cursor access errors, mapping lookup failures) are opaque to
/// this crate and arrive pre-wrapped as [`Problem`]s; this enum only covers shape, schema
/// lookup, cardinality, narrowing, and predicate failures the evaluator detects itself.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Mismatched query and cursor type in {phase}")]
    MismatchedType { phase: &'static str },

    #[error("Stuck at type {tpe} for {query}")]
    StuckAtType { tpe: String, query: String },

    #[error("Bad root query")]
    BadRootQuery,

    #[error("Join continuation has unexpected shape")]
    BadJoinShape,

    #[error("Type {tpe} has no field '{field}'")]
    NoSuchField { tpe: String, field: String },

    #[error("Root type {tpe} has no field '{field}'")]
    NoSuchRootField { tpe: String, field: String },

    #[error("No match")]
    NoMatch,

    #[error("Multiple matches")]
    MultipleMatches,

    #[error("'__typename' cannot be applied to non-selectable type {tpe}")]
    TypenameNotSelectable { tpe: String },

    #[error("Expected exactly one element for path {path:?}")]
    NotUnique { path: Vec<String> },

    #[error("Completion did not converge after {rounds} rounds")]
    CompletionDidNotConverge { rounds: usize },
}

/// An accumulating result: errors only, a value only, or both at once.
///
/// `Both` arises when an operation produced a usable value but some part of the
/// computation (e.g. one element of a list) also raised a problem; the caller decides
/// whether to keep propagating the value or to treat the chain as fatal.
#[derive(Clone, Debug)]
pub enum PResult<A> {
    Errs(Vec<Problem>),
    Value(A),
    Both(Vec<Problem>, A),
}

impl<A> PResult<A> {
    pub fn ok(value: A) -> Self {
        PResult::Value(value)
    }

    pub fn err(problem: Problem) -> Self {
        PResult::Errs(vec![problem])
    }

    pub fn errs(problems: Vec<Problem>) -> Self {
        PResult::Errs(problems)
    }

    pub fn is_err(&self) -> bool {
        matches!(self, PResult::Errs(_))
    }

    /// The accumulated problems, if any, regardless of whether a value is also present.
    pub fn problems(&self) -> &[Problem] {
        match self {
            PResult::Errs(p) | PResult::Both(p, _) => p,
            PResult::Value(_) => &[],
        }
    }

    /// Splits into `(problems, Option<value>)`, the shape the completion engine and
    /// `mk_response` both want.
    pub fn into_parts(self) -> (Vec<Problem>, Option<A>) {
        match self {
            PResult::Errs(p) => (p, None),
            PResult::Value(v) => (Vec::new(), Some(v)),
            PResult::Both(p, v) => (p, Some(v)),
        }
    }

    pub fn value(&self) -> Option<&A> {
        match self {
            PResult::Value(v) | PResult::Both(_, v) => Some(v),
            PResult::Errs(_) => None,
        }
    }

    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> PResult<B> {
        match self {
            PResult::Errs(p) => PResult::Errs(p),
            PResult::Value(v) => PResult::Value(f(v)),
            PResult::Both(p, v) => PResult::Both(p, f(v)),
        }
    }

    /// Monadic bind. If `self` is `Both`, the accumulated problems are preserved and
    /// merged with whatever `f` itself produces.
    pub fn and_then<B>(self, f: impl FnOnce(A) -> PResult<B>) -> PResult<B> {
        match self {
            PResult::Errs(p) => PResult::Errs(p),
            PResult::Value(v) => f(v),
            PResult::Both(mut p, v) => match f(v) {
                PResult::Errs(p2) => {
                    p.extend(p2);
                    PResult::Errs(p)
                }
                PResult::Value(v2) => PResult::Both(p, v2),
                PResult::Both(p2, v2) => {
                    p.extend(p2);
                    PResult::Both(p, v2)
                }
            },
        }
    }

    /// Appends extra problems without discarding a present value, used when a sub-step
    /// fails but the evaluator still wants to produce a best-effort `null`.
    pub fn with_extra_problems(self, extra: Vec<Problem>) -> Self {
        if extra.is_empty() {
            return self;
        }
        match self {
            PResult::Errs(mut p) => {
                p.extend(extra);
                PResult::Errs(p)
            }
            PResult::Value(v) => PResult::Both(extra, v),
            PResult::Both(mut p, v) => {
                p.extend(extra);
                PResult::Both(p, v)
            }
        }
    }
}

impl<A> From<Result<A, Problem>> for PResult<A> {
    fn from(r: Result<A, Problem>) -> Self {
        match r {
            Ok(v) => PResult::Value(v),
            Err(e) => PResult::Errs(vec![e]),
        }
    }
}

/// Collects a `Vec<PResult<A>>` into a single `PResult<Vec<A>>`, accumulating every
/// problem across all elements. A pure `Errs` element contributes its problems but no value,
/// rather than aborting the whole collection; used by [`crate::eval::run_fields`]'s `Group`
/// arm, where every sibling selection is independent and one sibling's error should not
/// suppress the others' values.
pub fn collect_accumulating<A>(items: Vec<PResult<A>>) -> PResult<Vec<A>> {
    let mut problems = Vec::new();
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item {
            PResult::Errs(p) => problems.extend(p),
            PResult::Value(v) => values.push(v),
            PResult::Both(p, v) => {
                problems.extend(p);
                values.push(v);
            }
        }
    }
    if problems.is_empty() {
        PResult::Value(values)
    } else {
        PResult::Both(problems, values)
    }
}
