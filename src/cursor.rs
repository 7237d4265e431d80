//! The `Cursor` contract: an opaque, immutable navigator over a backend's data.
//!
//! A cursor always carries its own GraphQL [`Type`]; the evaluator never guesses a type
//! from the shape of the underlying data. Concrete backends (SQL row cursors, HTTP
//! response cursors, in-memory fixtures) implement this trait; the evaluator only ever
//! holds it behind [`CursorRef`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::error::PResult;
use crate::types::Type;

/// Append-only environment bindings visible to predicate evaluation. `Environment(env,
/// child)` query nodes push bindings that later `UniquePath`/`ListPath` terms may read
/// back out through the cursor they're evaluated against.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Env(IndexMap<String, Json>);

impl Env {
    pub fn empty() -> Self {
        Env(IndexMap::new())
    }

    /// Returns a new, extended environment; the receiver is left untouched, matching the
    /// "append-only" lifecycle described for `Env`.
    pub fn bind(&self, bindings: impl IntoIterator<Item = (String, Json)>) -> Env {
        let mut next = self.0.clone();
        for (k, v) in bindings {
            next.insert(k, v);
        }
        Env(next)
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Json)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A handle to a cursor, shared because the same cursor position may be referenced from
/// several points in the query tree (e.g. a `Defer` continuation closing over it).
pub type CursorRef = Arc<dyn Cursor>;

/// The capability set an evaluator needs from a backend-specific data navigator.
pub trait Cursor: fmt::Debug + Send + Sync {
    /// The GraphQL type this cursor is currently positioned at.
    fn tpe(&self) -> &Type;

    fn is_leaf(&self) -> bool {
        self.tpe().is_leaf()
    }

    fn is_nullable(&self) -> bool {
        self.tpe().is_nullable()
    }

    fn is_list(&self) -> bool {
        self.tpe().is_list()
    }

    /// Materializes a leaf (scalar/enum) cursor to its JSON value.
    fn as_leaf(&self) -> PResult<Json>;

    /// For a nullable cursor, `None` if the underlying value is absent, else the
    /// unwrapped, non-nullable cursor.
    fn as_nullable(&self) -> PResult<Option<CursorRef>>;

    /// Iterates a list cursor's elements.
    fn as_list(&self) -> PResult<Vec<CursorRef>>;

    /// Navigates to a named field. `alias` is informational only (used by some backends
    /// for logging/tracing); the returned cursor is always typed at the field's declared
    /// type, not the alias.
    fn field(&self, name: &str, alias: Option<&str>) -> PResult<CursorRef>;

    /// Whether this cursor's underlying concrete value narrows to the named object type.
    fn narrows_to(&self, type_name: &str) -> bool;

    /// Narrows this cursor to the named concrete object type. Callers must check
    /// `narrows_to` first; narrowing to a type that doesn't match is a logic error in the
    /// evaluator, not a recoverable `Problem`.
    fn narrow(&self, type_name: &str) -> PResult<CursorRef>;

    /// Resolves a dotted field path to the single leaf cursor it designates, for
    /// `Term::UniquePath`. Returns however many leaves the path actually reaches; the term
    /// evaluator is responsible for erroring out if that count isn't exactly one.
    fn list_path(&self, path: &[String]) -> PResult<Vec<CursorRef>>;

    /// As `list_path`, but intended for paths that cross a list boundary and should be
    /// flattened rather than treated as an arity error (`Term::ListPath`).
    fn flat_list_path(&self, path: &[String]) -> PResult<Vec<CursorRef>>;

    /// Returns an equivalent cursor with the given environment bindings visible to
    /// subsequent predicate evaluation.
    fn with_env(&self, env: Env) -> CursorRef;

    /// The full environment visible at this cursor, propagated into `Staged` placeholders
    /// so a later interpreter invocation sees the same bindings.
    fn full_env(&self) -> Env;

    /// Prepares this cursor for `Unique` evaluation: typically a no-op, but backends that
    /// represent "at most one" differently from "exactly one" get a hook to normalize
    /// before `as_list` is called.
    fn preunique(&self) -> PResult<CursorRef> {
        ok(self.clone_ref())
    }

    /// Trait objects can't derive `Clone`; backends hand back a fresh `Arc` over
    /// themselves. A blanket impl isn't possible without `Sized`, so every cursor
    /// implements this explicitly (usually `Arc::new(self.clone())` from the impl block).
    fn clone_ref(&self) -> CursorRef;
}

/// Helper used by `preunique`'s default and elsewhere: lift a `Result<T, Problem>`-style
/// fallible value into `PResult`.
pub(crate) fn ok<T>(v: T) -> PResult<T> {
    PResult::Value(v)
}
