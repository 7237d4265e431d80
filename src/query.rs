//! The pre-elaborated query tree.
//!
//! Produced by an external parser/elaborator (out of scope here) and treated as an opaque
//! algebraic value by the evaluator: already validated, aliased, and annotated with
//! result-name information.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cursor::{CursorRef, Env};
use crate::root::MappingRef;
use crate::term::Predicate;
use crate::types::{SchemaRef, Type};

use crate::error::PResult;

/// Field arguments, order-preserving since some backends echo them back into generated
/// query fragments.
pub type Args = IndexMap<String, Json>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// One `ORDER BY`-style key: a term to extract a sort key plus its direction.
#[derive(Clone, Debug)]
pub struct OrderSelection {
    pub term: Predicate,
    pub direction: OrderDirection,
}

/// Ordering applied during `run_list`'s filter/order/paginate pass; multiple keys are
/// applied left to right (the first is the primary sort key).
#[derive(Clone, Debug, Default)]
pub struct OrderBy(pub Vec<OrderSelection>);

/// The continuation function carried by `Component`/`Defer`: given the parent cursor and
/// the child query, produces the query to delegate (possibly splitting it into a `Group`
/// of parallel continuations). Reified as a cloneable, shared closure since `Query` itself
/// must be `Clone` (a query node may be revisited across completion rounds).
#[derive(Clone)]
pub struct Join(Arc<dyn Fn(&CursorRef, &Query) -> PResult<Query> + Send + Sync>);

impl Join {
    pub fn new(f: impl Fn(&CursorRef, &Query) -> PResult<Query> + Send + Sync + 'static) -> Self {
        Join(Arc::new(f))
    }

    pub fn call(&self, cursor: &CursorRef, query: &Query) -> PResult<Query> {
        (self.0)(cursor, query)
    }
}

impl fmt::Debug for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<join>")
    }
}

/// The elaborated query tree the evaluator walks.
#[derive(Clone, Debug)]
pub enum Query {
    /// A field selection, with its arguments and continuation.
    Select(String, Args, Box<Query>),
    /// Wraps `inner` to rewrite its result key, used when an alias differs from the field
    /// name.
    PossiblyRenamedSelect(Box<Query>, String),
    /// Rewrites the result key of `inner` unconditionally.
    Rename(String, Box<Query>),
    /// Emits `{fieldName: <child>}`.
    Wrap(String, Box<Query>),
    /// Concatenates sibling selections.
    Group(Vec<Query>),
    /// Asserts at most one element, then evaluates.
    Unique(Box<Query>),
    /// Polymorphic narrowing to a concrete object type.
    Narrow(String, Box<Query>),
    /// Delegates to the introspection schema interpreter.
    Introspect(SchemaRef, Box<Query>),
    /// Pushes environment bindings visible to predicate evaluation.
    Environment(Env, Box<Query>),
    /// Cardinality of a child field; the inner query must be a `Select`.
    Count(String, Box<Query>),
    /// Wraps a list query with an optional filter predicate, ordering, and offset/limit
    /// pagination.
    FilterOrderByOffsetLimit {
        pred: Option<Predicate>,
        order_by: Option<OrderBy>,
        offset: Option<usize>,
        limit: Option<usize>,
        child: Box<Query>,
    },
    /// Delegates `child` to another interpreter via `join`.
    Component {
        mapping: MappingRef,
        join: Join,
        child: Box<Query>,
    },
    /// Defers `child` to the same interpreter's next completion stage.
    Defer {
        join: Join,
        child: Box<Query>,
        root_tpe: Type,
    },
    /// No-op.
    Empty,
}

impl Query {
    pub fn select(field_name: impl Into<String>, args: Args, child: Query) -> Query {
        Query::Select(field_name.into(), args, Box::new(child))
    }

    pub fn wrap(field_name: impl Into<String>, child: Query) -> Query {
        Query::Wrap(field_name.into(), Box::new(child))
    }

    pub fn renamed(result_name: impl Into<String>, child: Query) -> Query {
        Query::PossiblyRenamedSelect(Box::new(child), result_name.into())
    }

    /// The result-facing name of this query node, if it has an identifiable root —
    /// the rule a `Component` join's continuation must satisfy (see design notes on "Join
    /// continuation has unexpected shape"): after stripping `Environment`/`Rename`
    /// wrappers, a query has an identifiable root name iff it is a `Wrap` or a
    /// `(PossiblyRenamed)Select`.
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Query::Environment(_, inner) => inner.root_name(),
            Query::Rename(name, _) => Some(name.as_str()),
            Query::Wrap(name, _) => Some(name.as_str()),
            Query::PossiblyRenamedSelect(_, name) => Some(name.as_str()),
            Query::Select(name, _, _) => Some(name.as_str()),
            _ => None,
        }
    }
}
