//! Core query interpreter for a composite, multi-stage GraphQL execution engine.
//!
//! A single query may touch several independent backends (each an [`Interpreter`]). This
//! crate walks a pre-elaborated [`query::Query`] tree against a typed [`cursor::Cursor`],
//! producing a partially materialized [`proto_json::ProtoJson`] tree whose unresolved
//! subtrees are delegated to sibling interpreters, then iteratively completes those
//! subtrees until the tree is fully resolved.
//!
//! The parser, type-system elaborator, and per-backend cursor implementations are treated
//! as external collaborators; this crate only implements the evaluator, the completion
//! engine, and the predicate algebra used during list filtering.

pub mod complete;
pub mod config;
pub mod cursor;
pub mod error;
pub mod eval;
pub mod proto_json;
pub mod query;
pub mod response;
pub mod root;
pub mod term;
pub mod types;

pub use complete::{complete, complete_all};
pub use config::EngineConfig;
pub use cursor::{Cursor, Env};
pub use error::{EngineError, PResult, Problem};
pub use eval::{run_fields, run_list, run_value};
pub use proto_json::ProtoJson;
pub use query::Query;
pub use response::mk_response;
pub use root::{Interpreter, Mapping, run_root};
pub use term::{Predicate, Term};
pub use types::Type;

#[cfg(any(test, feature = "test-support"))]
pub mod testutil;
