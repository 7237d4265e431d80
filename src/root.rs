//! The interpreter/mapping contract and the multi-root driver.
//!
//! `Interpreter` is what a backend exposes to the completion engine; `Mapping` is what a
//! backend exposes to bootstrap a root query into a cursor. `run_root` is the entry point a
//! host calls once per request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::config::EngineConfig;
use crate::cursor::{CursorRef, Env};
use crate::error::{EngineError, PResult, Problem};
use crate::eval::run_value;
use crate::proto_json::ProtoJson;
use crate::query::Query;
use crate::types::{Schema, Type};

/// A backend's entry point for the completion engine: resolve one root query, or a batch
/// of them gathered from across a partially-completed tree.
#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn run_root_value(&self, query: Query, root_tpe: Type, env: Env) -> PResult<ProtoJson>;

    /// Batched entry point the completion engine calls once per owning interpreter per
    /// round. The default traverses sequentially; backends that can coalesce the batch
    /// into a single underlying request (e.g. one SQL query instead of N) should override
    /// it. Results are positionally aligned to `queries`.
    async fn run_root_values(&self, queries: Vec<(Query, Type, Env)>) -> (Vec<Problem>, Vec<ProtoJson>) {
        let mut problems = Vec::new();
        let mut values = Vec::with_capacity(queries.len());
        for (query, root_tpe, env) in queries {
            match self.run_root_value(query, root_tpe, env).await {
                PResult::Value(v) => values.push(v),
                PResult::Both(p, v) => {
                    problems.extend(p);
                    values.push(v);
                }
                PResult::Errs(p) => {
                    problems.extend(p);
                    values.push(ProtoJson::null());
                }
            }
        }
        (problems, values)
    }
}

pub type InterpreterRef = Arc<dyn Interpreter>;

/// A backend adapter exposing a root cursor for top-level field selections, plus the
/// interpreter that resolves everything delegated to it.
#[async_trait]
pub trait Mapping: Send + Sync {
    fn interpreter(&self) -> InterpreterRef;

    /// Bootstraps a root-level field selection into a cursor, possibly rewriting the
    /// child query (e.g. to record the id assigned by a just-executed mutation).
    async fn root_cursor(
        &self,
        context: &Type,
        field_name: &str,
        alias: Option<&str>,
        child: Query,
        env: Env,
    ) -> PResult<(Query, CursorRef)>;
}

pub type MappingRef = Arc<dyn Mapping>;

/// Handles the three query shapes that reach a single-mapping interpreter's root
/// evaluator: `Environment` (merges bindings), a (possibly renamed) root field select
/// (asks the mapping for a cursor, then evaluates), and a `Wrap` around a `Component`
/// (delegates straight through to the foreign interpreter). Anything else is a malformed
/// root query.
pub async fn run_root_value0(
    mapping: &MappingRef,
    schema: &Schema,
    config: &EngineConfig,
    query: Query,
    context: Type,
    env: Env,
) -> PResult<ProtoJson> {
    let me = mapping.interpreter();
    match query {
        Query::Environment(extra, child) => {
            let merged = env.bind(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));
            Box::pin(run_root_value0(mapping, schema, config, *child, context, merged)).await
        }

        Query::PossiblyRenamedSelect(select, result_name) => {
            let Query::Select(field_name, _args, child) = *select else {
                return PResult::err(Problem::from(EngineError::BadRootQuery));
            };
            let Some(field_tpe) = schema.field(&context, &field_name) else {
                return PResult::err(Problem::from(EngineError::NoSuchRootField {
                    tpe: context.name().unwrap_or("?").to_string(),
                    field: field_name.clone(),
                }));
            };
            let (rewritten_child, cursor) = match mapping
                .root_cursor(&context, &field_name, Some(&result_name), *child, env)
                .await
            {
                PResult::Value(v) => v,
                PResult::Both(problems, (rewritten_child, cursor)) => {
                    return run_value(Query::wrap(result_name, rewritten_child), field_tpe, cursor, schema, config, &me)
                        .with_extra_problems(problems);
                }
                PResult::Errs(p) => return PResult::Errs(p),
            };
            run_value(Query::wrap(result_name, rewritten_child), field_tpe, cursor, schema, config, &me)
        }

        Query::Wrap(_, boxed) => match *boxed {
            Query::Component { mapping: other, child, .. } => {
                other.interpreter().run_root_value(*child, context, env).await
            }
            _ => PResult::err(Problem::from(EngineError::BadRootQuery)),
        },

        _ => PResult::err(Problem::from(EngineError::BadRootQuery)),
    }
}

/// Splits a top-level query into introspection vs. regular roots, evaluates each, and
/// merges their top-level object fields in original order. `introspection` is the schema's
/// built-in interpreter (schema introspection data is an external collaborator; the core
/// only knows how to route `Introspect` nodes to whichever interpreter is supplied).
#[tracing::instrument(level = "debug", skip_all, fields(tpe = ?root_tpe))]
pub async fn run_root(
    primary: &InterpreterRef,
    introspection: &InterpreterRef,
    query: Query,
    root_tpe: Type,
    env: Env,
    config: &EngineConfig,
) -> (Vec<Problem>, Json) {
    let root_queries = match query {
        Query::Group(qs) => qs,
        other => vec![other],
    };

    let mut slots: Vec<Option<ProtoJson>> = vec![None; root_queries.len()];
    let mut others: Vec<(usize, Query)> = Vec::new();
    let mut problems = Vec::new();

    for (idx, q) in root_queries.into_iter().enumerate() {
        if matches!(q, Query::Introspect(..)) {
            match introspection.run_root_value(q, root_tpe.clone(), env.clone()).await {
                PResult::Value(v) => slots[idx] = Some(v),
                PResult::Both(p, v) => {
                    problems.extend(p);
                    slots[idx] = Some(v);
                }
                PResult::Errs(p) => {
                    problems.extend(p);
                    slots[idx] = Some(ProtoJson::null());
                }
            }
        } else {
            others.push((idx, q));
        }
    }

    if !others.is_empty() {
        let batch: Vec<(Query, Type, Env)> =
            others.iter().map(|(_, q)| (q.clone(), root_tpe.clone(), env.clone())).collect();
        let (batch_problems, values) = primary.run_root_values(batch).await;
        problems.extend(batch_problems);
        for ((idx, _), value) in others.into_iter().zip(values) {
            slots[idx] = Some(value);
        }
    }

    let merged = ProtoJson::merge_objects(slots.into_iter().map(|s| s.unwrap_or_else(ProtoJson::null)).collect());
    let (complete_problems, json) = crate::complete::complete(merged, config).await;
    problems.extend(complete_problems);
    (problems, json)
}
