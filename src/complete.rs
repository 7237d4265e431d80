//! The completion engine: `complete` / `complete_all`.
//!
//! Resolves every `Staged` placeholder reachable from a list of [`ProtoJson`]s by gathering
//! them, batching by owning interpreter, invoking each interpreter's batched evaluator, and
//! recursing on the results until nothing deferred remains (or [`EngineConfig::max_completion_rounds`]
//! is exhausted). Gather/bucket/scatter are pure; only the per-bucket interpreter invocation
//! suspends.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::config::EngineConfig;
use crate::error::{EngineError, Problem};
use crate::proto_json::{ProtoJson, Staged};
use crate::root::InterpreterRef;

/// Resolves a single `ProtoJson` to a concrete `Json`. Already-concrete input is returned
/// unchanged without entering the completion loop.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn complete(pj: ProtoJson, config: &EngineConfig) -> (Vec<Problem>, Json) {
    if let ProtoJson::Concrete(j) = pj {
        return (Vec::new(), j);
    }
    let (problems, mut jsons) = complete_all(vec![pj], config).await;
    (problems, jsons.pop().unwrap_or(Json::Null))
}

/// Resolves a batch of `ProtoJson`s positionally, preserving `pjs`' original order in the
/// output.
#[tracing::instrument(level = "debug", skip_all, fields(n = pjs.len()))]
pub async fn complete_all(pjs: Vec<ProtoJson>, config: &EngineConfig) -> (Vec<Problem>, Vec<Json>) {
    complete_round(pjs, config, 0).await
}

fn complete_round<'a>(
    pjs: Vec<ProtoJson>,
    config: &'a EngineConfig,
    round: usize,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (Vec<Problem>, Vec<Json>)> + Send + 'a>> {
    Box::pin(async move {
        tracing::debug!(round, "starting completion round");

        let mut placeholders = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for pj in &pjs {
            gather(pj, &mut placeholders, &mut seen);
        }

        if placeholders.is_empty() {
            let jsons = pjs.iter().map(|pj| scatter(pj, &HashMap::new())).collect();
            return (Vec::new(), jsons);
        }

        let mut problems = Vec::new();
        let mut map: HashMap<usize, Json> = HashMap::with_capacity(placeholders.len());

        if round >= config.max_completion_rounds {
            tracing::warn!(round, "completion did not converge within the configured round budget");
            problems.push(Problem::from(EngineError::CompletionDidNotConverge { rounds: round }));
            for staged in &placeholders {
                map.insert(identity_key(staged), Json::Null);
            }
        } else {
            let buckets = bucket_by_interpreter(&placeholders);
            let mut resolved: Vec<ProtoJson> = Vec::with_capacity(placeholders.len());
            let mut order: Vec<Arc<Staged>> = Vec::with_capacity(placeholders.len());

            for (interpreter, members) in buckets {
                let triples = members
                    .iter()
                    .map(|s| (s.query.clone(), s.root_tpe.clone(), s.env.clone()))
                    .collect();
                let (batch_problems, values) = interpreter.run_root_values(triples).await;
                problems.extend(batch_problems);
                order.extend(members.into_iter());
                resolved.extend(values);
            }

            let (next_problems, next_jsons) = complete_round(resolved, config, round + 1).await;
            problems.extend(next_problems);
            for (staged, json) in order.into_iter().zip(next_jsons) {
                map.insert(identity_key(&staged), json);
            }
        }

        let jsons = pjs.iter().map(|pj| scatter(pj, &map)).collect();
        (problems, jsons)
    })
}

fn identity_key(staged: &Arc<Staged>) -> usize {
    Arc::as_ptr(staged) as *const () as usize
}

/// Collects every `Staged` placeholder reachable through `PObject`/`PArray`/`PSelect`,
/// deduplicated by reference identity. Does not look inside a `Staged` node itself — its
/// query is opaque until the owning interpreter resolves it.
fn gather(pj: &ProtoJson, out: &mut Vec<Arc<Staged>>, seen: &mut std::collections::HashSet<usize>) {
    match pj {
        ProtoJson::Concrete(_) => {}
        ProtoJson::Staged(s) => {
            if seen.insert(identity_key(s)) {
                out.push(s.clone());
            }
        }
        ProtoJson::PObject(fields) => {
            for (_, v) in fields {
                gather(v, out, seen);
            }
        }
        ProtoJson::PArray(elems) => {
            for v in elems {
                gather(v, out, seen);
            }
        }
        ProtoJson::PSelect(inner, _) => gather(inner, out, seen),
    }
}

/// Groups placeholders by owning interpreter, comparing interpreters by reference identity
/// (`Arc::ptr_eq`) rather than any notion of equality on the trait object itself.
fn bucket_by_interpreter(placeholders: &[Arc<Staged>]) -> Vec<(InterpreterRef, Vec<Arc<Staged>>)> {
    let mut buckets: Vec<(InterpreterRef, Vec<Arc<Staged>>)> = Vec::new();
    for staged in placeholders {
        let existing = buckets.iter_mut().find(|(i, _)| Arc::ptr_eq(i, &staged.interpreter));
        match existing {
            Some((_, members)) => members.push(staged.clone()),
            None => buckets.push((staged.interpreter.clone(), vec![staged.clone()])),
        }
    }
    buckets
}

/// Substitutes every `Staged` node reachable from `pj` using `map`, building a fresh `Json`.
/// Placeholders absent from `map` (should not happen if interpreters honor their contract)
/// default to `Null`.
fn scatter(pj: &ProtoJson, map: &HashMap<usize, Json>) -> Json {
    match pj {
        ProtoJson::Concrete(j) => j.clone(),
        ProtoJson::Staged(s) => map.get(&identity_key(s)).cloned().unwrap_or(Json::Null),
        ProtoJson::PObject(fields) => {
            let mut obj = serde_json::Map::with_capacity(fields.len());
            for (name, v) in fields {
                if v.is_deferred() {
                    let substituted = scatter(v, map);
                    match substituted {
                        Json::Object(inner) if inner.len() == 1 => {
                            let (_, only_value) = inner.into_iter().next().unwrap();
                            obj.insert(name.clone(), only_value);
                        }
                        other => {
                            obj.insert(name.clone(), other);
                        }
                    }
                } else {
                    obj.insert(name.clone(), scatter(v, map));
                }
            }
            Json::Object(obj)
        }
        ProtoJson::PArray(elems) => Json::Array(elems.iter().map(|v| scatter(v, map)).collect()),
        ProtoJson::PSelect(inner, field) => match scatter(inner, map) {
            Json::Object(mut obj) => obj.remove(field).unwrap_or(Json::Null),
            _ => Json::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PResult;

    #[tokio::test]
    async fn already_concrete_short_circuits() {
        let (problems, json) = complete(ProtoJson::from_json(serde_json::json!({"a": 1})), &EngineConfig::default()).await;
        assert!(problems.is_empty());
        assert_eq!(json, serde_json::json!({"a": 1}));
    }

    #[derive(Debug)]
    struct DummyInterpreter;

    #[async_trait::async_trait]
    impl crate::root::Interpreter for DummyInterpreter {
        async fn run_root_value(
            &self,
            _query: crate::query::Query,
            _root_tpe: crate::types::Type,
            _env: crate::cursor::Env,
        ) -> PResult<ProtoJson> {
            unreachable!("not exercised by this test")
        }
    }

    #[tokio::test]
    async fn scatter_inlines_single_field_staged_object_under_a_deferred_field() {
        let staged = Arc::new(Staged {
            interpreter: Arc::new(DummyInterpreter),
            query: crate::query::Query::Empty,
            root_tpe: crate::types::Type::Object("City".into()),
            env: crate::cursor::Env::empty(),
        });
        let key = identity_key(&staged);
        let pj = ProtoJson::PObject(vec![("wrapped".to_string(), ProtoJson::Staged(staged))]);

        let mut map = HashMap::new();
        map.insert(key, serde_json::json!({"name": "Berlin"}));

        let json = scatter(&pj, &map);
        assert_eq!(json, serde_json::json!({"wrapped": "Berlin"}));
    }

    #[tokio::test]
    async fn scatter_keeps_multi_field_staged_result_nested() {
        let staged = Arc::new(Staged {
            interpreter: Arc::new(DummyInterpreter),
            query: crate::query::Query::Empty,
            root_tpe: crate::types::Type::Object("City".into()),
            env: crate::cursor::Env::empty(),
        });
        let key = identity_key(&staged);
        let pj = ProtoJson::PObject(vec![("wrapped".to_string(), ProtoJson::Staged(staged))]);

        let mut map = HashMap::new();
        map.insert(key, serde_json::json!({"name": "Berlin", "population": 3_000_000}));

        let json = scatter(&pj, &map);
        assert_eq!(json, serde_json::json!({"wrapped": {"name": "Berlin", "population": 3_000_000}}));
    }
}
