//! `ProtoJson`: the partial-result tree.
//!
//! A `ProtoJson` mixes fully materialized JSON with deferred placeholders owned by other
//! interpreters. The "opaque ProtoJson" trick from the source hides this sum type behind
//! an unchecked downcast; here it's an explicit tagged enum, and the collapse smart
//! constructors decide between concrete and partial forms at construction time rather than
//! relying on a later normalization pass.

use indexmap::IndexMap;
use serde_json::Value as Json;

use crate::cursor::Env;
use crate::query::Query;
use crate::root::InterpreterRef;
use crate::types::Type;

/// A subtree not yet materialized, owned by the interpreter that must resolve it.
#[derive(Clone)]
pub struct Staged {
    pub interpreter: InterpreterRef,
    pub query: Query,
    pub root_tpe: Type,
    pub env: Env,
}

impl std::fmt::Debug for Staged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Staged")
            .field("query", &self.query)
            .field("root_tpe", &self.root_tpe)
            .finish_non_exhaustive()
    }
}

/// The partial-result tree produced by the evaluator.
///
/// Identity matters for `Staged`: the completion engine matches placeholders back to their
/// resolved value by the heap address of the `Staged` allocation, not by structural
/// equality, since two placeholders can carry identical payloads yet occupy distinct
/// positions in the output (see design notes).
#[derive(Clone, Debug)]
pub enum ProtoJson {
    Concrete(Json),
    Staged(std::sync::Arc<Staged>),
    PObject(Vec<(String, ProtoJson)>),
    PArray(Vec<ProtoJson>),
    PSelect(Box<ProtoJson>, String),
}

impl ProtoJson {
    pub fn from_json(j: Json) -> ProtoJson {
        ProtoJson::Concrete(j)
    }

    pub fn null() -> ProtoJson {
        ProtoJson::Concrete(Json::Null)
    }

    /// Builds an object-shaped node, collapsing to `Concrete` when every field already is.
    pub fn from_fields(fields: Vec<(String, ProtoJson)>) -> ProtoJson {
        if fields.iter().all(|(_, v)| matches!(v, ProtoJson::Concrete(_))) {
            let mut obj = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields {
                let ProtoJson::Concrete(j) = v else { unreachable!() };
                obj.insert(k, j);
            }
            ProtoJson::Concrete(Json::Object(obj))
        } else {
            ProtoJson::PObject(fields)
        }
    }

    /// Builds an array-shaped node, collapsing to `Concrete` when every element already is.
    pub fn from_values(values: Vec<ProtoJson>) -> ProtoJson {
        if values.iter().all(|v| matches!(v, ProtoJson::Concrete(_))) {
            let arr = values
                .into_iter()
                .map(|v| match v {
                    ProtoJson::Concrete(j) => j,
                    _ => unreachable!(),
                })
                .collect();
            ProtoJson::Concrete(Json::Array(arr))
        } else {
            ProtoJson::PArray(values)
        }
    }

    pub fn staged(interpreter: InterpreterRef, query: Query, root_tpe: Type, env: Env) -> ProtoJson {
        ProtoJson::Staged(std::sync::Arc::new(Staged {
            interpreter,
            query,
            root_tpe,
            env,
        }))
    }

    /// Projects `field` out of `inner` once it materializes; collapses immediately if
    /// `inner` is already concrete.
    pub fn select(inner: ProtoJson, field_name: impl Into<String>) -> ProtoJson {
        let field_name = field_name.into();
        match inner {
            ProtoJson::Concrete(Json::Object(mut obj)) => {
                ProtoJson::Concrete(obj.remove(&field_name).unwrap_or(Json::Null))
            }
            ProtoJson::Concrete(_) => ProtoJson::Concrete(Json::Null),
            other => ProtoJson::PSelect(Box::new(other), field_name),
        }
    }

    /// `true` iff this node itself is a deferred placeholder (not recursive — a `PObject`
    /// containing a `Staged` field is not itself deferred by this predicate).
    pub fn is_deferred(&self) -> bool {
        matches!(self, ProtoJson::Staged(_))
    }

    /// `true` iff no `Staged` placeholder is reachable anywhere in this tree.
    pub fn is_fully_concrete(&self) -> bool {
        match self {
            ProtoJson::Concrete(_) => true,
            ProtoJson::Staged(_) => false,
            ProtoJson::PObject(fields) => fields.iter().all(|(_, v)| v.is_fully_concrete()),
            ProtoJson::PArray(elems) => elems.iter().all(ProtoJson::is_fully_concrete),
            ProtoJson::PSelect(inner, _) => inner.is_fully_concrete(),
        }
    }

    /// Flattens a list of object-shaped `ProtoJson`s into a single object, preserving
    /// field insertion order across inputs. Non-object entries are skipped; empty input
    /// yields `Null`; a lone input is returned unchanged (not re-wrapped).
    pub fn merge_objects(parts: Vec<ProtoJson>) -> ProtoJson {
        let mut parts: Vec<ProtoJson> = parts
            .into_iter()
            .filter(|p| matches!(p, ProtoJson::PObject(_) | ProtoJson::Concrete(Json::Object(_))))
            .collect();
        match parts.len() {
            0 => ProtoJson::null(),
            1 => parts.pop().unwrap(),
            _ => {
                let mut fields: Vec<(String, ProtoJson)> = Vec::new();
                let mut concrete_obj = serde_json::Map::new();
                let mut all_concrete = true;
                for part in parts {
                    match part {
                        ProtoJson::Concrete(Json::Object(obj)) => {
                            for (k, v) in obj {
                                concrete_obj.insert(k.clone(), v.clone());
                                fields.push((k, ProtoJson::Concrete(v)));
                            }
                        }
                        ProtoJson::PObject(fs) => {
                            all_concrete = false;
                            fields.extend(fs);
                        }
                        _ => unreachable!("filtered above"),
                    }
                }
                if all_concrete {
                    ProtoJson::Concrete(Json::Object(concrete_obj))
                } else {
                    ProtoJson::PObject(dedupe_last_wins(fields))
                }
            }
        }
    }
}

/// `IndexMap` preserves first-seen order while letting a later field with the same name
/// replace an earlier one's value: last write wins, ordered by first insertion.
fn dedupe_last_wins(fields: Vec<(String, ProtoJson)>) -> Vec<(String, ProtoJson)> {
    let mut map: IndexMap<String, ProtoJson> = IndexMap::with_capacity(fields.len());
    for (k, v) in fields {
        map.insert(k, v);
    }
    map.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_of_concrete_fields_collapses() {
        let pj = ProtoJson::from_fields(vec![
            ("a".into(), ProtoJson::from_json(Json::from(1))),
            ("b".into(), ProtoJson::from_json(Json::from(2))),
        ]);
        assert!(matches!(pj, ProtoJson::Concrete(Json::Object(_))));
    }

    #[test]
    fn array_of_concrete_elements_collapses() {
        let pj = ProtoJson::from_values(vec![ProtoJson::from_json(Json::from(1))]);
        assert!(matches!(pj, ProtoJson::Concrete(Json::Array(_))));
    }

    #[test]
    fn merge_objects_preserves_order_and_skips_non_objects() {
        let a = ProtoJson::from_json(serde_json::json!({"a": 1}));
        let b = ProtoJson::from_json(serde_json::json!({"b": 2}));
        let merged = ProtoJson::merge_objects(vec![a, b]);
        match merged {
            ProtoJson::Concrete(Json::Object(obj)) => {
                let keys: Vec<_> = obj.keys().cloned().collect();
                assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected concrete object, got {other:?}"),
        }
    }

    #[test]
    fn merge_objects_of_empty_list_is_null() {
        assert!(matches!(ProtoJson::merge_objects(vec![]), ProtoJson::Concrete(Json::Null)));
    }

    #[test]
    fn merge_objects_of_single_is_unchanged() {
        let a = ProtoJson::from_json(serde_json::json!({"a": 1}));
        let merged = ProtoJson::merge_objects(vec![a.clone()]);
        assert!(matches!(merged, ProtoJson::Concrete(Json::Object(_))));
    }
}
