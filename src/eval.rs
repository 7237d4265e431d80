//! The per-stage evaluator: `run_value`, `run_fields`, `run_list`.
//!
//! Walks one query node against a cursor and an expected GraphQL type, producing a
//! [`ProtoJson`]. This module is pure and non-blocking — the only suspension points in the
//! whole engine are `Mapping::root_cursor` and a foreign interpreter's `run_root_values`
//! (see [`crate::root`] and [`crate::complete`]).

use serde_json::Value as Json;
use tracing::instrument;

use crate::config::EngineConfig;
use crate::cursor::{Cursor, CursorRef};
use crate::error::{collect_accumulating, EngineError, PResult, Problem};
use crate::proto_json::ProtoJson;
use crate::query::{OrderBy, OrderDirection, Query};
use crate::root::InterpreterRef;
use crate::types::{Schema, Type, cursor_compatible};

/// Walks `query` against `cursor`, which is expected at type `tpe`. `me` is the
/// interpreter currently running this evaluation, used to resolve `Defer` nodes, which
/// delegate to "the same interpreter's next stage" rather than a foreign one.
#[instrument(level = "debug", skip(query, cursor, schema, config, me), fields(tpe = ?tpe))]
pub fn run_value(
    query: Query,
    tpe: Type,
    cursor: CursorRef,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<ProtoJson> {
    if !cursor_compatible(&tpe, cursor.tpe()) {
        return PResult::err(Problem::from(EngineError::MismatchedType { phase: "run_value" }));
    }

    match query {
        Query::Empty => PResult::Value(ProtoJson::null()),

        Query::Environment(env, child) => run_value(*child, tpe, cursor.with_env(env), schema, config, me),

        Query::Wrap(field_name, boxed) => run_wrap(field_name, *boxed, tpe, cursor, schema, config, me),

        Query::Component { mapping, join, child } => run_component(mapping, join, *child, tpe, cursor),

        Query::Defer { join, child, root_tpe } => run_defer(join, *child, root_tpe, cursor, me),

        Query::Unique(child) => {
            let pre = match cursor.preunique() {
                PResult::Value(c) => c,
                PResult::Both(p, c) => {
                    return run_unique_list(*child, tpe, c, schema, config, me).with_extra_problems(p);
                }
                PResult::Errs(p) => return PResult::Errs(p),
            };
            run_unique_list(*child, tpe, pre, schema, config, me)
        }

        other => dispatch_by_type(other, tpe, cursor, schema, config, me),
    }
}

fn run_unique_list(
    child: Query,
    tpe: Type,
    cursor: CursorRef,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<ProtoJson> {
    let elems = match cursor.as_list() {
        PResult::Value(v) => v,
        PResult::Both(_, v) => v,
        PResult::Errs(p) => return PResult::Errs(p),
    };
    run_list(child, tpe.non_null(), elems, true, tpe.is_nullable(), schema, config, me)
}

/// Rules 3–5: a `Wrap` whose inner node is `Component` (rule 3, only when the surrounding
/// type is a list), `Defer` against a null cursor (rule 4), or anything else (rule 5: wrap
/// the child's result in a single-field object).
fn run_wrap(
    field_name: String,
    inner: Query,
    tpe: Type,
    cursor: CursorRef,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<ProtoJson> {
    if let (Query::Component { mapping, join, child }, Type::List(elem_tpe)) = (&inner, &tpe) {
        let elems = match cursor.as_list() {
            PResult::Value(v) => v,
            PResult::Both(_, v) => v,
            PResult::Errs(p) => return PResult::Errs(p),
        };
        let mut out = Vec::with_capacity(elems.len());
        let mut problems = Vec::new();
        for elem_cursor in elems {
            let item = run_component(mapping.clone(), join.clone(), (**child).clone(), (**elem_tpe).clone(), elem_cursor);
            match item {
                PResult::Value(v) => out.push(v),
                PResult::Both(p, v) => {
                    problems.extend(p);
                    out.push(v);
                }
                PResult::Errs(p) => problems.extend(p),
            }
        }
        let wrapped = out.into_iter().map(|x| ProtoJson::from_fields(vec![(field_name.clone(), x)]));
        let pj = ProtoJson::from_values(wrapped.collect());
        return if problems.is_empty() { PResult::Value(pj) } else { PResult::Both(problems, pj) };
    }

    if let Query::Defer { .. } = &inner {
        if cursor.is_nullable() {
            match cursor.as_nullable() {
                PResult::Value(None) => return PResult::Value(ProtoJson::null()),
                PResult::Both(p, None) => return PResult::Both(p, ProtoJson::null()),
                PResult::Errs(p) => return PResult::Errs(p),
                PResult::Value(Some(_)) | PResult::Both(_, Some(_)) => {}
            }
        }
    }

    run_value(inner, tpe, cursor, schema, config, me).map(|pj| ProtoJson::from_fields(vec![(field_name, pj)]))
}

/// Rule 6: `Component(otherMapping, join, PossiblyRenamedSelect(child, resultName))`.
fn run_component(
    mapping: crate::root::MappingRef,
    join: crate::query::Join,
    child: Query,
    tpe: Type,
    cursor: CursorRef,
) -> PResult<ProtoJson> {
    let Query::PossiblyRenamedSelect(inner, result_name) = child else {
        return PResult::err(Problem::from(EngineError::BadJoinShape));
    };

    let joined = match join.call(&cursor, &inner) {
        PResult::Value(v) => v,
        PResult::Both(problems, v) => {
            return finish_component(mapping, v, result_name, tpe, &cursor).with_extra_problems(problems);
        }
        PResult::Errs(p) => return PResult::Errs(p),
    };

    finish_component(mapping, joined, result_name, tpe, &cursor)
}

fn finish_component(
    mapping: crate::root::MappingRef,
    joined: Query,
    result_name: String,
    tpe: Type,
    cursor: &CursorRef,
) -> PResult<ProtoJson> {
    let interpreter = mapping.interpreter();
    match joined {
        Query::Group(conts) => {
            let mut elems = Vec::with_capacity(conts.len());
            for cont in conts {
                let Some(root_name) = cont.root_name().map(str::to_owned) else {
                    return PResult::err(Problem::from(EngineError::BadJoinShape));
                };
                let staged = ProtoJson::staged(interpreter.clone(), cont, tpe.clone(), cursor.full_env());
                elems.push(ProtoJson::select(staged, root_name));
            }
            PResult::Value(ProtoJson::from_values(elems))
        }
        other => {
            let renamed = Query::Rename(result_name, Box::new(other));
            PResult::Value(ProtoJson::staged(interpreter, renamed, tpe, cursor.full_env()))
        }
    }
}

/// Prepends `segment` to the path of every problem in `r`, bottom-up, so a path built while
/// recursion unwinds ends up root-to-leaf rather than reversed. Logs once per call when it
/// finds anything to tag, so a host can correlate a `null` field with its cause without
/// re-deriving it from the path alone.
fn tag_path<A>(r: PResult<A>, segment: &str) -> PResult<A> {
    match r {
        PResult::Errs(ps) => {
            tracing::debug!(field = segment, n = ps.len(), "field resolution failed");
            PResult::Errs(ps.into_iter().map(|p| prepend_path(p, segment)).collect())
        }
        PResult::Value(v) => PResult::Value(v),
        PResult::Both(ps, v) => {
            tracing::debug!(field = segment, n = ps.len(), "field resolution partially failed");
            PResult::Both(ps.into_iter().map(|p| prepend_path(p, segment)).collect(), v)
        }
    }
}

fn prepend_path(mut p: Problem, segment: &str) -> Problem {
    p.path.insert(0, segment.to_string());
    p
}

/// `run_fields`'s bare `Wrap(fieldName, child)` case passes the *enclosing* object type
/// through to `run_value`; when `child` is itself a `Component`, the placeholder it builds
/// needs the delegated field's own type instead, so the Staged's foreign-side
/// `cursor_compatible` check has something to compare against. Peeks through the
/// `PossiblyRenamedSelect`/`Select` wrapper to recover the original field name and looks it
/// up against the enclosing type; `None` means `tpe` should be used as-is.
fn resolve_wrapped_field_type(tpe: &Type, child: &Query, schema: &Schema) -> Option<Type> {
    let Query::Component { child: inner, .. } = child else { return None };
    let Query::PossiblyRenamedSelect(select, _) = inner.as_ref() else { return None };
    let Query::Select(field_name, _, _) = select.as_ref() else { return None };
    schema.field(tpe.dealias(), field_name)
}

/// Rule 7: bare `Defer(join, child, rootTpe)`.
fn run_defer(join: crate::query::Join, child: Query, root_tpe: Type, cursor: CursorRef, me: &InterpreterRef) -> PResult<ProtoJson> {
    if cursor.is_nullable() {
        match cursor.as_nullable() {
            PResult::Value(None) => return PResult::Value(ProtoJson::null()),
            PResult::Both(p, None) => return PResult::Both(p, ProtoJson::null()),
            PResult::Errs(p) => return PResult::Errs(p),
            PResult::Value(Some(_)) | PResult::Both(_, Some(_)) => {}
        }
    }
    match join.call(&cursor, &child) {
        PResult::Value(cont) => PResult::Value(ProtoJson::staged(me.clone(), cont, root_tpe, cursor.full_env())),
        PResult::Both(p, cont) => PResult::Both(p, ProtoJson::staged(me.clone(), cont, root_tpe, cursor.full_env())),
        PResult::Errs(p) => PResult::Errs(p),
    }
}

/// Rules 9–13: dispatch purely on the expected type once the query-shape-specific rules
/// (2–8) have all been ruled out.
fn dispatch_by_type(
    query: Query,
    tpe: Type,
    cursor: CursorRef,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<ProtoJson> {
    match tpe.dealias() {
        Type::List(elem_tpe) => {
            let elem_tpe = (**elem_tpe).clone();
            let elems = match cursor.as_list() {
                PResult::Value(v) => v,
                PResult::Both(p, v) => {
                    return run_list(query, elem_tpe, v, false, false, schema, config, me).with_extra_problems(p);
                }
                PResult::Errs(p) => return PResult::Errs(p),
            };
            run_list(query, elem_tpe, elems, false, false, schema, config, me)
        }

        Type::Nullable(inner_tpe) => {
            let inner_tpe = (**inner_tpe).clone();
            match cursor.as_nullable() {
                PResult::Value(None) => PResult::Value(ProtoJson::null()),
                PResult::Value(Some(inner_cursor)) => run_value(query, inner_tpe, inner_cursor, schema, config, me),
                PResult::Both(p, None) => PResult::Both(p, ProtoJson::null()),
                PResult::Both(p, Some(inner_cursor)) => {
                    run_value(query, inner_tpe, inner_cursor, schema, config, me).with_extra_problems(p)
                }
                PResult::Errs(p) => PResult::Errs(p),
            }
        }

        Type::Scalar(_) | Type::Enum(_) => cursor.as_leaf().map(ProtoJson::Concrete),

        Type::Object(_) | Type::Interface(_) | Type::Union(_) => {
            run_fields(query, tpe.clone(), cursor, schema, config, me).map(ProtoJson::from_fields)
        }
    }
}

/// `run_fields`: resolves one query node to the list of `(resultName, value)` pairs it
/// contributes, assuming `tpe` is an object/interface/union type (or a nullable wrapper
/// around one).
#[instrument(level = "debug", skip(query, cursor, schema, config, me), fields(tpe = ?tpe))]
pub fn run_fields(
    query: Query,
    tpe: Type,
    cursor: CursorRef,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<Vec<(String, ProtoJson)>> {
    match query {
        Query::Narrow(type_name, child) => {
            if !cursor.narrows_to(&type_name) {
                return PResult::Value(Vec::new());
            }
            match cursor.narrow(&type_name) {
                PResult::Value(narrowed) => run_fields(*child, Type::Object(type_name), narrowed, schema, config, me),
                PResult::Both(p, narrowed) => {
                    run_fields(*child, Type::Object(type_name), narrowed, schema, config, me).with_extra_problems(p)
                }
                PResult::Errs(p) => PResult::Errs(p),
            }
        }

        Query::Introspect(_, select) => run_introspect(*select, tpe, cursor, schema),

        Query::PossiblyRenamedSelect(inner, result_name) => {
            if let Type::Nullable(unwrapped) = tpe.dealias() {
                let unwrapped = (**unwrapped).clone();
                return match cursor.as_nullable() {
                    PResult::Value(None) => PResult::Value(vec![(result_name, ProtoJson::null())]),
                    PResult::Value(Some(inner_cursor)) => run_fields(
                        Query::PossiblyRenamedSelect(inner, result_name),
                        unwrapped,
                        inner_cursor,
                        schema,
                        config,
                        me,
                    ),
                    PResult::Both(p, None) => PResult::Both(p, vec![(result_name, ProtoJson::null())]),
                    PResult::Both(p, Some(inner_cursor)) => run_fields(
                        Query::PossiblyRenamedSelect(inner, result_name),
                        unwrapped,
                        inner_cursor,
                        schema,
                        config,
                        me,
                    )
                    .with_extra_problems(p),
                    PResult::Errs(p) => PResult::Errs(p),
                };
            }

            let Query::Select(field_name, _args, child) = *inner else {
                return PResult::err(Problem::from(EngineError::BadRootQuery));
            };
            let Some(field_tpe) = schema.field(&tpe, &field_name) else {
                return PResult::err(Problem::from(EngineError::NoSuchField {
                    tpe: tpe.name().unwrap_or("?").to_string(),
                    field: field_name.clone(),
                }));
            };
            let result = match cursor.field(&field_name, Some(&result_name)) {
                PResult::Value(field_cursor) => {
                    run_value(*child, field_tpe, field_cursor, schema, config, me).map(|v| vec![(result_name.clone(), v)])
                }
                PResult::Both(p, field_cursor) => run_value(*child, field_tpe, field_cursor, schema, config, me)
                    .map(|v| vec![(result_name.clone(), v)])
                    .with_extra_problems(p),
                PResult::Errs(p) => PResult::Errs(p),
            };
            tag_path(result, &result_name)
        }

        Query::Rename(result_name, boxed) => match *boxed {
            Query::Wrap(_, inner) => run_fields(Query::Wrap(result_name, inner), tpe, cursor, schema, config, me),
            Query::Count(_, inner) => run_fields(Query::Count(result_name, inner), tpe, cursor, schema, config, me),
            other => PResult::err(Problem::from(EngineError::StuckAtType {
                tpe: tpe.name().unwrap_or("?").to_string(),
                query: format!("{other:?}"),
            })),
        },

        Query::Wrap(field_name, child) => {
            let child_tpe = resolve_wrapped_field_type(&tpe, &child, schema).unwrap_or_else(|| tpe.clone());
            run_value(*child, child_tpe, cursor, schema, config, me).map(|v| vec![(field_name, v)])
        }

        Query::Count(result_name, boxed) => {
            let Query::Select(count_name, _, _) = *boxed else {
                return PResult::err(Problem::from(EngineError::BadRootQuery));
            };
            match cursor.field(&count_name, None) {
                PResult::Value(count_cursor) => run_count(result_name, count_cursor),
                PResult::Both(p, count_cursor) => run_count(result_name, count_cursor).with_extra_problems(p),
                PResult::Errs(p) => PResult::Errs(p),
            }
        }

        Query::Group(siblings) => {
            let results = siblings
                .into_iter()
                .map(|sibling| run_fields(sibling, tpe.clone(), cursor.clone_ref(), schema, config, me))
                .collect();
            collect_accumulating(results).map(|groups| groups.into_iter().flatten().collect())
        }

        Query::Environment(env, child) => run_fields(*child, tpe, cursor.with_env(env), schema, config, me),

        Query::Empty => PResult::Value(Vec::new()),

        other => PResult::err(Problem::from(EngineError::StuckAtType {
            tpe: tpe.name().unwrap_or("?").to_string(),
            query: format!("{other:?}"),
        })),
    }
}

fn run_count(result_name: String, count_cursor: CursorRef) -> PResult<Vec<(String, ProtoJson)>> {
    let n = if count_cursor.is_nullable() {
        match count_cursor.as_nullable() {
            PResult::Value(None) => 0,
            PResult::Value(Some(inner)) => count_of(&inner),
            PResult::Both(_, None) => 0,
            PResult::Both(_, Some(inner)) => count_of(&inner),
            PResult::Errs(p) => return PResult::Errs(p),
        }
    } else {
        count_of(&count_cursor)
    };
    PResult::Value(vec![(result_name, ProtoJson::from_json(Json::from(n)))])
}

fn count_of(cursor: &CursorRef) -> i64 {
    if cursor.is_list() {
        match cursor.as_list() {
            PResult::Value(v) | PResult::Both(_, v) => v.len() as i64,
            PResult::Errs(_) => 0,
        }
    } else {
        1
    }
}

/// `Introspect(_, PossiblyRenamedSelect(Select("__typename", ...), resultName))`: resolves
/// the concrete type name using the cursor's narrow capability, scanning possible members
/// in schema order for interfaces/unions (see design notes on introspection tie-breaking).
fn run_introspect(select: Query, tpe: Type, cursor: CursorRef, schema: &Schema) -> PResult<Vec<(String, ProtoJson)>> {
    let Query::PossiblyRenamedSelect(inner, result_name) = select else {
        return PResult::err(Problem::from(EngineError::BadRootQuery));
    };
    let Query::Select(field_name, _, _) = inner.as_ref() else {
        return PResult::err(Problem::from(EngineError::BadRootQuery));
    };
    if field_name != "__typename" {
        return PResult::err(Problem::from(EngineError::BadRootQuery));
    }

    let type_name = match tpe.dealias() {
        Type::Object(n) => Some(n.clone()),
        Type::Interface(_) | Type::Union(_) => {
            schema.first_narrowing_member(&tpe, |candidate| cursor.narrows_to(candidate))
        }
        _ => {
            return PResult::err(Problem::from(EngineError::TypenameNotSelectable {
                tpe: tpe.name().unwrap_or("?").to_string(),
            }));
        }
    };

    match type_name {
        Some(name) => PResult::Value(vec![(result_name, ProtoJson::from_json(Json::String(name)))]),
        None => PResult::err(Problem::from(EngineError::TypenameNotSelectable {
            tpe: tpe.name().unwrap_or("?").to_string(),
        })),
    }
}

/// `run_list`: applies an optional filter/order/offset/limit pass, then evaluates each
/// surviving cursor and re-assembles either a `PArray` or, for `Unique`, the single
/// surviving element (erroring on zero/multiple matches per nullability). When the query
/// carries no explicit `limit`, `config.default_page_size` is applied instead of leaving the
/// list unbounded.
#[instrument(level = "debug", skip(query, cursors, schema, config, me), fields(tpe = ?tpe, n = cursors.len()))]
pub fn run_list(
    query: Query,
    tpe: Type,
    cursors: Vec<CursorRef>,
    unique: bool,
    nullable: bool,
    schema: &Schema,
    config: &EngineConfig,
    me: &InterpreterRef,
) -> PResult<ProtoJson> {
    let (child, cursors) = match query {
        Query::FilterOrderByOffsetLimit { pred, order_by, offset, limit, child } => {
            let filtered = match apply_filter(pred.as_ref(), cursors) {
                Ok(v) => v,
                Err(p) => return PResult::Errs(p),
            };
            let ordered = apply_order(order_by.as_ref(), filtered);
            let limit = limit.or(config.default_page_size);
            let paged = apply_offset_limit(offset, limit, ordered);
            (*child, paged)
        }
        other => (other, cursors),
    };

    let mut problems = Vec::new();
    let mut values = Vec::with_capacity(cursors.len());
    for c in cursors {
        if !cursor_compatible(&tpe, c.tpe()) {
            return PResult::err(Problem::from(EngineError::MismatchedType { phase: "run_list" }));
        }
        match run_value(child.clone(), tpe.clone(), c, schema, config, me) {
            PResult::Value(v) => values.push(v),
            PResult::Both(p, v) => {
                problems.extend(p);
                values.push(v);
            }
            PResult::Errs(p) => return PResult::Errs(p),
        }
    }

    if !unique {
        let pj = ProtoJson::from_values(values);
        return if problems.is_empty() { PResult::Value(pj) } else { PResult::Both(problems, pj) };
    }

    match values.len() {
        1 => {
            let pj = values.into_iter().next().unwrap();
            if problems.is_empty() { PResult::Value(pj) } else { PResult::Both(problems, pj) }
        }
        0 if nullable => {
            let pj = ProtoJson::null();
            if problems.is_empty() { PResult::Value(pj) } else { PResult::Both(problems, pj) }
        }
        0 => {
            problems.push(Problem::from(EngineError::NoMatch));
            PResult::Errs(problems)
        }
        _ => {
            problems.push(Problem::from(EngineError::MultipleMatches));
            PResult::Errs(problems)
        }
    }
}

fn apply_filter(pred: Option<&crate::term::Predicate>, cursors: Vec<CursorRef>) -> Result<Vec<CursorRef>, Vec<Problem>> {
    let Some(pred) = pred else { return Ok(cursors) };
    let mut out = Vec::with_capacity(cursors.len());
    for c in cursors {
        match pred.eval_bool(&c) {
            PResult::Value(true) | PResult::Both(_, true) => out.push(c),
            PResult::Value(false) | PResult::Both(_, false) => {}
            PResult::Errs(p) => return Err(p),
        }
    }
    Ok(out)
}

fn apply_order(order_by: Option<&OrderBy>, mut cursors: Vec<CursorRef>) -> Vec<CursorRef> {
    let Some(order_by) = order_by else { return cursors };
    cursors.sort_by(|a, b| {
        for sel in &order_by.0 {
            let av = sel.term.eval(a);
            let bv = sel.term.eval(b);
            let (av, bv) = match (av.value(), bv.value()) {
                (Some(av), Some(bv)) => (av, bv),
                _ => continue,
            };
            let ord = json_cmp(av, bv);
            let ord = match sel.direction {
                OrderDirection::Asc => ord,
                OrderDirection::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    cursors
}

fn json_cmp(a: &Json, b: &Json) -> std::cmp::Ordering {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(std::cmp::Ordering::Equal),
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

fn apply_offset_limit(offset: Option<usize>, limit: Option<usize>, cursors: Vec<CursorRef>) -> Vec<CursorRef> {
    if offset.is_none() && limit.is_none() {
        return cursors;
    }
    let start = offset.unwrap_or(0).min(cursors.len());
    let mut out = cursors;
    out.drain(..start);
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}
