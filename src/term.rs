//! The term / predicate algebra: reified expressions evaluated against a [`Cursor`].
//!
//! Terms are not opaque closures. They are a closed algebraic value with structural
//! accessors (`children`, `fold`, `exists`, `forall`) so a backend can lower a `Predicate`
//! to a query-language fragment (e.g. a SQL `WHERE` clause) instead of only being able to
//! evaluate it in memory.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value as Json;

use crate::cursor::CursorRef;
use crate::error::{EngineError, PResult, Problem};

/// A reified expression, evaluable against a cursor to a JSON value.
///
/// `Predicate` is exactly `Term` used where the evaluated value is expected to be a JSON
/// boolean; the two are not separate Rust types because Rust lacks the higher-kinded
/// `Term<T>` the source algebra uses, and threading a phantom type through every variant
/// buys nothing here (every leaf already carries its own dynamic `Json` shape).
#[derive(Clone, Debug)]
pub enum Term {
    Const(Json),
    UniquePath(Vec<String>),
    ListPath(Vec<String>),

    True,
    False,
    And(Box<Term>, Box<Term>),
    Or(Box<Term>, Box<Term>),
    Not(Box<Term>),

    Eql(Box<Term>, Box<Term>),
    NEql(Box<Term>, Box<Term>),
    Lt(Box<Term>, Box<Term>),
    LtEql(Box<Term>, Box<Term>),
    Gt(Box<Term>, Box<Term>),
    GtEql(Box<Term>, Box<Term>),
    Contains(Box<Term>, Box<Term>),
    In(Box<Term>, Vec<Term>),
    IsNull(Box<Term>, bool),

    Matches(Box<Term>, Arc<Regex>),
    StartsWith(Box<Term>, String),
    ToUpperCase(Box<Term>),
    ToLowerCase(Box<Term>),

    AndB(Box<Term>, Box<Term>),
    OrB(Box<Term>, Box<Term>),
    XorB(Box<Term>, Box<Term>),
    NotB(Box<Term>),
}

/// `Predicate` is exactly `Term` evaluated in boolean position; kept as a named alias so
/// call sites that only ever produce a boolean read accordingly.
pub type Predicate = Term;

impl Term {
    /// Smart constructor with absorbing/identity simplification, applied at construction
    /// time rather than discovered by a later optimizer pass:
    /// `and([]) == True`, and any `False` member collapses the whole conjunction.
    pub fn and(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut acc: Vec<Term> = Vec::new();
        for t in terms {
            match t {
                Term::True => {}
                Term::False => return Term::False,
                Term::And(a, b) => {
                    acc.push(*a);
                    acc.push(*b);
                }
                other => acc.push(other),
            }
        }
        match acc.len() {
            0 => Term::True,
            1 => acc.into_iter().next().unwrap(),
            _ => acc.into_iter().reduce(|a, b| Term::And(Box::new(a), Box::new(b))).unwrap(),
        }
    }

    /// `or([]) == False`; any `True` member collapses the whole disjunction.
    pub fn or(terms: impl IntoIterator<Item = Term>) -> Term {
        let mut acc: Vec<Term> = Vec::new();
        for t in terms {
            match t {
                Term::False => {}
                Term::True => return Term::True,
                Term::Or(a, b) => {
                    acc.push(*a);
                    acc.push(*b);
                }
                other => acc.push(other),
            }
        }
        match acc.len() {
            0 => Term::False,
            1 => acc.into_iter().next().unwrap(),
            _ => acc.into_iter().reduce(|a, b| Term::Or(Box::new(a), Box::new(b))).unwrap(),
        }
    }

    /// Recognizes `[Eql(p, c_1), Eql(p, c_2), ...]` sharing an identical left-hand term
    /// and `Const` right-hand sides, and rewrites to a single `In(p, [c_1, c_2, ...])`.
    pub fn in_from_eqls(eqls: &[Term]) -> Option<Term> {
        if eqls.is_empty() {
            return None;
        }
        let mut lhs: Option<&Term> = None;
        let mut consts = Vec::with_capacity(eqls.len());
        for t in eqls {
            let Term::Eql(l, r) = t else { return None };
            match &lhs {
                None => lhs = Some(l.as_ref()),
                Some(prev) if !prev.structurally_eq(l) => return None,
                Some(_) => {}
            }
            let Term::Const(c) = r.as_ref() else { return None };
            consts.push(Term::Const(c.clone()));
        }
        Some(Term::In(Box::new(lhs.unwrap().clone()), consts))
    }

    /// Structural equality, used only to recognize the shared left-hand side in
    /// `in_from_eqls` (terms otherwise have no need to implement `PartialEq` since
    /// `Matches` holds a compiled `Regex`).
    fn structurally_eq(&self, other: &Term) -> bool {
        format!("{self:?}") == format!("{other:?}")
    }

    /// Immediate child terms, for generic traversal.
    pub fn children(&self) -> Vec<&Term> {
        use Term::*;
        match self {
            Const(_) | UniquePath(_) | ListPath(_) | True | False => vec![],
            And(a, b) | Or(a, b) | Eql(a, b) | NEql(a, b) | Lt(a, b) | LtEql(a, b) | Gt(a, b)
            | GtEql(a, b) | Contains(a, b) | AndB(a, b) | OrB(a, b) | XorB(a, b) => {
                vec![a, b]
            }
            Not(a) | IsNull(a, _) | Matches(a, _) | StartsWith(a, _) | ToUpperCase(a)
            | ToLowerCase(a) | NotB(a) => vec![a],
            In(a, rest) => std::iter::once(a.as_ref()).chain(rest.iter()).collect(),
        }
    }

    /// Bottom-up fold over this term and all its descendants.
    pub fn fold<B>(&self, init: B, f: &impl Fn(B, &Term) -> B) -> B {
        let acc = self.children().into_iter().fold(init, |acc, c| c.fold(acc, f));
        f(acc, self)
    }

    /// True iff `pred` holds for this term or any descendant.
    pub fn exists(&self, pred: &impl Fn(&Term) -> bool) -> bool {
        pred(self) || self.children().iter().any(|c| c.exists(pred))
    }

    /// True iff `pred` holds for this term and every descendant.
    pub fn forall(&self, pred: &impl Fn(&Term) -> bool) -> bool {
        pred(self) && self.children().iter().all(|c| c.forall(pred))
    }

    /// Evaluates this term against `cursor`, producing a JSON value. Any underlying cursor
    /// access error short-circuits to an error result; errors are not accumulated within a
    /// single term evaluation since a term is a pure expression tree, not a list traversal.
    pub fn eval(&self, cursor: &CursorRef) -> PResult<Json> {
        use Term::*;
        match self {
            Const(v) => PResult::Value(v.clone()),

            UniquePath(path) => match cursor.list_path(path) {
                PResult::Value(leaves) | PResult::Both(_, leaves) if leaves.len() == 1 => {
                    leaves[0].as_leaf()
                }
                PResult::Value(_) | PResult::Both(_, _) => {
                    PResult::err(Problem::from(EngineError::NotUnique { path: path.clone() }))
                }
                PResult::Errs(p) => PResult::Errs(p),
            },

            ListPath(path) => {
                let leaves = match cursor.flat_list_path(path) {
                    PResult::Value(v) => v,
                    PResult::Both(_, v) => v,
                    PResult::Errs(p) => return PResult::Errs(p),
                };
                let mut out = Vec::with_capacity(leaves.len());
                for leaf in leaves {
                    match leaf.as_leaf() {
                        PResult::Value(v) | PResult::Both(_, v) => out.push(v),
                        PResult::Errs(p) => return PResult::Errs(p),
                    }
                }
                PResult::Value(Json::Array(out))
            }

            True => PResult::Value(Json::Bool(true)),
            False => PResult::Value(Json::Bool(false)),

            And(a, b) => eval_bool2(cursor, a, b, |x, y| x && y),
            Or(a, b) => eval_bool2(cursor, a, b, |x, y| x || y),
            Not(a) => a.eval_bool(cursor).map(|b| Json::Bool(!b)),

            Eql(a, b) => eval_cmp(cursor, a, b, |o| o == Ordering::Equal),
            NEql(a, b) => eval_cmp(cursor, a, b, |o| o != Ordering::Equal),
            Lt(a, b) => eval_cmp(cursor, a, b, |o| o == Ordering::Less),
            LtEql(a, b) => eval_cmp(cursor, a, b, |o| o != Ordering::Greater),
            Gt(a, b) => eval_cmp(cursor, a, b, |o| o == Ordering::Greater),
            GtEql(a, b) => eval_cmp(cursor, a, b, |o| o != Ordering::Less),

            Contains(list, elem) => {
                let l = match list.eval(cursor) {
                    PResult::Value(v) | PResult::Both(_, v) => v,
                    PResult::Errs(p) => return PResult::Errs(p),
                };
                let e = match elem.eval(cursor) {
                    PResult::Value(v) | PResult::Both(_, v) => v,
                    PResult::Errs(p) => return PResult::Errs(p),
                };
                let found = l.as_array().is_some_and(|items| items.contains(&e));
                PResult::Value(Json::Bool(found))
            }

            In(term, values) => {
                let v = match term.eval(cursor) {
                    PResult::Value(v) | PResult::Both(_, v) => v,
                    PResult::Errs(p) => return PResult::Errs(p),
                };
                for candidate in values {
                    match candidate.eval(cursor) {
                        PResult::Value(c) | PResult::Both(_, c) if c == v => {
                            return PResult::Value(Json::Bool(true));
                        }
                        PResult::Errs(p) => return PResult::Errs(p),
                        _ => {}
                    }
                }
                PResult::Value(Json::Bool(false))
            }

            IsNull(term, is_null) => {
                let v = match term.eval(cursor) {
                    PResult::Value(v) | PResult::Both(_, v) => v,
                    PResult::Errs(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::Bool(v.is_null() == *is_null))
            }

            Matches(term, re) => {
                let s = match eval_str(cursor, term) {
                    Ok(s) => s,
                    Err(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::Bool(re.is_match(&s)))
            }

            StartsWith(term, prefix) => {
                let s = match eval_str(cursor, term) {
                    Ok(s) => s,
                    Err(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::Bool(s.starts_with(prefix.as_str())))
            }

            ToUpperCase(term) => {
                let s = match eval_str(cursor, term) {
                    Ok(s) => s,
                    Err(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::String(s.to_uppercase()))
            }

            ToLowerCase(term) => {
                let s = match eval_str(cursor, term) {
                    Ok(s) => s,
                    Err(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::String(s.to_lowercase()))
            }

            AndB(a, b) => eval_int2(cursor, a, b, |x, y| x & y),
            OrB(a, b) => eval_int2(cursor, a, b, |x, y| x | y),
            XorB(a, b) => eval_int2(cursor, a, b, |x, y| x ^ y),
            NotB(a) => {
                let x = match eval_int(cursor, a) {
                    Ok(x) => x,
                    Err(p) => return PResult::Errs(p),
                };
                PResult::Value(Json::Number((!x).into()))
            }
        }
    }

    /// Evaluates `self` and casts it to a boolean, for use as a `Predicate`.
    pub fn eval_bool(&self, cursor: &CursorRef) -> PResult<bool> {
        self.eval(cursor).and_then(|v| match v.as_bool() {
            Some(b) => PResult::Value(b),
            None => PResult::err(Problem::new("Predicate did not evaluate to a boolean")),
        })
    }
}

fn eval_bool2(
    cursor: &CursorRef,
    a: &Term,
    b: &Term,
    combine: impl Fn(bool, bool) -> bool,
) -> PResult<Json> {
    a.eval_bool(cursor)
        .and_then(|x| b.eval_bool(cursor).map(|y| combine(x, y)))
        .map(Json::Bool)
}

fn eval_cmp(cursor: &CursorRef, a: &Term, b: &Term, accept: impl Fn(Ordering) -> bool) -> PResult<Json> {
    let av = match a.eval(cursor) {
        PResult::Value(v) | PResult::Both(_, v) => v,
        PResult::Errs(p) => return PResult::Errs(p),
    };
    let bv = match b.eval(cursor) {
        PResult::Value(v) | PResult::Both(_, v) => v,
        PResult::Errs(p) => return PResult::Errs(p),
    };
    match compare_json(&av, &bv) {
        Some(ord) => PResult::Value(Json::Bool(accept(ord))),
        None => PResult::err(Problem::new(format!("Cannot compare {av} and {bv}"))),
    }
}

fn eval_str(cursor: &CursorRef, term: &Term) -> Result<String, Vec<Problem>> {
    match term.eval(cursor) {
        PResult::Value(v) | PResult::Both(_, v) => match v {
            Json::String(s) => Ok(s),
            other => Err(vec![Problem::new(format!("Expected a string, found {other}"))]),
        },
        PResult::Errs(p) => Err(p),
    }
}

fn eval_int(cursor: &CursorRef, term: &Term) -> Result<i64, Vec<Problem>> {
    match term.eval(cursor) {
        PResult::Value(v) | PResult::Both(_, v) => {
            v.as_i64().ok_or_else(|| vec![Problem::new(format!("Expected an integer, found {v}"))])
        }
        PResult::Errs(p) => Err(p),
    }
}

fn eval_int2(cursor: &CursorRef, a: &Term, b: &Term, combine: impl Fn(i64, i64) -> i64) -> PResult<Json> {
    let x = match eval_int(cursor, a) {
        Ok(x) => x,
        Err(p) => return PResult::Errs(p),
    };
    let y = match eval_int(cursor, b) {
        Ok(y) => y,
        Err(p) => return PResult::Errs(p),
    };
    PResult::Value(Json::Number(combine(x, y).into()))
}

/// Orders two JSON scalars. Numbers compare as `f64`; strings and booleans compare
/// lexicographically / by truth value. Anything else is incomparable.
fn compare_json(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_absorbs_false() {
        let t = Term::and(vec![Term::True, Term::False, Term::True]);
        assert!(matches!(t, Term::False));
    }

    #[test]
    fn and_of_empty_is_true() {
        assert!(matches!(Term::and(vec![]), Term::True));
    }

    #[test]
    fn or_absorbs_true() {
        let t = Term::or(vec![Term::False, Term::True, Term::False]);
        assert!(matches!(t, Term::True));
    }

    #[test]
    fn or_of_empty_is_false() {
        assert!(matches!(Term::or(vec![]), Term::False));
    }

    #[test]
    fn in_from_eqls_recognizes_shared_lhs() {
        let path = Term::UniquePath(vec!["population".into()]);
        let eqls = vec![
            Term::Eql(Box::new(path.clone()), Box::new(Term::Const(Json::from(1)))),
            Term::Eql(Box::new(path.clone()), Box::new(Term::Const(Json::from(2)))),
        ];
        let rewritten = Term::in_from_eqls(&eqls).unwrap();
        match rewritten {
            Term::In(lhs, consts) => {
                assert!(lhs.structurally_eq(&path));
                assert_eq!(consts.len(), 2);
            }
            _ => panic!("expected In"),
        }
    }

    #[test]
    fn in_from_eqls_rejects_mismatched_lhs() {
        let eqls = vec![
            Term::Eql(
                Box::new(Term::UniquePath(vec!["a".into()])),
                Box::new(Term::Const(Json::from(1))),
            ),
            Term::Eql(
                Box::new(Term::UniquePath(vec!["b".into()])),
                Box::new(Term::Const(Json::from(2))),
            ),
        ];
        assert!(Term::in_from_eqls(&eqls).is_none());
    }

    #[test]
    fn children_of_binary_node() {
        let t = Term::And(Box::new(Term::True), Box::new(Term::False));
        assert_eq!(t.children().len(), 2);
    }
}
