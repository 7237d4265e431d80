//! The GraphQL type tree.
//!
//! Types form a reference graph (`City.country : Country`, `Country.cities: [City]`), so
//! named types are modeled as a `SchemaRef` indirection (a name) resolved against an
//! immutable [`Schema`] table rather than direct object references — see design notes.

use indexmap::IndexMap;
use std::sync::Arc;

/// A named type, kept alongside its kind so leaf/composite dispatch doesn't need a schema
/// lookup on the hot path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Scalar(String),
    Enum(String),
    Object(String),
    Interface(String),
    Union(String),
    List(Box<Type>),
    Nullable(Box<Type>),
}

impl Type {
    pub fn nullable(self) -> Type {
        Type::Nullable(Box::new(self))
    }

    pub fn list(self) -> Type {
        Type::List(Box::new(self))
    }

    /// This tree has no separate alias wrapper (aliases are resolved once when the schema
    /// is built), so `dealias` is the identity; kept as a named operation because the
    /// evaluator's dispatch rules are phrased in terms of it.
    pub fn dealias(&self) -> &Type {
        self
    }

    pub fn non_null(&self) -> Type {
        match self {
            Type::Nullable(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Type::List(_))
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.dealias(), Type::Scalar(_) | Type::Enum(_))
    }

    pub fn item(&self) -> Option<&Type> {
        match self.dealias() {
            Type::List(inner) => Some(inner),
            Type::Nullable(inner) => inner.item(),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.dealias() {
            Type::Scalar(n) | Type::Enum(n) | Type::Object(n) | Type::Interface(n) | Type::Union(n) => {
                Some(n)
            }
            Type::List(_) | Type::Nullable(_) => None,
        }
    }

    /// Nominal equality modulo nullability wrappers: used by `cursorCompatible` which only
    /// cares that both sides strip to the same leaf, or to nominally equal named types.
    pub fn nominal_eq(&self, other: &Type) -> bool {
        match (self.dealias(), other.dealias()) {
            (Type::List(a), Type::List(b)) => a.nominal_eq(b),
            (Type::Nullable(a), Type::Nullable(b)) => a.nominal_eq(b),
            (Type::Nullable(a), b) | (b, Type::Nullable(a)) => a.nominal_eq(b),
            (a, b) => a.name() == b.name() && std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }

    /// `<:<`: is `self` usable where `other` is expected. Lists are covariant in their
    /// item type; nullability widens (a non-null value satisfies a nullable expectation).
    pub fn is_subtype_of(&self, other: &Type, schema: &Schema) -> bool {
        match (self, other) {
            (_, Type::Nullable(b)) => self.non_null().is_subtype_of(b, schema),
            (Type::Nullable(a), b) => a.is_subtype_of(b, schema),
            (Type::List(a), Type::List(b)) => a.is_subtype_of(b, schema),
            (a, b) => {
                a.name() == b.name()
                    || b.name()
                        .map(|bn| schema.possible_types(bn).iter().any(|p| Some(p.as_str()) == a.name()))
                        .unwrap_or(false)
            }
        }
    }
}

/// Two types are compatible for an evaluator entry `(query, tpe, cursor)` iff either both
/// strip through `Nullable`/`List` to leaves, or the stripped types are nominally equal.
pub fn cursor_compatible(tpe: &Type, cursor_tpe: &Type) -> bool {
    fn strip(t: &Type) -> &Type {
        match t {
            Type::Nullable(inner) | Type::List(inner) => strip(inner),
            other => other,
        }
    }
    let (a, b) = (strip(tpe), strip(cursor_tpe));
    if a.is_leaf() && b.is_leaf() {
        return true;
    }
    a.nominal_eq(b)
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub tpe: Type,
}

#[derive(Clone, Debug)]
pub enum TypeDef {
    Scalar,
    Enum { values: Vec<String> },
    Object { fields: IndexMap<String, Type> },
    Interface {
        fields: IndexMap<String, Type>,
        possible_types: Vec<String>,
    },
    Union { possible_types: Vec<String> },
}

/// The immutable schema table named types are resolved against. Field/member order is
/// preserved (`IndexMap`) so introspection's "first implementing object in schema order"
/// tie-break (see design notes) is deterministic.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    types: IndexMap<String, TypeDef>,
    query_type: Option<String>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_query_type(mut self, name: impl Into<String>) -> Self {
        self.query_type = Some(name.into());
        self
    }

    pub fn define(mut self, name: impl Into<String>, def: TypeDef) -> Self {
        self.types.insert(name.into(), def);
        self
    }

    pub fn query_type(&self) -> Option<&str> {
        self.query_type.as_deref()
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Field type lookup used by `run_fields`'s `tpe.field(fieldName)` rule.
    pub fn field(&self, tpe: &Type, field_name: &str) -> Option<Type> {
        let name = tpe.name()?;
        match self.types.get(name)? {
            TypeDef::Object { fields } | TypeDef::Interface { fields, .. } => {
                fields.get(field_name).cloned()
            }
            _ => None,
        }
    }

    /// Concrete object type names that narrow to `name` (itself, for an object type; the
    /// declared members, for an interface or union).
    pub fn possible_types(&self, name: &str) -> Vec<String> {
        match self.types.get(name) {
            Some(TypeDef::Interface { possible_types, .. }) | Some(TypeDef::Union { possible_types }) => {
                possible_types.clone()
            }
            Some(TypeDef::Object { .. }) => vec![name.to_string()],
            _ => Vec::new(),
        }
    }

    /// Scans types in schema (insertion) order and returns the first that narrows `from`.
    pub fn first_narrowing_member(&self, from: &Type, narrows: impl Fn(&str) -> bool) -> Option<String> {
        let candidates = from.name().map(|n| self.possible_types(n)).unwrap_or_default();
        self.types
            .keys()
            .find(|name| candidates.contains(name) && narrows(name))
            .cloned()
    }
}

pub type SchemaRef = Arc<Schema>;

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new()
            .with_query_type("Query")
            .define(
                "Country",
                TypeDef::Object {
                    fields: IndexMap::from([("name".to_string(), Type::Scalar("String".into()))]),
                },
            )
            .define(
                "City",
                TypeDef::Object {
                    fields: IndexMap::from([
                        ("name".to_string(), Type::Scalar("String".into())),
                        ("country".to_string(), Type::Object("Country".into())),
                    ]),
                },
            )
            .define(
                "Named",
                TypeDef::Interface {
                    fields: IndexMap::from([("name".to_string(), Type::Scalar("String".into()))]),
                    possible_types: vec!["City".into(), "Country".into()],
                },
            )
    }

    #[test]
    fn leaf_types_are_always_cursor_compatible() {
        let a = Type::Scalar("Int".into()).nullable();
        let b = Type::Enum("Color".into());
        assert!(cursor_compatible(&a, &b));
    }

    #[test]
    fn nominal_eq_ignores_nullable_wrapper() {
        let a = Type::Object("City".into());
        let b = Type::Object("City".into()).nullable();
        assert!(a.nominal_eq(&b));
    }

    #[test]
    fn field_lookup_walks_schema_table() {
        let schema = schema();
        let city = Type::Object("City".into());
        let tpe = schema.field(&city, "country").unwrap();
        assert_eq!(tpe.name(), Some("Country"));
    }

    #[test]
    fn possible_types_scan_preserves_schema_order() {
        let schema = schema();
        let named = Type::Interface("Named".into());
        let first = schema.first_narrowing_member(&named, |_| true);
        assert_eq!(first.as_deref(), Some("City"));
    }
}
