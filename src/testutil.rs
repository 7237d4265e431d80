//! An in-memory two-backend fixture: cities served directly, countries delegated through a
//! `Component` to a second interpreter. Used by the `tests/` integration suite.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::config::EngineConfig;
use crate::cursor::{Cursor, CursorRef, Env};
use crate::error::{EngineError, PResult, Problem};
use crate::eval::run_value;
use crate::proto_json::ProtoJson;
use crate::query::{Args, Join, Query};
use crate::root::{Interpreter, InterpreterRef, Mapping, MappingRef, run_root_value0};
use crate::types::{Schema, SchemaRef, Type, TypeDef};

#[derive(Clone, Debug)]
pub struct CityRow {
    pub id: i64,
    pub name: String,
    pub population: i64,
    pub country_code: String,
}

#[derive(Clone, Debug)]
pub struct CountryRow {
    pub code: String,
    pub name: String,
}

pub struct CityStore {
    pub rows: Vec<CityRow>,
    pub next_id: i64,
}

fn seed_cities() -> Vec<CityRow> {
    vec![
        CityRow { id: 1, name: "Kabul".into(), population: 4_600_000, country_code: "AFG".into() },
        CityRow { id: 2, name: "Qandahar".into(), population: 400_000, country_code: "AFG".into() },
        CityRow { id: 101, name: "Plainview".into(), population: 10, country_code: "USA".into() },
        CityRow { id: 102, name: "Roundtown".into(), population: 50, country_code: "USA".into() },
        CityRow { id: 103, name: "Midville".into(), population: 30, country_code: "USA".into() },
        CityRow { id: 104, name: "Lowburg".into(), population: 20, country_code: "USA".into() },
        CityRow { id: 105, name: "Fortypeak".into(), population: 40, country_code: "USA".into() },
    ]
}

fn seed_countries() -> Vec<CountryRow> {
    vec![
        CountryRow { code: "AFG".into(), name: "Afghanistan".into() },
        CountryRow { code: "USA".into(), name: "United States".into() },
    ]
}

fn city_json(row: &CityRow) -> Json {
    serde_json::json!({
        "id": row.id,
        "name": row.name,
        "population": row.population,
        "country": row.country_code,
    })
}

pub fn schema() -> SchemaRef {
    Arc::new(
        Schema::new()
            .with_query_type("Query")
            .define(
                "Query",
                TypeDef::Object {
                    fields: indexmap::IndexMap::from([
                        ("city".to_string(), Type::Object("City".into()).nullable()),
                        ("cities".to_string(), Type::Object("City".into()).list()),
                        ("createCity".to_string(), Type::Object("City".into())),
                        ("updatePopulation".to_string(), Type::Scalar("Boolean".into())),
                    ]),
                },
            )
            .define(
                "City",
                TypeDef::Object {
                    fields: indexmap::IndexMap::from([
                        ("id".to_string(), Type::Scalar("Int".into())),
                        ("name".to_string(), Type::Scalar("String".into())),
                        ("population".to_string(), Type::Scalar("Int".into())),
                        ("country".to_string(), Type::Object("Country".into())),
                    ]),
                },
            )
            .define(
                "Country",
                TypeDef::Object {
                    fields: indexmap::IndexMap::from([
                        ("code".to_string(), Type::Scalar("String".into())),
                        ("name".to_string(), Type::Scalar("String".into())),
                    ]),
                },
            ),
    )
}

/// A cursor over a plain `Json` value, typed by the schema rather than by any bespoke
/// per-backend representation. `field` looks the child's declared type up in `schema`
/// instead of inferring it from the JSON shape, matching how a real cursor always knows its
/// own type independent of the underlying data.
#[derive(Clone, Debug)]
pub struct JsonCursor {
    value: Json,
    tpe: Type,
    schema: SchemaRef,
    env: Env,
}

impl JsonCursor {
    pub fn new(value: Json, tpe: Type, schema: SchemaRef, env: Env) -> JsonCursor {
        JsonCursor { value, tpe, schema, env }
    }

    pub fn arc(value: Json, tpe: Type, schema: SchemaRef, env: Env) -> CursorRef {
        Arc::new(JsonCursor::new(value, tpe, schema, env))
    }
}

impl Cursor for JsonCursor {
    fn tpe(&self) -> &Type {
        &self.tpe
    }

    fn as_leaf(&self) -> PResult<Json> {
        PResult::Value(self.value.clone())
    }

    fn as_nullable(&self) -> PResult<Option<CursorRef>> {
        let Type::Nullable(inner) = &self.tpe else {
            return PResult::err(Problem::new("as_nullable called on a non-nullable fixture cursor"));
        };
        if self.value.is_null() {
            PResult::Value(None)
        } else {
            PResult::Value(Some(JsonCursor::arc(self.value.clone(), (**inner).clone(), self.schema.clone(), self.env.clone())))
        }
    }

    fn as_list(&self) -> PResult<Vec<CursorRef>> {
        let Type::List(inner) = &self.tpe else {
            return PResult::err(Problem::new("as_list called on a non-list fixture cursor"));
        };
        let Json::Array(items) = &self.value else {
            return PResult::err(Problem::new("expected a JSON array backing a list cursor"));
        };
        PResult::Value(
            items
                .iter()
                .map(|v| JsonCursor::arc(v.clone(), (**inner).clone(), self.schema.clone(), self.env.clone()))
                .collect(),
        )
    }

    fn field(&self, name: &str, _alias: Option<&str>) -> PResult<CursorRef> {
        let Some(field_tpe) = self.schema.field(&self.tpe, name) else {
            return PResult::err(Problem::from(EngineError::NoSuchField {
                tpe: self.tpe.name().unwrap_or("?").to_string(),
                field: name.to_string(),
            }));
        };
        let value = self.value.get(name).cloned().unwrap_or(Json::Null);
        PResult::Value(JsonCursor::arc(value, field_tpe, self.schema.clone(), self.env.clone()))
    }

    fn narrows_to(&self, type_name: &str) -> bool {
        self.value
            .get("__typename")
            .and_then(Json::as_str)
            .map(|t| t == type_name)
            .unwrap_or_else(|| self.tpe.name() == Some(type_name))
    }

    fn narrow(&self, type_name: &str) -> PResult<CursorRef> {
        PResult::Value(JsonCursor::arc(self.value.clone(), Type::Object(type_name.to_string()), self.schema.clone(), self.env.clone()))
    }

    fn list_path(&self, path: &[String]) -> PResult<Vec<CursorRef>> {
        let mut cur: CursorRef = Arc::new(self.clone());
        for segment in path {
            cur = match cur.field(segment, None) {
                PResult::Value(c) | PResult::Both(_, c) => c,
                PResult::Errs(p) => return PResult::Errs(p),
            };
        }
        PResult::Value(vec![cur])
    }

    fn flat_list_path(&self, path: &[String]) -> PResult<Vec<CursorRef>> {
        self.list_path(path)
    }

    fn with_env(&self, env: Env) -> CursorRef {
        JsonCursor::arc(self.value.clone(), self.tpe.clone(), self.schema.clone(), env)
    }

    fn full_env(&self) -> Env {
        self.env.clone()
    }

    fn clone_ref(&self) -> CursorRef {
        Arc::new(self.clone())
    }
}

/// The "city" backend: serves `city`/`cities`/`createCity`/`updatePopulation` root fields
/// directly, and doubles as the `Interpreter` that runs them via [`run_root_value0`]. Built
/// with `Arc::new_cyclic` so `Mapping::interpreter` can hand back an `Arc` pointing at the
/// same allocation rather than a fresh one each call.
pub struct CityBackend {
    self_ref: Weak<CityBackend>,
    store: Arc<Mutex<CityStore>>,
    schema: SchemaRef,
    config: EngineConfig,
}

impl CityBackend {
    pub fn new(schema: SchemaRef, config: EngineConfig, store: Arc<Mutex<CityStore>>) -> Arc<CityBackend> {
        Arc::new_cyclic(|self_ref| CityBackend { self_ref: self_ref.clone(), store, schema, config })
    }

    fn interpreter_ref(&self) -> InterpreterRef {
        self.self_ref.upgrade().expect("CityBackend outlives its own Arc")
    }

    fn mapping_ref(&self) -> MappingRef {
        self.self_ref.upgrade().expect("CityBackend outlives its own Arc")
    }
}

#[async_trait]
impl Interpreter for CityBackend {
    async fn run_root_value(&self, query: Query, root_tpe: Type, env: Env) -> PResult<ProtoJson> {
        run_root_value0(&self.mapping_ref(), &self.schema, &self.config, query, root_tpe, env).await
    }
}

#[async_trait]
impl Mapping for CityBackend {
    fn interpreter(&self) -> InterpreterRef {
        self.interpreter_ref()
    }

    async fn root_cursor(
        &self,
        _context: &Type,
        field_name: &str,
        _alias: Option<&str>,
        child: Query,
        env: Env,
    ) -> PResult<(Query, CursorRef)> {
        match field_name {
            "city" => {
                let Some(id) = env.get("id").and_then(Json::as_i64) else {
                    return PResult::err(Problem::new("city root field requires an 'id' binding"));
                };
                let row = {
                    let store = self.store.lock().unwrap();
                    store.rows.iter().find(|r| r.id == id).cloned()
                };
                let value = row.as_ref().map(city_json).unwrap_or(Json::Null);
                let cursor = JsonCursor::arc(value, Type::Object("City".into()).nullable(), self.schema.clone(), env);
                PResult::Value((child, cursor))
            }
            "cities" => {
                let rows = {
                    let store = self.store.lock().unwrap();
                    store.rows.clone()
                };
                let value = Json::Array(rows.iter().map(city_json).collect());
                let cursor = JsonCursor::arc(value, Type::Object("City".into()).list(), self.schema.clone(), env);
                PResult::Value((child, cursor))
            }
            "createCity" => {
                let Some(name) = env.get("name").and_then(Json::as_str).map(str::to_owned) else {
                    return PResult::err(Problem::new("createCity requires a 'name' binding"));
                };
                let Some(country_code) = env.get("countryCode").and_then(Json::as_str).map(str::to_owned) else {
                    return PResult::err(Problem::new("createCity requires a 'countryCode' binding"));
                };
                let Some(population) = env.get("population").and_then(Json::as_i64) else {
                    return PResult::err(Problem::new("createCity requires a 'population' binding"));
                };
                let row = {
                    let mut store = self.store.lock().unwrap();
                    let id = store.next_id;
                    store.next_id += 1;
                    let row = CityRow { id, name, population, country_code };
                    store.rows.push(row.clone());
                    row
                };
                let cursor = JsonCursor::arc(city_json(&row), Type::Object("City".into()), self.schema.clone(), env);
                PResult::Value((child, cursor))
            }
            "updatePopulation" => {
                let Some(id) = env.get("id").and_then(Json::as_i64) else {
                    return PResult::err(Problem::new("updatePopulation requires an 'id' binding"));
                };
                let Some(population) = env.get("population").and_then(Json::as_i64) else {
                    return PResult::err(Problem::new("updatePopulation requires a 'population' binding"));
                };
                let updated = {
                    let mut store = self.store.lock().unwrap();
                    match store.rows.iter_mut().find(|r| r.id == id) {
                        Some(row) => {
                            row.population = population;
                            true
                        }
                        None => false,
                    }
                };
                let cursor = JsonCursor::arc(Json::Bool(updated), Type::Scalar("Boolean".into()), self.schema.clone(), env);
                PResult::Value((child, cursor))
            }
            other => PResult::err(Problem::from(EngineError::NoSuchRootField {
                tpe: "Query".to_string(),
                field: other.to_string(),
            })),
        }
    }
}

/// The "country" backend. Never bootstraps a root field of its own (countries are only
/// ever reached through a `Component` delegation from a city), so its `Mapping::root_cursor`
/// is unreachable in this fixture.
pub struct CountryInterpreter {
    store: Arc<Mutex<Vec<CountryRow>>>,
    schema: SchemaRef,
    config: EngineConfig,
}

#[async_trait]
impl Interpreter for CountryInterpreter {
    async fn run_root_value(&self, query: Query, root_tpe: Type, env: Env) -> PResult<ProtoJson> {
        let Query::Rename(result_name, boxed) = query else {
            return PResult::err(Problem::new("country interpreter received an unexpected root query shape"));
        };
        let (merged_env, select_tree) = match *boxed {
            Query::Environment(extra, inner) => {
                (env.bind(extra.iter().map(|(k, v)| (k.to_string(), v.clone()))), *inner)
            }
            other => (env, other),
        };
        let Some(code) = merged_env.get("code").and_then(Json::as_str).map(str::to_owned) else {
            return PResult::err(Problem::new("country join did not supply a country code"));
        };
        let row = {
            let store = self.store.lock().unwrap();
            store.iter().find(|r| r.code == code).cloned()
        };
        let Some(row) = row else {
            return PResult::err(Problem::from(EngineError::NoMatch));
        };
        let cursor = JsonCursor::arc(
            serde_json::json!({"code": row.code, "name": row.name}),
            root_tpe.clone(),
            self.schema.clone(),
            merged_env,
        );
        let me: InterpreterRef = Arc::new(CountryInterpreter {
            store: self.store.clone(),
            schema: self.schema.clone(),
            config: self.config,
        });
        run_value(Query::wrap(result_name, select_tree), root_tpe, cursor, &self.schema, &self.config, &me)
    }
}

pub struct CountryMapping {
    interpreter: InterpreterRef,
}

#[async_trait]
impl Mapping for CountryMapping {
    fn interpreter(&self) -> InterpreterRef {
        self.interpreter.clone()
    }

    async fn root_cursor(
        &self,
        _context: &Type,
        _field_name: &str,
        _alias: Option<&str>,
        _child: Query,
        _env: Env,
    ) -> PResult<(Query, CursorRef)> {
        PResult::err(Problem::new("country is never queried as a root field in this fixture"))
    }
}

/// The join run when a `City.country` field is delegated: reads the city-side cursor's raw
/// value (the country code, despite its declared type being `Country`) and binds it as
/// `code` for the country interpreter to pick back up.
fn country_join(cursor: &CursorRef, inner: &Query) -> PResult<Query> {
    let code = match cursor.as_leaf() {
        PResult::Value(v) | PResult::Both(_, v) => v,
        PResult::Errs(p) => return PResult::Errs(p),
    };
    let Query::Select(field_name, _args, _) = inner else {
        return PResult::err(Problem::new("country join expected a bare field select"));
    };
    let wrapped = Query::PossiblyRenamedSelect(Box::new(inner.clone()), field_name.clone());
    let env = Env::empty().bind([("code".to_string(), code)]);
    PResult::Value(Query::Environment(env, Box::new(wrapped)))
}

pub struct UnusedIntrospection;

#[async_trait]
impl Interpreter for UnusedIntrospection {
    async fn run_root_value(&self, _query: Query, _root_tpe: Type, _env: Env) -> PResult<ProtoJson> {
        unreachable!("no scenario in this fixture selects __typename")
    }
}

pub struct Fixture {
    pub schema: SchemaRef,
    pub config: EngineConfig,
    pub root_tpe: Type,
    pub primary: InterpreterRef,
    pub introspection: InterpreterRef,
    pub country_mapping: MappingRef,
}

pub fn fixture() -> Fixture {
    let schema = schema();
    let config = EngineConfig::default();

    let country_store = Arc::new(Mutex::new(seed_countries()));
    let country_interpreter: InterpreterRef =
        Arc::new(CountryInterpreter { store: country_store, schema: schema.clone(), config });
    let country_mapping: MappingRef = Arc::new(CountryMapping { interpreter: country_interpreter });

    let city_store = Arc::new(Mutex::new(CityStore { rows: seed_cities(), next_id: 1000 }));
    let primary: InterpreterRef = CityBackend::new(schema.clone(), config, city_store);

    Fixture {
        schema: schema.clone(),
        config,
        root_tpe: Type::Object("Query".into()),
        primary,
        introspection: Arc::new(UnusedIntrospection),
        country_mapping,
    }
}

/// `{ fieldName: <child> }` as a `(possibly renamed) select`, the shape every root and
/// nested field selection takes in this fixture's hand-built queries.
pub fn selected(field_name: &str, alias: &str, child: Query) -> Query {
    Query::PossiblyRenamedSelect(Box::new(Query::Select(field_name.to_string(), Args::new(), Box::new(child))), alias.to_string())
}

/// A leaf field with no further selection.
pub fn leaf(field_name: &str) -> Query {
    selected(field_name, field_name, Query::Group(Vec::new()))
}

pub fn group(fields: Vec<Query>) -> Query {
    if fields.len() == 1 { fields.into_iter().next().unwrap() } else { Query::Group(fields) }
}

/// Builds the `country { <sub> }` field, delegating through `mapping` via [`country_join`].
pub fn country_field(mapping: MappingRef, sub: Query) -> Query {
    selected(
        "country",
        "country",
        Query::Component { mapping, join: Join::new(country_join), child: Box::new(sub) },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_cities_carry_the_populations_scenario_s6_expects() {
        let rows = seed_cities();
        let populations: Vec<i64> = rows.iter().filter(|r| r.country_code == "USA").map(|r| r.population).collect();
        assert_eq!(populations, vec![10, 50, 30, 20, 40]);
    }
}
