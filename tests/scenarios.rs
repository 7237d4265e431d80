//! End-to-end scenarios driven through `run_root` against the two-backend fixture, plus a
//! couple of cases (`Unique` cardinality) exercised directly through `run_value` since they
//! don't need a root bootstrap at all.

use std::sync::Arc;

use serde_json::json;

use meshql_core::query::{OrderBy, OrderDirection, OrderSelection};
use meshql_core::testutil::{JsonCursor, country_field, fixture, group, leaf, selected};
use meshql_core::{Env, PResult, ProtoJson, Query, Term, Type, complete, run_root, run_value};

#[tokio::test]
async fn s1_simple_field_read() {
    let f = fixture();
    let query = selected("city", "city", leaf("name"));
    let env = Env::empty().bind([("id".to_string(), json!(2))]);

    let (problems, data) = run_root(&f.primary, &f.introspection, query, f.root_tpe.clone(), env, &f.config).await;

    assert!(problems.is_empty(), "{problems:?}");
    assert_eq!(data, json!({"city": {"name": "Qandahar"}}));
}

#[tokio::test]
async fn s2_cross_mapping_staging_after_mutation() {
    let f = fixture();

    let update = selected("updatePopulation", "updatePopulation", Query::Group(Vec::new()));
    let update_env = Env::empty().bind([("id".to_string(), json!(2)), ("population".to_string(), json!(12345))]);
    let (problems, _) =
        run_root(&f.primary, &f.introspection, update, f.root_tpe.clone(), update_env, &f.config).await;
    assert!(problems.is_empty(), "{problems:?}");

    let selection = group(vec![
        leaf("name"),
        leaf("population"),
        country_field(f.country_mapping.clone(), leaf("name")),
    ]);
    let query = selected("city", "city", selection);
    let env = Env::empty().bind([("id".to_string(), json!(2))]);

    let (problems, data) = run_root(&f.primary, &f.introspection, query, f.root_tpe.clone(), env, &f.config).await;

    assert!(problems.is_empty(), "{problems:?}");
    assert_eq!(
        data,
        json!({"city": {"name": "Qandahar", "population": 12345, "country": {"name": "Afghanistan"}}})
    );
}

#[tokio::test]
async fn s3_post_insert_elaboration() {
    let f = fixture();
    let selection = group(vec![
        leaf("name"),
        leaf("population"),
        country_field(f.country_mapping.clone(), leaf("name")),
    ]);
    let query = selected("createCity", "createCity", selection);
    let env = Env::empty().bind([
        ("name".to_string(), json!("Wiggum")),
        ("countryCode".to_string(), json!("USA")),
        ("population".to_string(), json!(789)),
    ]);

    let (problems, data) = run_root(&f.primary, &f.introspection, query, f.root_tpe.clone(), env, &f.config).await;

    assert!(problems.is_empty(), "{problems:?}");
    assert_eq!(
        data,
        json!({"createCity": {"name": "Wiggum", "population": 789, "country": {"name": "United States"}}})
    );
}

fn population_list_cursor(f: &meshql_core::testutil::Fixture) -> Arc<dyn meshql_core::Cursor> {
    let cities = json!([
        {"population": 10}, {"population": 50}, {"population": 30}, {"population": 20}, {"population": 40},
    ]);
    JsonCursor::arc(cities, Type::Object("City".into()).list(), f.schema.clone(), Env::empty())
}

#[test]
fn s4_unique_with_no_match_is_null_when_nullable() {
    let f = fixture();
    let pred = Term::Eql(
        Box::new(Term::UniquePath(vec!["population".into()])),
        Box::new(Term::Const(json!(99_999))),
    );
    let query = Query::Unique(Box::new(Query::FilterOrderByOffsetLimit {
        pred: Some(pred),
        order_by: None,
        offset: None,
        limit: None,
        child: Box::new(leaf("population")),
    }));

    let result = run_value(
        query,
        Type::Object("City".into()).nullable(),
        population_list_cursor(&f),
        &f.schema,
        &f.config,
        &f.primary,
    );

    match result {
        PResult::Value(ProtoJson::Concrete(serde_json::Value::Null)) => {}
        other => panic!("expected a concrete null, got {other:?}"),
    }
}

#[test]
fn s5_unique_with_multiple_matches_is_an_error() {
    let f = fixture();
    let pred = Term::Gt(Box::new(Term::UniquePath(vec!["population".into()])), Box::new(Term::Const(json!(15))));
    let query = Query::Unique(Box::new(Query::FilterOrderByOffsetLimit {
        pred: Some(pred),
        order_by: None,
        offset: None,
        limit: None,
        child: Box::new(leaf("population")),
    }));

    let result = run_value(
        query,
        Type::Object("City".into()).nullable(),
        population_list_cursor(&f),
        &f.schema,
        &f.config,
        &f.primary,
    );

    match result {
        PResult::Errs(problems) => {
            assert_eq!(problems.len(), 1);
            assert_eq!(problems[0].message, "Multiple matches");
        }
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn s6_filter_order_offset_limit() {
    let f = fixture();
    let pred = Term::Gt(Box::new(Term::UniquePath(vec!["population".into()])), Box::new(Term::Const(json!(15))));
    let order_by = OrderBy(vec![OrderSelection {
        term: Term::UniquePath(vec!["population".into()]),
        direction: OrderDirection::Desc,
    }]);
    let query = Query::FilterOrderByOffsetLimit {
        pred: Some(pred),
        order_by: Some(order_by),
        offset: Some(1),
        limit: Some(2),
        child: Box::new(leaf("population")),
    };

    let result = run_value(
        query,
        Type::Object("City".into()).list(),
        population_list_cursor(&f),
        &f.schema,
        &f.config,
        &f.primary,
    );
    let (problems, value) = result.into_parts();
    assert!(problems.is_empty(), "{problems:?}");

    let (complete_problems, data) = complete(value.expect("a value"), &f.config).await;
    assert!(complete_problems.is_empty(), "{complete_problems:?}");
    assert_eq!(data, json!([{"population": 40}, {"population": 30}]));
}
