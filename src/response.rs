//! `mk_response`: the bit-exact JSON response shape shared by §4.E and §6.

use serde_json::{Map, Value as Json};

use crate::error::Problem;

/// Builds the final response envelope.
///
/// - `{"data": D}` when data is present and there are no problems.
/// - `{"errors": [...], "data": D}` (errors first) when both are present.
/// - `{"errors": [...]}` when only problems are present.
/// - `{"errors": [{"message": "Invalid query", "locations": [], "path": []}]}` when neither
///   data nor problems are present.
pub fn mk_response(problems: Vec<Problem>, data: Option<Json>) -> Json {
    let errors: Vec<Json> = problems.into_iter().map(problem_to_json).collect();

    match (data, errors.is_empty()) {
        (Some(d), true) => {
            let mut obj = Map::with_capacity(1);
            obj.insert("data".to_string(), d);
            Json::Object(obj)
        }
        (Some(d), false) => {
            let mut obj = Map::with_capacity(2);
            obj.insert("errors".to_string(), Json::Array(errors));
            obj.insert("data".to_string(), d);
            Json::Object(obj)
        }
        (None, false) => {
            let mut obj = Map::with_capacity(1);
            obj.insert("errors".to_string(), Json::Array(errors));
            Json::Object(obj)
        }
        (None, true) => {
            let mut obj = Map::with_capacity(1);
            obj.insert("errors".to_string(), Json::Array(vec![invalid_query_error()]));
            Json::Object(obj)
        }
    }
}

fn invalid_query_error() -> Json {
    let mut obj = Map::with_capacity(3);
    obj.insert("message".to_string(), Json::String("Invalid query".to_string()));
    obj.insert("locations".to_string(), Json::Array(Vec::new()));
    obj.insert("path".to_string(), Json::Array(Vec::new()));
    Json::Object(obj)
}

fn problem_to_json(p: Problem) -> Json {
    let mut obj = Map::with_capacity(3);
    obj.insert("message".to_string(), Json::String(p.message));
    let locations = p
        .locations
        .into_iter()
        .map(|l| {
            let mut loc = Map::with_capacity(2);
            loc.insert("line".to_string(), Json::from(l.line));
            loc.insert("column".to_string(), Json::from(l.column));
            Json::Object(loc)
        })
        .collect();
    obj.insert("locations".to_string(), Json::Array(locations));
    obj.insert("path".to_string(), Json::Array(p.path.into_iter().map(Json::String).collect()));
    Json::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_only_has_no_errors_key() {
        let resp = mk_response(Vec::new(), Some(serde_json::json!({"a": 1})));
        assert_eq!(resp, serde_json::json!({"data": {"a": 1}}));
    }

    #[test]
    fn errors_appear_before_data_when_both_present() {
        let resp = mk_response(vec![Problem::new("boom")], Some(Json::Null));
        let obj = resp.as_object().unwrap();
        let keys: Vec<_> = obj.keys().cloned().collect();
        assert_eq!(keys, vec!["errors".to_string(), "data".to_string()]);
    }

    #[test]
    fn errors_only_when_no_data() {
        let resp = mk_response(vec![Problem::new("boom")], None);
        assert_eq!(
            resp,
            serde_json::json!({"errors": [{"message": "boom", "locations": [], "path": []}]})
        );
    }

    #[test]
    fn neither_data_nor_errors_yields_synthetic_invalid_query() {
        let resp = mk_response(Vec::new(), None);
        assert_eq!(
            resp,
            serde_json::json!({"errors": [{"message": "Invalid query", "locations": [], "path": []}]})
        );
    }
}
