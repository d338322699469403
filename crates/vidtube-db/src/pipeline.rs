//! Typed aggregation pipelines over document collections.
//!
//! A pipeline starts from one anchor collection and transforms the stream of
//! documents stage by stage. A leading [`Stage::Match`] is pushed down into
//! SQL; every later stage runs in memory. [`Stage::Lookup`] issues one
//! indexed query per local key on the same connection, so a pipeline run
//! through [`Database::aggregate`](crate::Database::aggregate) sees a single
//! snapshot.

use std::cmp::Ordering;

use anyhow::Result;
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

use crate::documents::{Collection, field_expr, scan_in, to_sql_value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value. A missing field equals `null`.
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Field present and not `null`.
    Exists(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::Eq(path.to_string(), value.into())
    }

    pub fn exists(path: &str) -> Self {
        Self::Exists(path.to_string())
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Eq(path, expected) => resolve(doc, path).unwrap_or(Value::Null) == *expected,
            Self::In(path, options) => {
                let actual = resolve(doc, path).unwrap_or(Value::Null);
                options.contains(&actual)
            }
            Self::Exists(path) => !matches!(resolve(doc, path), None | Some(Value::Null)),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }

    pub(crate) fn to_sql(&self, params: &mut Vec<SqlValue>) -> Result<String> {
        let sql = match self {
            Self::Eq(path, value) => {
                params.push(to_sql_value(value));
                format!("{} IS ?{}", field_expr(path)?, params.len())
            }
            Self::In(path, values) => {
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let field = field_expr(path)?;
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| {
                        params.push(to_sql_value(v));
                        format!("?{}", params.len())
                    })
                    .collect();
                format!("{} IN ({})", field, placeholders.join(", "))
            }
            Self::Exists(path) => format!("{} IS NOT NULL", field_expr(path)?),
            Self::And(filters) => join_sql(filters, " AND ", "1", params)?,
            Self::Or(filters) => join_sql(filters, " OR ", "0", params)?,
        };
        Ok(sql)
    }
}

fn join_sql(filters: &[Filter], sep: &str, empty: &str, params: &mut Vec<SqlValue>) -> Result<String> {
    if filters.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = filters
        .iter()
        .map(|f| f.to_sql(params).map(|s| format!("({})", s)))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(sep))
}

/// Computed field value for [`Stage::AddFields`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(Value),
    /// Length of an array field, 0 when absent.
    Size(String),
    /// First element of an array field, `null` when empty.
    First(String),
    /// Whether the (possibly array-valued) path holds `needle`.
    Contains { needle: Value, path: String },
}

impl Expr {
    fn eval(&self, doc: &Value) -> Value {
        match self {
            Self::Field(path) => resolve(doc, path).unwrap_or(Value::Null),
            Self::Literal(v) => v.clone(),
            Self::Size(path) => match resolve(doc, path) {
                Some(Value::Array(items)) => Value::from(items.len() as u64),
                _ => Value::from(0u64),
            },
            Self::First(path) => match resolve(doc, path) {
                Some(Value::Array(items)) => items.into_iter().next().unwrap_or(Value::Null),
                Some(other) => other,
                None => Value::Null,
            },
            Self::Contains { needle, path } => {
                let found = match resolve(doc, path) {
                    Some(Value::Array(items)) => items.contains(needle),
                    Some(other) => other == *needle,
                    None => false,
                };
                Value::Bool(found)
            }
        }
    }
}

/// Joins each document against `from`, storing the matches as an array
/// under `as_field`. An array-valued local field is resolved element by
/// element, keeping its order and duplicates; keys with no match contribute
/// nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: Collection,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
    /// Applied to the matches of each key.
    pub pipeline: Vec<Stage>,
}

impl Lookup {
    pub fn new(from: Collection, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        Self {
            from,
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
            pipeline: Vec::new(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Vec<Stage>) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Lookup(Lookup),
    /// One output document per element of the array at the path. Documents
    /// with an empty or missing array are dropped.
    Unwind(String),
    AddFields(Vec<(String, Expr)>),
    /// Keeps `_id` and the listed paths.
    Project(Vec<String>),
    /// Stable: documents with equal keys keep their incoming order.
    Sort { path: String, descending: bool },
    Skip(usize),
    Limit(usize),
}

impl Stage {
    pub fn add_field(name: &str, expr: Expr) -> Self {
        Self::AddFields(vec![(name.to_string(), expr)])
    }

    pub fn project(paths: &[&str]) -> Self {
        Self::Project(paths.iter().map(|p| p.to_string()).collect())
    }
}

pub(crate) fn run_pipeline(conn: &Connection, from: Collection, stages: &[Stage]) -> Result<Vec<Value>> {
    let (seed, rest) = match stages.split_first() {
        Some((Stage::Match(filter), rest)) => (scan_in(conn, from, Some(filter))?, rest),
        _ => (scan_in(conn, from, None)?, stages),
    };
    apply_stages(conn, seed, rest)
}

fn apply_stages(conn: &Connection, mut docs: Vec<Value>, stages: &[Stage]) -> Result<Vec<Value>> {
    for stage in stages {
        docs = apply_stage(conn, docs, stage)?;
    }
    Ok(docs)
}

fn apply_stage(conn: &Connection, docs: Vec<Value>, stage: &Stage) -> Result<Vec<Value>> {
    let out = match stage {
        Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
        Stage::Lookup(lookup) => docs
            .into_iter()
            .map(|d| join(conn, d, lookup))
            .collect::<Result<Vec<_>>>()?,
        Stage::Unwind(path) => docs
            .into_iter()
            .flat_map(|doc| match resolve(&doc, path) {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| {
                        let mut copy = doc.clone();
                        set_path(&mut copy, path, item);
                        copy
                    })
                    .collect::<Vec<_>>(),
                Some(Value::Null) | None => Vec::new(),
                Some(_) => vec![doc],
            })
            .collect(),
        Stage::AddFields(fields) => docs
            .into_iter()
            .map(|mut doc| {
                // Every expression sees the document as it entered the stage.
                let values: Vec<Value> = fields.iter().map(|(_, expr)| expr.eval(&doc)).collect();
                for ((name, _), value) in fields.iter().zip(values) {
                    set_path(&mut doc, name, value);
                }
                doc
            })
            .collect(),
        Stage::Project(paths) => docs.into_iter().map(|doc| project(&doc, paths)).collect(),
        Stage::Sort { path, descending } => {
            let mut docs = docs;
            docs.sort_by(|a, b| {
                let ord = compare_values(
                    &resolve(a, path).unwrap_or(Value::Null),
                    &resolve(b, path).unwrap_or(Value::Null),
                );
                if *descending { ord.reverse() } else { ord }
            });
            docs
        }
        Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
        Stage::Limit(n) => docs.into_iter().take(*n).collect(),
    };
    Ok(out)
}

fn join(conn: &Connection, mut doc: Value, lookup: &Lookup) -> Result<Value> {
    let keys = match resolve(&doc, &lookup.local_field) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(key) => vec![key],
    };

    let mut joined = Vec::new();
    for key in keys {
        let filter = Filter::Eq(lookup.foreign_field.clone(), key);
        let matches = scan_in(conn, lookup.from, Some(&filter))?;
        joined.extend(apply_stages(conn, matches, &lookup.pipeline)?);
    }

    set_path(&mut doc, &lookup.as_field, Value::Array(joined));
    Ok(doc)
}

fn project(doc: &Value, paths: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    if let Some(id) = doc.get("_id") {
        set_path(&mut out, "_id", id.clone());
    }
    for path in paths {
        if let Some(value) = resolve(doc, path) {
            set_path(&mut out, path, value);
        }
    }
    out
}

/// Reads a dotted path. Crossing an array maps the rest of the path over its
/// elements, so `subscribers.source` yields the array of sources.
pub fn resolve(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(doc, &segments)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let Some((head, tail)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => map.get(*head).and_then(|next| resolve_segments(next, tail)),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| resolve_segments(item, segments))
                .collect(),
        )),
        _ => None,
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = doc;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        current = ensure_object(current)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(current).insert(last.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("replaced with an object above"),
    }
}

/// Total order used by [`Stage::Sort`]: null < bool < number < string <
/// everything else.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .total_cmp(&y.as_f64().unwrap_or_default()),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use serde_json::json;

    fn ids(docs: &[Value]) -> Vec<&str> {
        docs.iter().map(|d| d["_id"].as_str().unwrap()).collect()
    }

    #[test]
    fn resolve_maps_over_arrays() {
        let doc = json!({ "subs": [{ "source": "a" }, { "source": "b" }, { "other": 1 }] });
        assert_eq!(resolve(&doc, "subs.source"), Some(json!(["a", "b"])));
        assert_eq!(resolve(&doc, "missing"), None);
    }

    #[test]
    fn set_path_creates_nested_objects() {
        let mut doc = json!({ "_id": "x" });
        set_path(&mut doc, "owner.username", json!("bob"));
        assert_eq!(doc, json!({ "_id": "x", "owner": { "username": "bob" } }));
    }

    #[test]
    fn filters_agree_in_memory() {
        let doc = json!({ "_id": "1", "kind": "video", "target": "t" });
        assert!(Filter::eq("kind", "video").matches(&doc));
        assert!(Filter::eq("refreshToken", Value::Null).matches(&doc));
        assert!(Filter::Or(vec![Filter::eq("kind", "tweet"), Filter::eq("target", "t")]).matches(&doc));
        assert!(!Filter::And(vec![Filter::eq("kind", "video"), Filter::exists("nope")]).matches(&doc));
        assert!(Filter::In("kind".into(), vec![json!("comment"), json!("video")]).matches(&doc));
    }

    #[test]
    fn lookup_over_array_keeps_local_order_and_drops_missing() {
        let db = Database::open_in_memory().unwrap();
        for id in ["v1", "v2", "v3"] {
            db.insert(Collection::Videos, &json!({ "_id": id, "owner": "u1" })).unwrap();
        }
        db.insert(Collection::Tweets, &json!({ "_id": "anchor", "refs": ["v3", "gone", "v1", "v3"] }))
            .unwrap();

        let out = db
            .aggregate(
                Collection::Tweets,
                &[
                    Stage::Match(Filter::eq("_id", "anchor")),
                    Stage::Lookup(Lookup::new(Collection::Videos, "refs", "_id", "refs")),
                ],
            )
            .unwrap();

        assert_eq!(out.len(), 1);
        let refs = out[0]["refs"].as_array().unwrap();
        assert_eq!(ids(refs), ["v3", "v1", "v3"]);
    }

    #[test]
    fn nested_lookup_with_first_and_project() {
        let db = Database::open_in_memory().unwrap();
        db.insert(
            Collection::Users,
            &json!({ "_id": "u1", "username": "ann", "email": "a@x", "password": "secret" }),
        )
        .unwrap();
        db.insert(Collection::Videos, &json!({ "_id": "v1", "owner": "u1", "title": "t" })).unwrap();

        let out = db
            .aggregate(
                Collection::Videos,
                &[
                    Stage::Lookup(
                        Lookup::new(Collection::Users, "owner", "_id", "owner")
                            .with_pipeline(vec![Stage::project(&["username"])]),
                    ),
                    Stage::add_field("owner", Expr::First("owner".into())),
                ],
            )
            .unwrap();

        assert_eq!(out[0]["owner"], json!({ "_id": "u1", "username": "ann" }));
        assert_eq!(out[0]["title"], "t");
    }

    #[test]
    fn add_fields_computes_sizes_and_membership() {
        let doc = json!({ "_id": "c", "subs": [{ "source": "a" }, { "source": "b" }] });
        let out = apply_stage(
            &Connection::open_in_memory().unwrap(),
            vec![doc],
            &Stage::AddFields(vec![
                ("count".into(), Expr::Size("subs".into())),
                ("hasA".into(), Expr::Contains { needle: json!("a"), path: "subs.source".into() }),
                ("hasZ".into(), Expr::Contains { needle: json!("z"), path: "subs.source".into() }),
            ]),
        )
        .unwrap();

        assert_eq!(out[0]["count"], 2);
        assert_eq!(out[0]["hasA"], true);
        assert_eq!(out[0]["hasZ"], false);
    }

    #[test]
    fn unwind_sort_and_limit() {
        let conn = Connection::open_in_memory().unwrap();
        let docs = vec![json!({ "_id": "a", "xs": [3, 1, 2] }), json!({ "_id": "b", "xs": [] })];

        let out = apply_stages(
            &conn,
            docs,
            &[
                Stage::Unwind("xs".into()),
                Stage::Sort { path: "xs".into(), descending: true },
                Stage::Limit(2),
            ],
        )
        .unwrap();

        let xs: Vec<_> = out.iter().map(|d| d["xs"].as_i64().unwrap()).collect();
        assert_eq!(xs, [3, 2]);
    }

    #[test]
    fn skip_then_limit_pages() {
        let conn = Connection::open_in_memory().unwrap();
        let docs: Vec<_> = (0..5).map(|i| json!({ "_id": format!("d{}", i), "n": i })).collect();

        let page = |skip: usize| {
            apply_stages(
                &conn,
                docs.clone(),
                &[
                    Stage::Sort { path: "n".into(), descending: true },
                    Stage::Skip(skip),
                    Stage::Limit(2),
                ],
            )
            .unwrap()
        };

        assert_eq!(ids(&page(0)), ["d4", "d3"]);
        assert_eq!(ids(&page(2)), ["d2", "d1"]);
        assert_eq!(ids(&page(4)), ["d0"]);
        assert!(page(10).is_empty());
    }
}
