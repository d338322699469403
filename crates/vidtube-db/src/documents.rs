//! Collection-level document operations. Every function here works on one
//! document at a time; SQLite gives per-statement atomicity and nothing more
//! is assumed by callers.

use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::Database;
use crate::pipeline::{Filter, Stage, run_pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Videos,
    Comments,
    Tweets,
    Subscriptions,
    Likes,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Videos => "videos",
            Self::Comments => "comments",
            Self::Tweets => "tweets",
            Self::Subscriptions => "subscriptions",
            Self::Likes => "likes",
        }
    }
}

/// SQL expression addressing a document field. `_id` maps to the key column
/// so primary-key lookups stay indexed.
pub(crate) fn field_expr(path: &str) -> Result<String> {
    if path == "_id" {
        return Ok("id".to_string());
    }
    let valid = !path.is_empty()
        && path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if !valid {
        bail!("Invalid field path: {:?}", path);
    }
    Ok(format!("json_extract(doc, '$.{}')", path))
}

/// Binds a JSON scalar the way `json_extract` returns it.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        compound => SqlValue::Text(compound.to_string()),
    }
}

fn document_id(doc: &Value) -> Result<&str> {
    doc.get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Document is missing a string _id"))
}

fn parse_doc(raw: String) -> Result<Value> {
    Ok(serde_json::from_str(&raw)?)
}

// -- Connection-level helpers, usable inside a snapshot or a writer lock --

pub(crate) fn insert_in(conn: &Connection, coll: Collection, doc: &Value) -> Result<()> {
    let id = document_id(doc)?;
    conn.execute(
        &format!("INSERT INTO {} (id, doc) VALUES (?1, ?2)", coll.table()),
        (id, doc.to_string()),
    )?;
    Ok(())
}

pub(crate) fn fetch_in(conn: &Connection, coll: Collection, id: &str) -> Result<Option<Value>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT doc FROM {} WHERE id = ?1", coll.table()))?;
    let mut rows = stmt.query([id])?;
    match rows.next()? {
        Some(row) => Ok(Some(parse_doc(row.get(0)?)?)),
        None => Ok(None),
    }
}

/// All documents matching `filter`, in insertion order.
pub(crate) fn scan_in(conn: &Connection, coll: Collection, filter: Option<&Filter>) -> Result<Vec<Value>> {
    let mut params = Vec::new();
    let clause = match filter {
        Some(f) => f.to_sql(&mut params)?,
        None => "1".to_string(),
    };
    let sql = format!(
        "SELECT doc FROM {} WHERE {} ORDER BY rowid",
        coll.table(),
        clause
    );

    let mut stmt = conn.prepare_cached(&sql)?;
    let docs = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(parse_doc)
        .collect::<Result<Vec<_>>>()?;

    Ok(docs)
}

pub(crate) fn update_fields_in(
    conn: &Connection,
    coll: Collection,
    id: &str,
    fields: &[(&str, Value)],
) -> Result<bool> {
    if fields.is_empty() {
        return Ok(fetch_in(conn, coll, id)?.is_some());
    }

    let mut assignments = Vec::with_capacity(fields.len());
    let mut params: Vec<SqlValue> = Vec::with_capacity(fields.len() + 1);
    for (path, value) in fields {
        if *path == "_id" {
            bail!("_id cannot be updated");
        }
        // field_expr validates the path
        field_expr(path)?;
        params.push(SqlValue::Text(value.to_string()));
        assignments.push(format!("'$.{}', json(?{})", path, params.len()));
    }
    params.push(SqlValue::Text(id.to_string()));

    let sql = format!(
        "UPDATE {} SET doc = json_set(doc, {}) WHERE id = ?{}",
        coll.table(),
        assignments.join(", "),
        params.len()
    );
    let changed = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
    Ok(changed == 1)
}

pub(crate) fn delete_in(conn: &Connection, coll: Collection, id: &str) -> Result<bool> {
    let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", coll.table()), [id])?;
    Ok(changed == 1)
}

impl Database {
    pub fn insert(&self, coll: Collection, doc: &Value) -> Result<()> {
        self.with_conn_mut(|conn| insert_in(conn, coll, doc))
    }

    pub fn get(&self, coll: Collection, id: &str) -> Result<Option<Value>> {
        self.with_conn(|conn| fetch_in(conn, coll, id))
    }

    pub fn find(&self, coll: Collection, filter: &Filter) -> Result<Vec<Value>> {
        self.with_conn(|conn| scan_in(conn, coll, Some(filter)))
    }

    pub fn find_one(&self, coll: Collection, filter: &Filter) -> Result<Option<Value>> {
        Ok(self.find(coll, filter)?.into_iter().next())
    }

    /// Sets individual fields, leaving the rest of the document untouched.
    pub fn update_fields(&self, coll: Collection, id: &str, fields: &[(&str, Value)]) -> Result<bool> {
        self.with_conn_mut(|conn| update_fields_in(conn, coll, id, fields))
    }

    /// Writes `new` into `field` only if it currently holds `expected`.
    /// The comparison and the write are one statement.
    pub fn compare_and_set(
        &self,
        coll: Collection,
        id: &str,
        field: &str,
        expected: &Value,
        new: &Value,
    ) -> Result<bool> {
        let current = field_expr(field)?;
        let sql = format!(
            "UPDATE {} SET doc = json_set(doc, '$.{}', json(?1)) WHERE id = ?2 AND {} IS ?3",
            coll.table(),
            field,
            current
        );
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                &sql,
                rusqlite::params![new.to_string(), id, to_sql_value(expected)],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn delete(&self, coll: Collection, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| delete_in(conn, coll, id))
    }

    /// Runs a pipeline against one consistent snapshot of the store.
    pub fn aggregate(&self, coll: Collection, stages: &[Stage]) -> Result<Vec<Value>> {
        self.with_snapshot(|conn| run_pipeline(conn, coll, stages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn insert_get_and_delete() {
        let db = db();
        let doc = json!({ "_id": "t1", "owner": "u1", "content": "hello" });
        db.insert(Collection::Tweets, &doc).unwrap();

        assert_eq!(db.get(Collection::Tweets, "t1").unwrap(), Some(doc));
        assert!(db.delete(Collection::Tweets, "t1").unwrap());
        assert!(!db.delete(Collection::Tweets, "t1").unwrap());
        assert_eq!(db.get(Collection::Tweets, "t1").unwrap(), None);
    }

    #[test]
    fn find_keeps_insertion_order() {
        let db = db();
        for id in ["c", "a", "b"] {
            db.insert(Collection::Tweets, &json!({ "_id": id, "owner": "u1" })).unwrap();
        }
        db.insert(Collection::Tweets, &json!({ "_id": "z", "owner": "u2" })).unwrap();

        let ids: Vec<_> = db
            .find(Collection::Tweets, &Filter::eq("owner", "u1"))
            .unwrap()
            .into_iter()
            .map(|d| d["_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn update_fields_is_partial() {
        let db = db();
        db.insert(Collection::Tweets, &json!({ "_id": "t1", "owner": "u1", "content": "a" }))
            .unwrap();

        let updated = db
            .update_fields(Collection::Tweets, "t1", &[("content", json!("b")), ("edited", json!(true))])
            .unwrap();
        assert!(updated);

        let doc = db.get(Collection::Tweets, "t1").unwrap().unwrap();
        assert_eq!(doc, json!({ "_id": "t1", "owner": "u1", "content": "b", "edited": true }));
        assert!(!db.update_fields(Collection::Tweets, "missing", &[("content", json!("x"))]).unwrap());
    }

    #[test]
    fn compare_and_set_only_writes_on_match() {
        let db = db();
        db.insert(Collection::Users, &json!({ "_id": "u1", "username": "a", "email": "a@x", "token": "old" }))
            .unwrap();

        assert!(!db.compare_and_set(Collection::Users, "u1", "token", &json!("stale"), &json!("new")).unwrap());
        assert!(db.compare_and_set(Collection::Users, "u1", "token", &json!("old"), &json!("new")).unwrap());
        assert!(!db.compare_and_set(Collection::Users, "u1", "token", &json!("old"), &json!("newer")).unwrap());

        let doc = db.get(Collection::Users, "u1").unwrap().unwrap();
        assert_eq!(doc["token"], "new");
    }

    #[test]
    fn unique_indexes_reject_duplicates() {
        let db = db();
        db.insert(Collection::Users, &json!({ "_id": "u1", "username": "a", "email": "a@x" })).unwrap();
        let dup = db
            .insert(Collection::Users, &json!({ "_id": "u2", "username": "a", "email": "b@x" }))
            .unwrap_err();
        assert!(crate::is_constraint_violation(&dup));

        let same_email = db
            .insert(Collection::Users, &json!({ "_id": "u3", "username": "c", "email": "a@x" }))
            .unwrap_err();
        assert!(crate::is_constraint_violation(&same_email));

        let not_sql = anyhow!("Document is missing a string _id");
        assert!(!crate::is_constraint_violation(&not_sql));
    }

    #[test]
    fn rejects_unsafe_field_paths() {
        assert!(field_expr("owner").is_ok());
        assert!(field_expr("subscriber.username").is_ok());
        assert!(field_expr("x') OR 1=1 --").is_err());
        assert!(field_expr("a..b").is_err());
    }
}
