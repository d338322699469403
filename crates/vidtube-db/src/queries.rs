use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use vidtube_types::models::{Comment, Edge, EdgeKind, Tweet, User, Video};

use crate::Database;
use crate::documents::{Collection, delete_in, fetch_in, insert_in, scan_in, update_fields_in};
use crate::pipeline::Filter;

/// Oldest entries are dropped once a history grows past this.
pub const WATCH_HISTORY_LIMIT: usize = 100;

/// Collection that stores edges of the given kind.
pub fn edge_collection(kind: EdgeKind) -> Collection {
    match kind {
        EdgeKind::Channel => Collection::Subscriptions,
        EdgeKind::Video | EdgeKind::Comment | EdgeKind::Tweet => Collection::Likes,
    }
}

/// Collection that holds the targets of edges of the given kind.
pub fn target_collection(kind: EdgeKind) -> Collection {
    match kind {
        EdgeKind::Channel => Collection::Users,
        EdgeKind::Video => Collection::Videos,
        EdgeKind::Comment => Collection::Comments,
        EdgeKind::Tweet => Collection::Tweets,
    }
}

fn to_doc<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn from_doc<T: DeserializeOwned>(doc: Option<Value>) -> Result<Option<T>> {
    doc.map(|d| serde_json::from_value(d).map_err(Into::into)).transpose()
}

fn now_millis() -> Value {
    json!(Utc::now().timestamp_millis())
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &User) -> Result<()> {
        self.insert(Collection::Users, &to_doc(user)?)
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        from_doc(self.get(Collection::Users, &id.to_string())?)
    }

    /// Usernames are stored lower-cased; the lookup normalizes too.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let filter = Filter::eq("username", username.trim().to_lowercase());
        from_doc(self.find_one(Collection::Users, &filter)?)
    }

    /// Usernames and emails are both stored lower-cased.
    pub fn find_user_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let mut any = Vec::new();
        if let Some(username) = username {
            any.push(Filter::eq("username", username.trim().to_lowercase()));
        }
        if let Some(email) = email {
            any.push(Filter::eq("email", email.trim().to_lowercase()));
        }
        if any.is_empty() {
            return Ok(None);
        }
        from_doc(self.find_one(Collection::Users, &Filter::Or(any))?)
    }

    /// Overwrites (or clears) the stored refresh token. Returns false if the
    /// user does not exist.
    pub fn set_refresh_token(&self, user_id: Uuid, token: Option<&str>) -> Result<bool> {
        self.update_fields(
            Collection::Users,
            &user_id.to_string(),
            &[("refreshToken", json!(token))],
        )
    }

    /// Replaces the stored refresh token only if it still equals `expected`.
    pub fn swap_refresh_token(&self, user_id: Uuid, expected: &str, next: &str) -> Result<bool> {
        self.compare_and_set(
            Collection::Users,
            &user_id.to_string(),
            "refreshToken",
            &json!(expected),
            &json!(next),
        )
    }

    pub fn update_password(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        self.update_fields(
            Collection::Users,
            &user_id.to_string(),
            &[("password", json!(password_hash)), ("updatedAt", now_millis())],
        )
    }

    pub fn update_account(&self, user_id: Uuid, full_name: &str, email: &str) -> Result<bool> {
        self.update_fields(
            Collection::Users,
            &user_id.to_string(),
            &[
                ("fullName", json!(full_name)),
                ("email", json!(email)),
                ("updatedAt", now_millis()),
            ],
        )
    }

    /// Moves `video_id` to the newest end of the user's history, dropping any
    /// earlier occurrence and trimming to `limit` entries.
    pub fn record_watch(&self, user_id: Uuid, video_id: Uuid, limit: usize) -> Result<bool> {
        let uid = user_id.to_string();
        self.with_conn_mut(|conn| {
            let Some(doc) = fetch_in(conn, Collection::Users, &uid)? else {
                return Ok(false);
            };
            let mut history: Vec<Uuid> = match doc.get("watchHistory") {
                Some(v) => serde_json::from_value(v.clone())?,
                None => Vec::new(),
            };

            history.retain(|id| *id != video_id);
            history.push(video_id);
            if history.len() > limit {
                let excess = history.len() - limit;
                history.drain(..excess);
            }

            update_fields_in(conn, Collection::Users, &uid, &[("watchHistory", json!(history))])
        })
    }

    // -- Videos --

    pub fn insert_video(&self, video: &Video) -> Result<()> {
        self.insert(Collection::Videos, &to_doc(video)?)
    }

    pub fn get_video(&self, id: Uuid) -> Result<Option<Video>> {
        from_doc(self.get(Collection::Videos, &id.to_string())?)
    }

    pub fn delete_video(&self, id: Uuid) -> Result<bool> {
        self.delete(Collection::Videos, &id.to_string())
    }

    // -- Comments & tweets --

    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.insert(Collection::Comments, &to_doc(comment)?)
    }

    pub fn insert_tweet(&self, tweet: &Tweet) -> Result<()> {
        self.insert(Collection::Tweets, &to_doc(tweet)?)
    }

    /// Deletes the tweet only if `owner` wrote it. Returns false otherwise,
    /// including when the tweet does not exist.
    pub fn delete_tweet(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let tid = id.to_string();
        self.with_conn_mut(|conn| {
            let Some(doc) = fetch_in(conn, Collection::Tweets, &tid)? else {
                return Ok(false);
            };
            if doc.get("owner").and_then(Value::as_str) != Some(owner.to_string().as_str()) {
                return Ok(false);
            }
            delete_in(conn, Collection::Tweets, &tid)
        })
    }

    // -- Edges --

    pub fn target_exists(&self, kind: EdgeKind, target: Uuid) -> Result<bool> {
        Ok(self.get(target_collection(kind), &target.to_string())?.is_some())
    }

    /// Toggle an edge: removes it if present, inserts it if not.
    /// Returns true if the edge now exists.
    pub fn toggle_edge(&self, source: Uuid, target: Uuid, kind: EdgeKind) -> Result<bool> {
        let coll = edge_collection(kind);
        let filter = Filter::And(vec![
            Filter::eq("source", source.to_string()),
            Filter::eq("target", target.to_string()),
            Filter::eq("kind", kind.as_str()),
        ]);

        self.with_conn_mut(|conn| {
            let existing = scan_in(conn, coll, Some(&filter))?;
            if let Some(edge) = existing.first() {
                let id = edge
                    .get("_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("Edge document without _id"))?;
                delete_in(conn, coll, id)?;
                Ok(false)
            } else {
                let edge = Edge {
                    id: Uuid::new_v4(),
                    source,
                    target,
                    kind,
                    created_at: Utc::now(),
                };
                insert_in(conn, coll, &to_doc(&edge)?)?;
                Ok(true)
            }
        })
    }
}
