//! Documents as they are stored in the collections. Field names follow the
//! stored JSON (`_id`, camelCase) so pipelines can address them directly.
//! Timestamps are stored as epoch milliseconds so they sort numerically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user. Every user is also a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    #[serde(default)]
    pub cover_image: String,
    /// Argon2id PHC string, never the plaintext.
    pub password: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Oldest first.
    #[serde(default)]
    pub watch_history: Vec<Uuid>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub owner: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    /// Seconds.
    pub duration: f64,
    #[serde(default)]
    pub views: u64,
    #[serde(default = "published_by_default")]
    pub is_published: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

fn published_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub video: Uuid,
    pub owner: Uuid,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub owner: Uuid,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// What an edge points at. `Channel` edges are subscriptions, the rest are likes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Channel,
    Video,
    Comment,
    Tweet,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Video => "video",
            Self::Comment => "comment",
            Self::Tweet => "tweet",
        }
    }

    /// Inverse of `as_str`. Case-sensitive, like the serde names.
    pub fn parse(raw: &str) -> Option<Self> {
        [Self::Channel, Self::Video, Self::Comment, Self::Tweet]
            .into_iter()
            .find(|kind| kind.as_str() == raw)
    }

    pub fn is_likeable(self) -> bool {
        !matches!(self, Self::Channel)
    }
}

/// A directed relation. The edge existing is the state; there is no flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub source: Uuid,
    pub target: Uuid,
    pub kind: EdgeKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_document_uses_stored_field_names() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice".into(),
            avatar: "https://cdn.example.com/a.png".into(),
            cover_image: String::new(),
            password: "$argon2id$stub".into(),
            refresh_token: None,
            watch_history: vec![],
            created_at: now,
            updated_at: now,
        };

        let doc = serde_json::to_value(&user).unwrap();
        assert_eq!(doc["_id"], serde_json::json!(user.id));
        assert_eq!(doc["fullName"], "Alice");
        assert!(doc["refreshToken"].is_null());
        assert_eq!(doc["createdAt"], now.timestamp_millis());
    }

    #[test]
    fn edge_kind_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_value(EdgeKind::Tweet).unwrap(), "tweet");
        assert_eq!(EdgeKind::parse("comment"), Some(EdgeKind::Comment));
        assert_eq!(EdgeKind::parse("Video"), None);
        let kind: EdgeKind = serde_json::from_value(serde_json::json!("channel")).unwrap();
        assert_eq!(kind, EdgeKind::Channel);
        assert!(!kind.is_likeable());
    }
}
