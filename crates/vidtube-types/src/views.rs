//! Read models assembled by joining collections. None of these are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Comment, EdgeKind, Tweet, Video};

/// The public face of a user when embedded in another view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
    #[serde(default)]
    pub cover_image: String,
    pub subscribers_count: u64,
    pub channels_subscribed_to_count: u64,
    pub is_subscribed: bool,
}

/// A watched video with its owner narrowed to a [`UserSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedVideo {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub is_published: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// `None` when the owner account no longer exists.
    pub owner: Option<UserSummary>,
}

/// One page of a video's comments, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    /// Across all pages.
    pub total_comments: u64,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LikedContent {
    Video(Video),
    Comment(Comment),
    Tweet(Tweet),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikedTarget {
    /// Id of the like edge, not of the target.
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub kind: EdgeKind,
    pub liked_at: DateTime<Utc>,
    pub target: LikedContent,
}
