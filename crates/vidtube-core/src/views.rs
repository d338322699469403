//! Read models built from pipelines. Each view runs as a single
//! [`Database::aggregate`] call, so all counts and joins inside one view come
//! from the same snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use vidtube_db::queries::target_collection;
use vidtube_db::{Collection, Database, Expr, Filter, Lookup, Stage};
use vidtube_types::models::{EdgeKind, Tweet, Video};
use vidtube_types::views::{ChannelProfile, CommentPage, EnrichedVideo, LikedContent, LikedTarget, UserSummary};

use crate::error::{CoreError, CoreResult};
use crate::run_blocking;

const SUMMARY_FIELDS: &[&str] = &["username", "fullName", "avatar"];

/// Upper bound on `limit` for paginated views.
pub const MAX_PAGE_SIZE: usize = 100;

fn newest_first() -> Stage {
    Stage::Sort {
        path: "createdAt".into(),
        descending: true,
    }
}

pub fn channel_profile_pipeline(viewer_id: Uuid, username: &str) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::eq("username", username.trim().to_lowercase())),
        Stage::Lookup(Lookup::new(Collection::Subscriptions, "_id", "target", "subscribers")),
        Stage::Lookup(Lookup::new(Collection::Subscriptions, "_id", "source", "subscribedTo")),
        Stage::AddFields(vec![
            ("subscribersCount".into(), Expr::Size("subscribers".into())),
            ("channelsSubscribedToCount".into(), Expr::Size("subscribedTo".into())),
            (
                "isSubscribed".into(),
                Expr::Contains {
                    needle: Value::String(viewer_id.to_string()),
                    path: "subscribers.source".into(),
                },
            ),
        ]),
        Stage::project(&[
            "username",
            "fullName",
            "avatar",
            "coverImage",
            "subscribersCount",
            "channelsSubscribedToCount",
            "isSubscribed",
        ]),
    ]
}

pub fn watch_history_pipeline(user_id: Uuid) -> Vec<Stage> {
    let owner = Lookup::new(Collection::Users, "owner", "_id", "owner")
        .with_pipeline(vec![Stage::project(SUMMARY_FIELDS)]);

    vec![
        Stage::Match(Filter::eq("_id", user_id.to_string())),
        Stage::Lookup(
            Lookup::new(Collection::Videos, "watchHistory", "_id", "watchHistory").with_pipeline(vec![
                Stage::Lookup(owner),
                Stage::add_field("owner", Expr::First("owner".into())),
            ]),
        ),
        Stage::project(&["watchHistory"]),
    ]
}

pub fn liked_targets_pipeline(user_id: Uuid, kind: EdgeKind) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::And(vec![
            Filter::eq("source", user_id.to_string()),
            Filter::eq("kind", kind.as_str()),
        ])),
        Stage::Lookup(Lookup::new(target_collection(kind), "target", "_id", "target")),
        Stage::add_field("target", Expr::First("target".into())),
        Stage::Match(Filter::exists("target")),
        Stage::project(&["kind", "createdAt", "target"]),
    ]
}

/// Edges on `anchor` joined to the user on the `other` end, one summary each.
fn edge_users_pipeline(anchor: &str, anchor_id: Uuid, other: &str) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::And(vec![
            Filter::eq(anchor, anchor_id.to_string()),
            Filter::eq("kind", EdgeKind::Channel.as_str()),
        ])),
        Stage::Lookup(
            Lookup::new(Collection::Users, other, "_id", "user")
                .with_pipeline(vec![Stage::project(SUMMARY_FIELDS)]),
        ),
        Stage::Unwind("user".into()),
        Stage::project(&["user"]),
    ]
}

pub fn channel_videos_pipeline(owner_id: Uuid) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::And(vec![
            Filter::eq("owner", owner_id.to_string()),
            Filter::eq("isPublished", true),
        ])),
        newest_first(),
    ]
}

/// The video itself, its comment count, and one page of its comments.
/// `page` starts at 1.
pub fn video_comments_pipeline(video_id: Uuid, page: usize, limit: usize) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::eq("_id", video_id.to_string())),
        Stage::Lookup(Lookup::new(Collection::Comments, "_id", "video", "allComments")),
        Stage::add_field("totalComments", Expr::Size("allComments".into())),
        Stage::Lookup(
            Lookup::new(Collection::Comments, "_id", "video", "comments").with_pipeline(vec![
                newest_first(),
                Stage::Skip(page.saturating_sub(1).saturating_mul(limit)),
                Stage::Limit(limit),
            ]),
        ),
        Stage::project(&["comments", "totalComments"]),
    ]
}

pub fn user_tweets_pipeline(owner_id: Uuid) -> Vec<Stage> {
    vec![
        Stage::Match(Filter::eq("owner", owner_id.to_string())),
        newest_first(),
    ]
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LikedRow {
    #[serde(rename = "_id")]
    id: Uuid,
    kind: EdgeKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    target: Value,
}

fn decode<T: DeserializeOwned>(value: Value) -> CoreResult<T> {
    serde_json::from_value(value).map_err(|e| CoreError::Persistence(e.into()))
}

/// Builds the joined read models. Holds only a handle to the store.
#[derive(Clone)]
pub struct ViewBuilder {
    db: Arc<Database>,
}

impl ViewBuilder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn aggregate(&self, coll: Collection, stages: Vec<Stage>) -> CoreResult<Vec<Value>> {
        run_blocking(&self.db, move |db| db.aggregate(coll, &stages)).await
    }

    pub async fn build_channel_profile(&self, viewer_id: Uuid, username: &str) -> CoreResult<ChannelProfile> {
        if username.trim().is_empty() {
            return Err(CoreError::Validation("username is missing".into()));
        }

        let docs = self
            .aggregate(Collection::Users, channel_profile_pipeline(viewer_id, username))
            .await?;
        let doc = docs.into_iter().next().ok_or(CoreError::NotFound("channel"))?;
        decode(doc)
    }

    /// Oldest first. Videos deleted since they were watched are skipped.
    pub async fn build_watch_history(&self, user_id: Uuid) -> CoreResult<Vec<EnrichedVideo>> {
        let docs = self
            .aggregate(Collection::Users, watch_history_pipeline(user_id))
            .await?;
        let mut doc = docs.into_iter().next().ok_or(CoreError::NotFound("user"))?;
        let history = doc
            .get_mut("watchHistory")
            .map(Value::take)
            .unwrap_or(Value::Array(Vec::new()));

        let videos: Vec<EnrichedVideo> = decode(history)?;
        debug!(user_id = %user_id, entries = videos.len(), "Built watch history");
        Ok(videos)
    }

    /// Liked items of one kind, in the order they were liked. Likes whose
    /// target was deleted are skipped.
    pub async fn build_liked_targets(&self, user_id: Uuid, kind: EdgeKind) -> CoreResult<Vec<LikedTarget>> {
        if !kind.is_likeable() {
            return Err(CoreError::Validation(format!("{} cannot be liked", kind.as_str())));
        }
        let docs = self
            .aggregate(Collection::Likes, liked_targets_pipeline(user_id, kind))
            .await?;

        docs.into_iter()
            .map(|doc| {
                let row: LikedRow = decode(doc)?;
                let target = match row.kind {
                    EdgeKind::Video => LikedContent::Video(decode(row.target)?),
                    EdgeKind::Comment => LikedContent::Comment(decode(row.target)?),
                    EdgeKind::Tweet => LikedContent::Tweet(decode(row.target)?),
                    EdgeKind::Channel => {
                        return Err(CoreError::Validation("channel cannot be liked".into()));
                    }
                };
                Ok(LikedTarget {
                    id: row.id,
                    kind: row.kind,
                    liked_at: row.created_at,
                    target,
                })
            })
            .collect()
    }

    pub async fn build_channel_subscribers(&self, channel_id: Uuid) -> CoreResult<Vec<UserSummary>> {
        let docs = self
            .aggregate(Collection::Subscriptions, edge_users_pipeline("target", channel_id, "source"))
            .await?;
        docs.into_iter()
            .map(|mut d| decode(d.get_mut("user").map(Value::take).unwrap_or_default()))
            .collect()
    }

    pub async fn build_subscribed_channels(&self, subscriber_id: Uuid) -> CoreResult<Vec<UserSummary>> {
        let docs = self
            .aggregate(Collection::Subscriptions, edge_users_pipeline("source", subscriber_id, "target"))
            .await?;
        docs.into_iter()
            .map(|mut d| decode(d.get_mut("user").map(Value::take).unwrap_or_default()))
            .collect()
    }

    pub async fn build_video_comments(&self, video_id: Uuid, page: usize, limit: usize) -> CoreResult<CommentPage> {
        if page == 0 {
            return Err(CoreError::Validation("page starts at 1".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(CoreError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let docs = self
            .aggregate(Collection::Videos, video_comments_pipeline(video_id, page, limit))
            .await?;
        let mut doc = docs.into_iter().next().ok_or(CoreError::NotFound("video"))?;
        let comments = decode(doc.get_mut("comments").map(Value::take).unwrap_or_default())?;
        let total_comments = decode(doc.get_mut("totalComments").map(Value::take).unwrap_or_default())?;

        Ok(CommentPage {
            comments,
            total_comments,
            page,
            limit,
        })
    }

    /// Newest first. An unknown owner simply has no tweets.
    pub async fn build_user_tweets(&self, owner_id: Uuid) -> CoreResult<Vec<Tweet>> {
        let docs = self
            .aggregate(Collection::Tweets, user_tweets_pipeline(owner_id))
            .await?;
        docs.into_iter().map(decode).collect()
    }

    /// Published videos of one owner, newest first.
    pub async fn build_channel_videos(&self, owner_id: Uuid) -> CoreResult<Vec<Video>> {
        let docs = self
            .aggregate(Collection::Videos, channel_videos_pipeline(owner_id))
            .await?;
        docs.into_iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vidtube_db::queries::WATCH_HISTORY_LIMIT;
    use vidtube_types::models::{Comment, Tweet, User};

    fn user(db: &Database, username: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: format!("{}@example.com", username),
            full_name: format!("{} Example", username),
            avatar: format!("{}.png", username),
            cover_image: String::new(),
            password: "hash".into(),
            refresh_token: Some("secret-refresh".into()),
            watch_history: vec![],
            created_at: now,
            updated_at: now,
        };
        db.create_user(&user).unwrap();
        user
    }

    fn video(db: &Database, owner: Uuid, title: &str) -> Video {
        video_at(db, owner, title, Utc::now(), true)
    }

    fn video_at(
        db: &Database,
        owner: Uuid,
        title: &str,
        created_at: DateTime<Utc>,
        is_published: bool,
    ) -> Video {
        let video = Video {
            id: Uuid::new_v4(),
            owner,
            title: title.into(),
            description: format!("about {}", title),
            video_file: format!("{}.mp4", title),
            thumbnail: format!("{}.jpg", title),
            duration: 12.5,
            views: 0,
            is_published,
            created_at,
        };
        db.insert_video(&video).unwrap();
        video
    }

    fn setup() -> (Arc<Database>, ViewBuilder) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let views = ViewBuilder::new(db.clone());
        (db, views)
    }

    #[tokio::test]
    async fn channel_profile_counts_and_viewer_flag() {
        let (db, views) = setup();
        let channel = user(&db, "creator");
        let viewer = user(&db, "viewer");
        let other = user(&db, "other");

        db.toggle_edge(viewer.id, channel.id, EdgeKind::Channel).unwrap();
        db.toggle_edge(other.id, channel.id, EdgeKind::Channel).unwrap();
        db.toggle_edge(channel.id, other.id, EdgeKind::Channel).unwrap();

        let profile = views.build_channel_profile(viewer.id, "Creator").await.unwrap();
        assert_eq!(profile.id, channel.id);
        assert_eq!(profile.subscribers_count, 2);
        assert_eq!(profile.channels_subscribed_to_count, 1);
        assert!(profile.is_subscribed);

        let as_other = views.build_channel_profile(other.id, "creator").await.unwrap();
        assert!(as_other.is_subscribed);
        let as_self = views.build_channel_profile(channel.id, "creator").await.unwrap();
        assert!(!as_self.is_subscribed);
    }

    #[tokio::test]
    async fn channel_profile_after_unsubscribe() {
        let (db, views) = setup();
        let channel = user(&db, "creator");
        let viewer = user(&db, "viewer");

        db.toggle_edge(viewer.id, channel.id, EdgeKind::Channel).unwrap();
        db.toggle_edge(viewer.id, channel.id, EdgeKind::Channel).unwrap();

        let profile = views.build_channel_profile(viewer.id, "creator").await.unwrap();
        assert_eq!(profile.subscribers_count, 0);
        assert!(!profile.is_subscribed);
    }

    #[tokio::test]
    async fn channel_profile_errors() {
        let (_db, views) = setup();
        let err = views.build_channel_profile(Uuid::new_v4(), "nobody").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let err = views.build_channel_profile(Uuid::new_v4(), "  ").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn channel_profile_never_exposes_secrets() {
        let (db, _views) = setup();
        let channel = user(&db, "creator");
        let docs = db
            .aggregate(Collection::Users, channel_profile_pipeline(channel.id, "creator").as_slice())
            .unwrap();

        let doc = &docs[0];
        assert!(doc.get("password").is_none());
        assert!(doc.get("refreshToken").is_none());
        assert!(doc.get("subscribers").is_none());
    }

    #[tokio::test]
    async fn watch_history_skips_deleted_videos_and_keeps_order() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let watcher = user(&db, "watcher");
        let first = video(&db, owner.id, "first");
        let doomed = video(&db, owner.id, "doomed");
        let last = video(&db, owner.id, "last");

        for v in [&first, &doomed, &last] {
            db.record_watch(watcher.id, v.id, WATCH_HISTORY_LIMIT).unwrap();
        }
        db.delete_video(doomed.id).unwrap();

        let history = views.build_watch_history(watcher.id).await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![first.id, last.id]);

        for entry in &history {
            let owner_summary = entry.owner.as_ref().unwrap();
            assert_eq!(
                *owner_summary,
                UserSummary {
                    id: owner.id,
                    username: "owner".into(),
                    full_name: "owner Example".into(),
                    avatar: "owner.png".into(),
                }
            );
        }
    }

    #[tokio::test]
    async fn rewatching_moves_video_to_the_end() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let watcher = user(&db, "watcher");
        let v1 = video(&db, owner.id, "v1");
        let v2 = video(&db, owner.id, "v2");

        for v in [&v1, &v2, &v1] {
            db.record_watch(watcher.id, v.id, WATCH_HISTORY_LIMIT).unwrap();
        }

        let history = views.build_watch_history(watcher.id).await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![v2.id, v1.id]);
    }

    #[tokio::test]
    async fn watch_history_for_unknown_user() {
        let (_db, views) = setup();
        let err = views.build_watch_history(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn liked_targets_by_kind() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let fan = user(&db, "fan");
        let v1 = video(&db, owner.id, "v1");
        let v2 = video(&db, owner.id, "v2");
        let gone = video(&db, owner.id, "gone");
        let tweet = Tweet {
            id: Uuid::new_v4(),
            owner: owner.id,
            content: "hello".into(),
            created_at: Utc::now(),
        };
        db.insert_tweet(&tweet).unwrap();
        let comment = Comment {
            id: Uuid::new_v4(),
            video: v1.id,
            owner: owner.id,
            content: "nice".into(),
            created_at: Utc::now(),
        };
        db.insert_comment(&comment).unwrap();

        for (target, kind) in [
            (v2.id, EdgeKind::Video),
            (tweet.id, EdgeKind::Tweet),
            (gone.id, EdgeKind::Video),
            (v1.id, EdgeKind::Video),
            (comment.id, EdgeKind::Comment),
        ] {
            db.toggle_edge(fan.id, target, kind).unwrap();
        }
        db.delete_video(gone.id).unwrap();

        let liked = views.build_liked_targets(fan.id, EdgeKind::Video).await.unwrap();
        let ids: Vec<Uuid> = liked
            .iter()
            .map(|l| match &l.target {
                LikedContent::Video(v) => v.id,
                other => panic!("unexpected target {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![v2.id, v1.id]);

        let tweets = views.build_liked_targets(fan.id, EdgeKind::Tweet).await.unwrap();
        assert_eq!(tweets.len(), 1);
        assert!(matches!(&tweets[0].target, LikedContent::Tweet(t) if t.content == "hello"));

        let comments = views.build_liked_targets(fan.id, EdgeKind::Comment).await.unwrap();
        assert!(matches!(&comments[0].target, LikedContent::Comment(c) if c.video == v1.id));

        let err = views.build_liked_targets(fan.id, EdgeKind::Channel).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn subscriber_lists() {
        let (db, views) = setup();
        let channel = user(&db, "creator");
        let a = user(&db, "a_fan");
        let b = user(&db, "b_fan");
        db.toggle_edge(b.id, channel.id, EdgeKind::Channel).unwrap();
        db.toggle_edge(a.id, channel.id, EdgeKind::Channel).unwrap();

        let subscribers = views.build_channel_subscribers(channel.id).await.unwrap();
        let names: Vec<&str> = subscribers.iter().map(|s| s.username.as_str()).collect();
        assert_eq!(names, ["b_fan", "a_fan"]);

        let followed = views.build_subscribed_channels(a.id).await.unwrap();
        assert_eq!(followed.len(), 1);
        assert_eq!(followed[0].id, channel.id);
        assert_eq!(followed[0].full_name, "creator Example");
    }

    #[tokio::test]
    async fn channel_videos_newest_first() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let now = Utc::now();
        let middle = video_at(&db, owner.id, "middle", now - Duration::days(1), true);
        let newest = video_at(&db, owner.id, "newest", now, true);
        video_at(&db, owner.id, "draft", now, false);
        let oldest = video_at(&db, owner.id, "oldest", now - Duration::days(2), true);

        let videos = views.build_channel_videos(owner.id).await.unwrap();
        let ids: Vec<Uuid> = videos.iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);
    }

    #[tokio::test]
    async fn video_comments_are_paginated_newest_first() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let clip = video(&db, owner.id, "clip");
        let elsewhere = video(&db, owner.id, "elsewhere");
        let now = Utc::now();

        // Inserted out of order so the sort has to do the work.
        let mut expected = Vec::new();
        for minutes in [3, 0, 4, 1, 2] {
            let comment = Comment {
                id: Uuid::new_v4(),
                video: clip.id,
                owner: owner.id,
                content: format!("{} minutes ago", minutes),
                created_at: now - Duration::minutes(minutes),
            };
            db.insert_comment(&comment).unwrap();
            expected.push((minutes, comment.id));
        }
        expected.sort();
        let expected: Vec<Uuid> = expected.into_iter().map(|(_, id)| id).collect();
        db.insert_comment(&Comment {
            id: Uuid::new_v4(),
            video: elsewhere.id,
            owner: owner.id,
            content: "other video".into(),
            created_at: now,
        })
        .unwrap();

        let first = views.build_video_comments(clip.id, 1, 2).await.unwrap();
        assert_eq!(first.total_comments, 5);
        let ids: Vec<Uuid> = first.comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, expected[..2]);

        let last = views.build_video_comments(clip.id, 3, 2).await.unwrap();
        let ids: Vec<Uuid> = last.comments.iter().map(|c| c.id).collect();
        assert_eq!(ids, expected[4..]);

        let past_end = views.build_video_comments(clip.id, 4, 2).await.unwrap();
        assert!(past_end.comments.is_empty());
        assert_eq!(past_end.total_comments, 5);
    }

    #[tokio::test]
    async fn video_comments_reject_bad_pages() {
        let (db, views) = setup();
        let owner = user(&db, "owner");
        let clip = video(&db, owner.id, "clip");

        let err = views.build_video_comments(clip.id, 0, 10).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        let err = views.build_video_comments(clip.id, 1, MAX_PAGE_SIZE + 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        let err = views.build_video_comments(Uuid::new_v4(), 1, 10).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound("video")));

        let empty = views.build_video_comments(clip.id, 1, 10).await.unwrap();
        assert!(empty.comments.is_empty());
        assert_eq!(empty.total_comments, 0);
    }

    #[tokio::test]
    async fn user_tweets_newest_first() {
        let (db, views) = setup();
        let author = user(&db, "author");
        let other = user(&db, "other");
        let now = Utc::now();

        let post = |owner: Uuid, content: &str, created_at| {
            let tweet = Tweet {
                id: Uuid::new_v4(),
                owner,
                content: content.into(),
                created_at,
            };
            db.insert_tweet(&tweet).unwrap();
            tweet.id
        };
        let older = post(author.id, "older", now - Duration::hours(1));
        post(other.id, "not mine", now);
        let newer = post(author.id, "newer", now);

        let tweets = views.build_user_tweets(author.id).await.unwrap();
        let ids: Vec<Uuid> = tweets.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![newer, older]);

        assert!(views.build_user_tweets(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
