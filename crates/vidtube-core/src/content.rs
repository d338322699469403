use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_db::queries::WATCH_HISTORY_LIMIT;
use vidtube_types::api::PublishVideoRequest;
use vidtube_types::models::{Comment, EdgeKind, Tweet, Video};

use crate::error::{CoreError, CoreResult};
use crate::run_blocking;

const MAX_CONTENT_LEN: usize = 2000;

fn require_content(content: String) -> CoreResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CoreError::Validation("content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT_LEN {
        return Err(CoreError::Validation(format!(
            "content must be at most {} characters",
            MAX_CONTENT_LEN
        )));
    }
    Ok(content.to_string())
}

/// Single-document writes on videos, comments, tweets and relation edges.
#[derive(Clone)]
pub struct Content {
    db: Arc<Database>,
}

impl Content {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Media references come from the upload service; only metadata is stored here.
    pub async fn publish_video(&self, owner: Uuid, req: PublishVideoRequest) -> CoreResult<Video> {
        for (field, value) in [
            ("title", &req.title),
            ("description", &req.description),
            ("videoFile", &req.video_file),
            ("thumbnail", &req.thumbnail),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::Validation(format!("{} is required", field)));
            }
        }
        if !req.duration.is_finite() || req.duration < 0.0 {
            return Err(CoreError::Validation("duration must be a non-negative number".into()));
        }

        let video = Video {
            id: Uuid::new_v4(),
            owner,
            title: req.title.trim().to_string(),
            description: req.description,
            video_file: req.video_file,
            thumbnail: req.thumbnail,
            duration: req.duration,
            views: 0,
            is_published: true,
            created_at: Utc::now(),
        };

        let doc = video.clone();
        run_blocking(&self.db, move |db| db.insert_video(&doc)).await?;
        debug!(video_id = %video.id, owner = %owner, "Published video");
        Ok(video)
    }

    /// Appends to the user's history under the dedup-keep-latest policy.
    pub async fn record_watch(&self, user_id: Uuid, video_id: Uuid) -> CoreResult<()> {
        let exists = run_blocking(&self.db, move |db| db.get_video(video_id)).await?.is_some();
        if !exists {
            return Err(CoreError::NotFound("video"));
        }

        let recorded = run_blocking(&self.db, move |db| {
            db.record_watch(user_id, video_id, WATCH_HISTORY_LIMIT)
        })
        .await?;
        if !recorded {
            return Err(CoreError::NotFound("user"));
        }
        Ok(())
    }

    pub async fn add_comment(&self, owner: Uuid, video_id: Uuid, content: String) -> CoreResult<Comment> {
        let content = require_content(content)?;
        let exists = run_blocking(&self.db, move |db| db.get_video(video_id)).await?.is_some();
        if !exists {
            return Err(CoreError::NotFound("video"));
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            video: video_id,
            owner,
            content,
            created_at: Utc::now(),
        };
        let doc = comment.clone();
        run_blocking(&self.db, move |db| db.insert_comment(&doc)).await?;
        debug!(comment_id = %comment.id, video_id = %video_id, "Added comment");
        Ok(comment)
    }

    pub async fn create_tweet(&self, owner: Uuid, content: String) -> CoreResult<Tweet> {
        let tweet = Tweet {
            id: Uuid::new_v4(),
            owner,
            content: require_content(content)?,
            created_at: Utc::now(),
        };
        let doc = tweet.clone();
        run_blocking(&self.db, move |db| db.insert_tweet(&doc)).await?;
        debug!(tweet_id = %tweet.id, owner = %owner, "Created tweet");
        Ok(tweet)
    }

    /// Someone else's tweet reads as missing.
    pub async fn delete_tweet(&self, owner: Uuid, tweet_id: Uuid) -> CoreResult<()> {
        let deleted = run_blocking(&self.db, move |db| db.delete_tweet(tweet_id, owner)).await?;
        if !deleted {
            return Err(CoreError::NotFound("tweet"));
        }
        debug!(tweet_id = %tweet_id, "Deleted tweet");
        Ok(())
    }

    /// Returns true if the viewer is now subscribed.
    pub async fn toggle_subscription(&self, subscriber: Uuid, channel: Uuid) -> CoreResult<bool> {
        if subscriber == channel {
            return Err(CoreError::Validation("cannot subscribe to your own channel".into()));
        }
        self.toggle(subscriber, channel, EdgeKind::Channel, "channel").await
    }

    /// Returns true if the target is now liked.
    pub async fn toggle_like(&self, user_id: Uuid, kind: EdgeKind, target: Uuid) -> CoreResult<bool> {
        if !kind.is_likeable() {
            return Err(CoreError::Validation(format!("{} cannot be liked", kind.as_str())));
        }
        self.toggle(user_id, target, kind, kind.as_str()).await
    }

    async fn toggle(&self, source: Uuid, target: Uuid, kind: EdgeKind, what: &'static str) -> CoreResult<bool> {
        let exists = run_blocking(&self.db, move |db| db.target_exists(kind, target)).await?;
        if !exists {
            return Err(CoreError::NotFound(what));
        }

        let added = run_blocking(&self.db, move |db| db.toggle_edge(source, target, kind)).await?;
        debug!(source = %source, target = %target, kind = kind.as_str(), added, "Toggled edge");
        Ok(added)
    }
}
