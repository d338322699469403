use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (document collections)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE UNIQUE INDEX idx_users_username
                ON users (json_extract(doc, '$.username'));
            CREATE UNIQUE INDEX idx_users_email
                ON users (json_extract(doc, '$.email'));

            CREATE TABLE videos (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE INDEX idx_videos_owner
                ON videos (json_extract(doc, '$.owner'));

            CREATE TABLE comments (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE INDEX idx_comments_video
                ON comments (json_extract(doc, '$.video'));

            CREATE TABLE tweets (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE INDEX idx_tweets_owner
                ON tweets (json_extract(doc, '$.owner'));

            -- Edges: one row per (source, target, kind)
            CREATE TABLE subscriptions (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE UNIQUE INDEX idx_subscriptions_edge
                ON subscriptions (
                    json_extract(doc, '$.source'),
                    json_extract(doc, '$.target'),
                    json_extract(doc, '$.kind')
                );
            CREATE INDEX idx_subscriptions_target
                ON subscriptions (json_extract(doc, '$.target'));

            CREATE TABLE likes (
                id   TEXT PRIMARY KEY,
                doc  TEXT NOT NULL CHECK (json_valid(doc))
            );

            CREATE UNIQUE INDEX idx_likes_edge
                ON likes (
                    json_extract(doc, '$.source'),
                    json_extract(doc, '$.target'),
                    json_extract(doc, '$.kind')
                );
            CREATE INDEX idx_likes_target
                ON likes (json_extract(doc, '$.target'));

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
