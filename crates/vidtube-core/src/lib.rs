//! Session tokens and read-model views for the VidTube backend.

pub mod accounts;
pub mod content;
pub mod error;
pub mod session;
pub mod views;

use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_types::models::EdgeKind;

pub use error::{CoreError, CoreResult};

/// Parses a caller-supplied id.
pub fn parse_id(raw: &str) -> CoreResult<Uuid> {
    raw.trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("{:?} is not a valid id", raw)))
}

/// Parses an edge kind taken from a path segment.
pub fn parse_kind(raw: &str) -> CoreResult<EdgeKind> {
    EdgeKind::parse(raw.trim())
        .ok_or_else(|| CoreError::Validation(format!("{:?} is not a known kind", raw)))
}

/// Runs a blocking store call off the async runtime.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> CoreResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            CoreError::Persistence(anyhow::anyhow!("storage task failed: {}", e))
        })?
        .map_err(CoreError::Persistence)
}
